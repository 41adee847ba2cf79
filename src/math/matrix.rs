use rand::prelude::*;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;
use std::ops::{Add, Sub, Mul};

/// Row-major dense matrix.
///
/// Serves as the engine's tensor type: batches are matrices with one sample
/// per row, parameters and their gradients are matrices of the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix{
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<Vec<f64>>
}

impl Matrix{
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix{
            rows,
            cols,
            data: vec![vec![0.0; cols]; rows]
        }
    }

    /// Zero matrix with the same shape as `other`.
    pub fn zeros_like(other: &Matrix) -> Matrix {
        Matrix::zeros(other.rows, other.cols)
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    /// Both u1 and u2 must be uniform on (0, 1].
    fn sample_standard_normal<R: Rng>(rng: &mut R) -> f64 {
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    fn normal(rows: usize, cols: usize, std_dev: f64) -> Matrix {
        let mut rng = rand::thread_rng();
        let mut res = Matrix::zeros(rows, cols);
        for i in 0..rows {
            for j in 0..cols {
                res.data[i][j] = Matrix::sample_standard_normal(&mut rng) * std_dev;
            }
        }
        res
    }

    /// He initialization: samples from N(0, sqrt(2 / rows)).
    ///
    /// Recommended before ReLU-like layers. Weights are stored as
    /// (fan_in, fan_out), so `rows` is the fan-in.
    pub fn he(rows: usize, cols: usize) -> Matrix {
        Matrix::normal(rows, cols, (2.0 / rows.max(1) as f64).sqrt())
    }

    /// Xavier (Glorot) initialization: samples from N(0, sqrt(1 / rows)).
    ///
    /// Recommended before Sigmoid/Tanh/Identity layers.
    pub fn xavier(rows: usize, cols: usize) -> Matrix {
        Matrix::normal(rows, cols, (1.0 / rows.max(1) as f64).sqrt())
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);

        for i in 0..res.rows {
            for j in 0..res.cols {
                res.data[i][j] = self.data[j][i];
            }
        }

        res
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter()
                .map(|row| row.iter().map(|&x| functor(x)).collect())
                .collect(),
        }
    }

    /// Builds a matrix from rows. An empty row list gives a 0×0 matrix.
    pub fn from_data(data: Vec<Vec<f64>>) -> Matrix {
        Matrix {
            rows: data.len(),
            cols: data.first().map_or(0, |row| row.len()),
            data
        }
    }

    /// Single-row matrix.
    pub fn row_vector(values: Vec<f64>) -> Matrix {
        Matrix::from_data(vec![values])
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i]
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.rows * self.cols
    }

    pub fn same_shape(&self, other: &Matrix) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    pub fn fill(&mut self, value: f64) {
        for row in &mut self.data {
            row.iter_mut().for_each(|x| *x = value);
        }
    }

    /// In-place `self *= factor`.
    pub fn scale_mut(&mut self, factor: f64) {
        for row in &mut self.data {
            row.iter_mut().for_each(|x| *x *= factor);
        }
    }

    /// In-place `self += factor * other`.
    pub fn add_scaled(&mut self, other: &Matrix, factor: f64) {
        assert!(self.same_shape(other), "Matrices are of incorrect sizes");
        for (row, other_row) in self.data.iter_mut().zip(other.data.iter()) {
            for (x, y) in row.iter_mut().zip(other_row.iter()) {
                *x += factor * y;
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|row| row.iter().all(|x| x.is_finite()))
    }

    /// Appends the rows of `other` below `self`.
    ///
    /// An empty `self` adopts the width of `other`.
    pub fn vstack(&mut self, other: &Matrix) {
        if self.rows == 0 {
            self.cols = other.cols;
        }
        assert_eq!(self.cols, other.cols, "vstack: column count mismatch");
        self.data.extend(other.data.iter().cloned());
        self.rows += other.rows;
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}

impl Add for Matrix {
    type Output = Matrix;

    fn add(mut self, rhs: Self) -> Self::Output {
        if !self.same_shape(&rhs) {
            panic!("Matrices are of incorrect sizes")
        }
        self.add_scaled(&rhs, 1.0);
        self
    }
}

impl Sub for Matrix {
    type Output = Matrix;

    fn sub(mut self, rhs: Self) -> Self::Output {
        if !self.same_shape(&rhs) {
            panic!("Matrices are of incorrect sizes")
        }
        self.add_scaled(&rhs, -1.0);
        self
    }
}

impl Mul for Matrix {
    type Output = Matrix;

    fn mul(self, rhs: Self) -> Self::Output {
        if self.cols != rhs.rows {
            panic!("Matrices are of incorrect sizes")
        }

        let mut res =  Matrix::zeros(self.rows, rhs.cols);

        for i in 0..res.rows {
            for j in 0..res.cols {
                let mut sum = 0.0;

                for k in 0..self.cols {
                    sum += self.data[i][k] * rhs.data[k][j];
                }

                res.data[i][j] = sum;
            }
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_data_empty() {
        let m = Matrix::from_data(vec![]);
        assert_eq!((m.rows, m.cols), (0, 0));
    }

    #[test]
    fn test_add_scaled_and_scale() {
        let mut a = Matrix::from_data(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = Matrix::from_data(vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
        a.add_scaled(&b, 0.5);
        assert_eq!(a.data, vec![vec![1.5, 2.5], vec![3.5, 4.5]]);
        a.scale_mut(2.0);
        assert_eq!(a.data, vec![vec![3.0, 5.0], vec![7.0, 9.0]]);
    }

    #[test]
    fn test_vstack_adopts_width() {
        let mut acc = Matrix::default();
        acc.vstack(&Matrix::from_data(vec![vec![1.0, 2.0]]));
        acc.vstack(&Matrix::from_data(vec![vec![3.0, 4.0], vec![5.0, 6.0]]));
        assert_eq!((acc.rows, acc.cols), (3, 2));
        assert_eq!(acc.row(2), &[5.0, 6.0]);
    }

    #[test]
    fn test_mul_and_transpose() {
        let a = Matrix::from_data(vec![vec![1.0, 2.0, 3.0]]);
        let b = a.transpose();
        let c = a * b;
        assert_eq!(c.data, vec![vec![14.0]]);
    }

    #[test]
    fn test_is_finite() {
        let mut m = Matrix::zeros(2, 2);
        assert!(m.is_finite());
        m.data[1][0] = f64::NAN;
        assert!(!m.is_finite());
    }
}
