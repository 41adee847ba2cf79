use ferrite_trainer::train::PredictOptions;
use ferrite_trainer::{
    Dataset, FitConfig, LossType, MlpConfig, Model, Result, Scheduler, Sgd, Span, Trainer,
};

// XOR through the full training loop: warm-up, cosine decay, validation
// on the same four points.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let inputs = vec![
        vec![1.0, 0.0],
        vec![1.0, 1.0],
        vec![0.0, 1.0],
        vec![0.0, 0.0],
    ];
    let expected_outputs = vec![
        vec![1.0],
        vec![0.0],
        vec![1.0],
        vec![0.0],
    ];

    let network = MlpConfig::new(2, 1, LossType::Mse).hidden(&[8]).fun("tanh").build()?;
    let trn = Dataset::new(inputs.clone(), expected_outputs.clone(), 2)?.shuffled(true).with_seed(7);
    let val = Dataset::new(inputs.clone(), expected_outputs, 4)?;

    let mut trainer = Trainer::new(network, false)
        .with_train_data(trn)
        .with_val_data(val)
        .with_optimizer(Sgd::new(0.1).with_momentum(0.9));
    trainer.set_scheduler(Scheduler::linear(Some(0.01), 0.1, Span::Epochs(50))?.named("warmup"));
    trainer.add_scheduler(Scheduler::cosine(None, 0.001, Span::Epochs(450))?.named("decay"));

    let cfg = FitConfig::new(500).period_val(50).period_plot(250).verbose(false);
    let outcome = trainer.fit(&cfg)?;
    println!("{}", outcome.summary);

    let mut unseen = Dataset::unlabeled(inputs.clone(), 4)?;
    let pred = trainer.predict(&mut unseen, &PredictOptions::default())?;
    for (input, out) in inputs.iter().zip(&pred["output"].data) {
        println!("Input: {:?} -> Output: {:.4}", input, out[0]);
    }
    println!("parameters: {}", trainer.model.num_params());
    Ok(())
}
