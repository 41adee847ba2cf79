pub mod config;
pub mod network;

pub use config::MlpConfig;
pub use network::Network;
