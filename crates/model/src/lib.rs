pub mod cnn;
pub mod config;

pub use cnn::{build_model, LightCnn, RegressionModel};
pub use config::{ModelConfig, Variant};
