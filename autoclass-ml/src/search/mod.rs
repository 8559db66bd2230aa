//! Search space over architectures and training hyperparameters.

pub mod space;

pub use space::{SearchSpace, TrialConfig, TrialConfigs, sample_float, sample_int};
