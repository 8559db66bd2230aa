//! Inference over the promoted model.

pub mod predictor;

pub use predictor::{Evaluation, PredictInput, Prediction, Predictor};
