//! # autoclass-ml - architecture and hyperparameter search for image classifiers
//!
//! Given a labelled image tree, the crate searches over architectures and
//! training hyperparameters, trains each candidate under a time budget,
//! keeps the best checkpoint per trial and serves predictions from the
//! winning model.
//!
//! Data flows leaves first:
//! dataset → search space → trial executor → checkpoint store, repeated per
//! trial by the scheduler, then best-trial selection → predictor. The fit
//! summary observes scheduler and executor events throughout.

pub mod data;
pub mod error;
pub mod inference;
pub mod model;
pub mod search;
pub mod summary;
pub mod task;
pub mod training;

// Re-exports
pub use data::{Dataset, DatasetFetcher, DatasetSource, DatasetView, ImageFolder, Sample};
pub use error::{AutoClassError, Result};
pub use inference::{Evaluation, PredictInput, Prediction, Predictor};
pub use model::{Architecture, ArchitectureRegistry, Classifier};
pub use search::{SearchSpace, TrialConfig};
pub use summary::{FitSummary, LoggingObserver, TrainingObserver, TrialEvent};
pub use task::ImageClassifier;
pub use training::{CheckpointStore, TrialResult, TrialScheduler, TrialStatus};
