//! Trial execution, scheduling and checkpointing.

pub mod callbacks;
pub mod checkpoint;
pub mod executor;
pub mod schedule;
pub mod scheduler;
pub mod trial;

pub use callbacks::{CallbackAction, EarlyStopping, TrainingCallback};
pub use checkpoint::{Checkpoint, CheckpointRef, CheckpointStore, Promotion};
pub use executor::{TrialData, TrialExecutor};
pub use schedule::{effective_batch_size, learning_rate_at};
pub use scheduler::{ResourcePlan, SearchOutcome, SearchReport, TrialScheduler, select_best};
pub use trial::{EpochMetrics, TrialResult, TrialStatus};
