//! Per-trial results and metric history.

use crate::search::TrialConfig;
use crate::training::checkpoint::CheckpointRef;
use serde::{Deserialize, Serialize};

/// How a trial ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Running,
    /// Ran every configured epoch.
    Completed,
    /// Stopped at an epoch boundary because the deadline passed.
    TimeLimited,
    /// Stopped because validation accuracy stopped improving.
    EarlyStopped,
    /// Stopped on request.
    Cancelled,
    Failed,
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrialStatus::Running => write!(f, "running"),
            TrialStatus::Completed => write!(f, "completed"),
            TrialStatus::TimeLimited => write!(f, "time_limited"),
            TrialStatus::EarlyStopped => write!(f, "early_stopped"),
            TrialStatus::Cancelled => write!(f, "cancelled"),
            TrialStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Metrics of one finished epoch. Accuracies are fractions in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number.
    pub epoch: usize,
    pub train_loss: f64,
    pub train_acc: f64,
    pub val_top1: f64,
    pub val_top5: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// Training samples per second over this epoch's training pass.
    pub throughput: f64,
    pub wall_time_secs: f64,
}

/// Outcome of one trial.
///
/// `history` is append-only. The `best_*` fields and `checkpoint` only
/// change when an epoch strictly improves `best_val_acc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub config: TrialConfig,
    pub status: TrialStatus,
    pub history: Vec<EpochMetrics>,
    pub best_val_acc: Option<f64>,
    pub best_epoch: Option<usize>,
    pub best_train_acc: Option<f64>,
    pub checkpoint: Option<CheckpointRef>,
    pub message: Option<String>,
    pub elapsed_secs: f64,
}

impl TrialResult {
    pub fn new(config: TrialConfig) -> Self {
        Self {
            config,
            status: TrialStatus::Running,
            history: Vec::new(),
            best_val_acc: None,
            best_epoch: None,
            best_train_acc: None,
            checkpoint: None,
            message: None,
            elapsed_secs: 0.0,
        }
    }

    pub fn trial_index(&self) -> usize {
        self.config.trial_index
    }

    /// Whether `val_acc` strictly beats the best seen so far.
    pub fn is_improvement(&self, val_acc: f64) -> bool {
        match self.best_val_acc {
            None => val_acc.is_finite(),
            Some(best) => val_acc > best,
        }
    }

    pub fn record_epoch(&mut self, metrics: EpochMetrics) {
        self.history.push(metrics);
    }

    /// Record a new best epoch and the checkpoint persisted for it.
    pub fn mark_best(
        &mut self,
        epoch: usize,
        val_acc: f64,
        train_acc: f64,
        checkpoint: CheckpointRef,
    ) {
        debug_assert!(self.is_improvement(val_acc));
        self.best_val_acc = Some(val_acc);
        self.best_epoch = Some(epoch);
        self.best_train_acc = Some(train_acc);
        self.checkpoint = Some(checkpoint);
    }

    pub fn finish(&mut self, status: TrialStatus, elapsed_secs: f64) {
        self.status = status;
        self.elapsed_secs = elapsed_secs;
    }

    /// Mark failed. Any checkpoint already taken is kept.
    pub fn fail(&mut self, message: impl Into<String>, elapsed_secs: f64) {
        self.message = Some(message.into());
        self.finish(TrialStatus::Failed, elapsed_secs);
    }

    pub fn has_checkpoint(&self) -> bool {
        self.checkpoint.is_some()
    }

    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::trial_config;
    use super::*;
    use std::path::PathBuf;

    fn ckpt_ref(epoch: usize, metric: f64) -> CheckpointRef {
        CheckpointRef {
            trial_id: uuid::Uuid::nil(),
            trial_index: 0,
            epoch,
            metric,
            path: PathBuf::from(format!("trials/x/epoch-{epoch:04}.ckpt.json")),
            sha256: String::new(),
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TrialStatus::TimeLimited.to_string(), "time_limited");
        assert_eq!(TrialStatus::EarlyStopped.to_string(), "early_stopped");
        assert_eq!(
            serde_json::to_string(&TrialStatus::TimeLimited).unwrap(),
            "\"time_limited\""
        );
    }

    #[test]
    fn test_improvement_is_strict() {
        let mut result = TrialResult::new(trial_config(0));
        assert!(result.is_improvement(0.0));
        result.mark_best(1, 0.5, 0.6, ckpt_ref(1, 0.5));
        assert!(!result.is_improvement(0.5));
        assert!(result.is_improvement(0.51));
        assert!(!result.is_improvement(f64::NAN));
    }

    #[test]
    fn test_fail_keeps_checkpoint() {
        let mut result = TrialResult::new(trial_config(0));
        result.mark_best(2, 0.7, 0.8, ckpt_ref(2, 0.7));
        result.fail("diverged", 1.5);
        assert_eq!(result.status, TrialStatus::Failed);
        assert!(result.has_checkpoint());
        assert_eq!(result.message.as_deref(), Some("diverged"));
        assert_eq!(result.best_epoch, Some(2));
    }
}
