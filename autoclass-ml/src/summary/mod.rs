//! Fit summaries and training event observers.

pub mod events;

use crate::search::TrialConfig;
use crate::training::trial::{TrialResult, TrialStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

pub use events::{EventLog, LoggingObserver, NoopObserver, TrainingObserver, TrialEvent};

/// Result of one fit: the best trial plus the full per-trial history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub run_id: Uuid,
    /// `None` when no trial produced a checkpoint.
    pub best_config: Option<TrialConfig>,
    pub train_acc: Option<f64>,
    pub valid_acc: Option<f64>,
    pub best_epoch: Option<usize>,
    pub total_time_secs: f64,
    /// Trial count per status name.
    pub status_counts: BTreeMap<String, usize>,
    pub trials: Vec<TrialResult>,
}

/// Aggregate trial results. Pure: no I/O, no logging.
pub fn summarize(
    trials: &[TrialResult],
    best: Option<&TrialResult>,
    elapsed: Duration,
    run_id: Uuid,
) -> FitSummary {
    let mut status_counts = BTreeMap::new();
    for trial in trials {
        *status_counts.entry(trial.status.to_string()).or_insert(0) += 1;
    }
    FitSummary {
        run_id,
        best_config: best.map(|b| b.config.clone()),
        train_acc: best.and_then(|b| b.best_train_acc),
        valid_acc: best.and_then(|b| b.best_val_acc),
        best_epoch: best.and_then(|b| b.best_epoch),
        total_time_secs: elapsed.as_secs_f64(),
        status_counts,
        trials: trials.to_vec(),
    }
}

impl FitSummary {
    pub fn num_trials(&self) -> usize {
        self.trials.len()
    }

    pub fn count(&self, status: TrialStatus) -> usize {
        self.status_counts
            .get(&status.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn is_fitted(&self) -> bool {
        self.best_config.is_some()
    }

    /// Flat `key -> value` view: best configuration fields, top metrics
    /// and trial counts.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("run_id".into(), Value::from(self.run_id.to_string()));
        map.insert("total_time".into(), Value::from(self.total_time_secs));
        map.insert("num_trials".into(), Value::from(self.trials.len()));
        map.insert("train_acc".into(), self.train_acc.map_or(Value::Null, Value::from));
        map.insert("valid_acc".into(), self.valid_acc.map_or(Value::Null, Value::from));
        map.insert("best_epoch".into(), self.best_epoch.map_or(Value::Null, Value::from));
        for (status, n) in &self.status_counts {
            map.insert(format!("trials.{status}"), Value::from(*n));
        }
        if let Some(config) = &self.best_config
            && let Ok(Value::Object(fields)) = serde_json::to_value(config)
        {
            for (key, value) in fields {
                map.insert(format!("best_config.{key}"), value);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::checkpoint::CheckpointRef;
    use crate::training::trial::fixtures::trial_config;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn trial(index: usize, status: TrialStatus, acc: Option<f64>) -> TrialResult {
        let mut t = TrialResult::new(trial_config(index));
        if let Some(acc) = acc {
            let reference = CheckpointRef {
                trial_id: t.config.trial_id,
                trial_index: index,
                epoch: 2,
                metric: acc,
                path: PathBuf::from("p"),
                sha256: String::new(),
            };
            t.mark_best(2, acc, 0.9, reference);
        }
        t.finish(status, 1.0);
        t
    }

    #[test]
    fn test_summarize_best_and_counts() {
        let trials = vec![
            trial(0, TrialStatus::Completed, Some(0.7)),
            trial(1, TrialStatus::TimeLimited, None),
            trial(2, TrialStatus::Failed, None),
        ];
        let summary = summarize(&trials, Some(&trials[0]), Duration::from_secs(3), Uuid::nil());
        assert_eq!(summary.valid_acc, Some(0.7));
        assert_eq!(summary.train_acc, Some(0.9));
        assert_eq!(summary.best_epoch, Some(2));
        assert_eq!(summary.count(TrialStatus::TimeLimited), 1);
        assert_eq!(summary.count(TrialStatus::Cancelled), 0);
        assert_eq!(summary.num_trials(), 3);
        assert!(summary.is_fitted());
    }

    #[test]
    fn test_flatten() {
        let trials = vec![trial(0, TrialStatus::Completed, Some(0.5))];
        let summary = summarize(&trials, trials.first(), Duration::from_millis(1500), Uuid::nil());
        let flat = summary.flatten();
        assert_eq!(flat["valid_acc"], Value::from(0.5));
        assert_eq!(flat["best_config.architecture"], Value::from("linear"));
        assert_eq!(flat["best_config.epochs"], Value::from(3));
        assert_eq!(flat["trials.completed"], Value::from(1));
        assert_eq!(flat["total_time"], Value::from(1.5));
    }

    #[test]
    fn test_unfitted_summary() {
        let trials = vec![trial(0, TrialStatus::TimeLimited, None)];
        let summary = summarize(&trials, None, Duration::ZERO, Uuid::nil());
        assert!(!summary.is_fitted());
        let flat = summary.flatten();
        assert_eq!(flat["valid_acc"], Value::Null);
        assert!(!flat.contains_key("best_config.architecture"));
        assert_eq!(flat["trials.time_limited"], Value::from(1));
    }

    #[test]
    fn test_summary_json_roundtrip_keeps_history() {
        let trials = vec![trial(0, TrialStatus::Completed, Some(0.5))];
        let summary = summarize(&trials, trials.first(), Duration::from_secs(1), Uuid::new_v4());
        let json = serde_json::to_string(&summary).unwrap();
        let back: FitSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trials.len(), 1);
        assert_eq!(back.best_config.map(|c| c.trial_id), summary.best_config.map(|c| c.trial_id));
    }
}
