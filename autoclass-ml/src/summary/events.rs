//! Training events emitted by the scheduler and executor.

use crate::training::trial::{EpochMetrics, TrialStatus};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrialEvent {
    TrialStarted {
        trial_id: Uuid,
        trial_index: usize,
        architecture: String,
    },
    EpochCompleted {
        trial_id: Uuid,
        metrics: EpochMetrics,
    },
    CheckpointPromoted {
        trial_id: Uuid,
        epoch: usize,
        metric: f64,
    },
    TrialFinished {
        trial_id: Uuid,
        status: TrialStatus,
        best_val_acc: Option<f64>,
    },
}

/// Receives training events. Called from trial worker threads.
pub trait TrainingObserver: Send + Sync {
    fn on_event(&self, event: &TrialEvent);
}

/// Emits every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl TrainingObserver for LoggingObserver {
    fn on_event(&self, event: &TrialEvent) {
        match event {
            TrialEvent::TrialStarted {
                trial_id,
                trial_index,
                architecture,
            } => {
                tracing::info!(
                    trial = %trial_id,
                    index = trial_index,
                    architecture = %architecture,
                    "Trial started"
                );
            }
            TrialEvent::EpochCompleted { trial_id, metrics } => {
                tracing::info!(
                    trial = %trial_id,
                    epoch = metrics.epoch,
                    train_loss = metrics.train_loss,
                    train_acc = metrics.train_acc,
                    val_top1 = metrics.val_top1,
                    val_top5 = metrics.val_top5,
                    lr = metrics.learning_rate,
                    throughput = metrics.throughput,
                    "Epoch completed"
                );
            }
            TrialEvent::CheckpointPromoted {
                trial_id,
                epoch,
                metric,
            } => {
                tracing::info!(trial = %trial_id, epoch, metric, "New global best");
            }
            TrialEvent::TrialFinished {
                trial_id,
                status,
                best_val_acc,
            } => {
                tracing::info!(
                    trial = %trial_id,
                    status = %status,
                    best_val_acc = ?best_val_acc,
                    "Trial finished"
                );
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TrainingObserver for NoopObserver {
    fn on_event(&self, _event: &TrialEvent) {}
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<TrialEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrialEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl TrainingObserver for EventLog {
    fn on_event(&self, event: &TrialEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_records_in_order() {
        let log = EventLog::new();
        let id = Uuid::new_v4();
        log.on_event(&TrialEvent::TrialStarted {
            trial_id: id,
            trial_index: 0,
            architecture: "mlp".into(),
        });
        log.on_event(&TrialEvent::TrialFinished {
            trial_id: id,
            status: TrialStatus::Completed,
            best_val_acc: Some(0.5),
        });
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            TrialEvent::TrialFinished {
                status: TrialStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = TrialEvent::CheckpointPromoted {
            trial_id: Uuid::nil(),
            epoch: 3,
            metric: 0.75,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "checkpoint_promoted");
        assert_eq!(json["epoch"], 3);
    }
}
