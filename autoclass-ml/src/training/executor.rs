//! Runs a single trial epoch by epoch.

use crate::data::{DatasetView, FeatureTable};
use crate::error::{AutoClassError, Result};
use crate::model::ops::{argmax, in_top_k};
use crate::model::{ArchitectureRegistry, Classifier, ModelSpec};
use crate::search::TrialConfig;
use crate::summary::events::{TrainingObserver, TrialEvent};
use crate::training::callbacks::{CallbackAction, EarlyStopping, TrainingCallback};
use crate::training::checkpoint::{Checkpoint, CheckpointStore};
use crate::training::schedule::{effective_batch_size, learning_rate_at};
use crate::training::trial::{EpochMetrics, TrialResult, TrialStatus};
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Training and validation views plus the decoded features they index into.
#[derive(Debug, Clone)]
pub struct TrialData {
    pub train: DatasetView,
    pub validation: DatasetView,
    pub features: Arc<FeatureTable>,
}

impl TrialData {
    pub fn new(
        train: DatasetView,
        validation: DatasetView,
        features: Arc<FeatureTable>,
    ) -> Result<Self> {
        if !Arc::ptr_eq(train.dataset(), validation.dataset()) {
            return Err(AutoClassError::invalid_input(
                "train and validation views must share one dataset",
            ));
        }
        if features.len() != train.dataset().len() {
            return Err(AutoClassError::invalid_input(format!(
                "feature table has {} rows for {} samples",
                features.len(),
                train.dataset().len()
            )));
        }
        Ok(Self {
            train,
            validation,
            features,
        })
    }

    pub fn classes(&self) -> &[String] {
        self.train.dataset().classes()
    }

    /// `(dataset index, class id)` of every labelled sample in `view`.
    fn labelled(view: &DatasetView) -> Vec<(usize, usize)> {
        view.iter()
            .filter_map(|(i, s)| s.class_id.map(|c| (i, c)))
            .collect()
    }
}

/// Executes trials against a shared checkpoint store.
pub struct TrialExecutor {
    registry: ArchitectureRegistry,
    store: Arc<CheckpointStore>,
    observer: Arc<dyn TrainingObserver>,
    cancel: CancellationToken,
}

impl TrialExecutor {
    pub fn new(
        registry: ArchitectureRegistry,
        store: Arc<CheckpointStore>,
        observer: Arc<dyn TrainingObserver>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            observer,
            cancel,
        }
    }

    pub fn store(&self) -> &Arc<CheckpointStore> {
        &self.store
    }

    /// Train `config` until its epochs run out, `deadline` passes, early
    /// stopping triggers or cancellation is requested.
    ///
    /// The deadline and cancellation are only checked between epochs.
    /// Failures are recorded in the returned result, never raised.
    pub fn run(&self, config: &TrialConfig, data: &TrialData, deadline: Instant) -> TrialResult {
        let started = Instant::now();
        let mut result = TrialResult::new(config.clone());
        self.observer.on_event(&TrialEvent::TrialStarted {
            trial_id: config.trial_id,
            trial_index: config.trial_index,
            architecture: config.architecture.clone(),
        });

        match self.train(config, data, deadline, &mut result) {
            Ok(status) => result.finish(status, started.elapsed().as_secs_f64()),
            Err(e) => {
                tracing::warn!(trial = %config.trial_id, error = %e, "Trial failed");
                result.fail(e.to_string(), started.elapsed().as_secs_f64());
            }
        }

        self.observer.on_event(&TrialEvent::TrialFinished {
            trial_id: config.trial_id,
            status: result.status,
            best_val_acc: result.best_val_acc,
        });
        result
    }

    fn train(
        &self,
        config: &TrialConfig,
        data: &TrialData,
        deadline: Instant,
        result: &mut TrialResult,
    ) -> Result<TrialStatus> {
        let spec = ModelSpec {
            input_dim: data.features.dim(),
            num_classes: data.classes().len(),
            hidden_units: config.hidden_units,
            weight_decay: config.weight_decay as f32,
        };
        let mut model = self
            .registry
            .get(&config.architecture)?
            .build(&spec, config.seed)?;
        self.store.write_trial_config(config)?;

        let mut order = TrialData::labelled(&data.train);
        if order.is_empty() {
            return Err(AutoClassError::trial(
                config.trial_id,
                "training split has no labelled samples",
            ));
        }
        let validation = TrialData::labelled(&data.validation);
        let batch_size = effective_batch_size(config.batch_size, order.len());
        let mut callbacks: Vec<Box<dyn TrainingCallback>> =
            vec![Box::new(EarlyStopping::new(config.early_stopping_patience))];

        for epoch in 0..config.epochs {
            if self.cancel.is_cancelled() {
                return Ok(TrialStatus::Cancelled);
            }
            if Instant::now() >= deadline {
                tracing::info!(trial = %config.trial_id, epoch, "Deadline reached before epoch");
                return Ok(TrialStatus::TimeLimited);
            }

            let epoch_start = Instant::now();
            let lr = learning_rate_at(
                config.learning_rate,
                &config.lr_schedule,
                config.warmup_epochs,
                epoch,
                config.epochs,
            );
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add((epoch as u64) << 32));
            order.shuffle(&mut rng);

            let (mut loss_sum, mut correct) = (0.0f64, 0usize);
            for chunk in order.chunks(batch_size) {
                let inputs: Vec<&[f32]> =
                    chunk.iter().map(|(i, _)| data.features.row(*i)).collect();
                let targets: Vec<usize> = chunk.iter().map(|(_, c)| *c).collect();
                let stats = model.train_batch(&inputs, &targets, lr as f32);
                if !stats.loss.is_finite() {
                    return Err(AutoClassError::trial(
                        config.trial_id,
                        format!("training diverged at epoch {} (lr {lr})", epoch + 1),
                    ));
                }
                loss_sum += stats.loss;
                correct += stats.correct;
            }
            let train_secs = epoch_start.elapsed().as_secs_f64();
            let state = model.state();
            if !state.is_finite() {
                return Err(AutoClassError::trial(
                    config.trial_id,
                    format!("training diverged at epoch {}: non-finite parameters", epoch + 1),
                ));
            }
            let (val_top1, val_top5) = evaluate(model.as_ref(), &data.features, &validation);

            let n = order.len() as f64;
            let metrics = EpochMetrics {
                epoch: epoch + 1,
                train_loss: loss_sum / n,
                train_acc: correct as f64 / n,
                val_top1,
                val_top5,
                learning_rate: lr,
                batch_size,
                throughput: if train_secs > 0.0 { n / train_secs } else { n },
                wall_time_secs: epoch_start.elapsed().as_secs_f64(),
            };
            result.record_epoch(metrics.clone());
            self.observer.on_event(&TrialEvent::EpochCompleted {
                trial_id: config.trial_id,
                metrics: metrics.clone(),
            });

            if result.is_improvement(val_top1) {
                let checkpoint = Checkpoint {
                    trial: config.clone(),
                    epoch: epoch + 1,
                    metric: val_top1,
                    train_acc: metrics.train_acc,
                    classes: data.classes().to_vec(),
                    model: state,
                    created_at: Utc::now(),
                };
                let saved = self.store.save(&checkpoint)?;
                if self.store.promote(&saved)? {
                    self.observer.on_event(&TrialEvent::CheckpointPromoted {
                        trial_id: config.trial_id,
                        epoch: epoch + 1,
                        metric: val_top1,
                    });
                }
                result.mark_best(epoch + 1, val_top1, metrics.train_acc, saved);
            }

            let stop = callbacks
                .iter_mut()
                .map(|cb| cb.on_epoch_end(&metrics))
                .fold(false, |acc, action| acc || action == CallbackAction::Stop);
            if stop {
                tracing::info!(trial = %config.trial_id, epoch = epoch + 1, "Early stopping");
                return Ok(TrialStatus::EarlyStopped);
            }
        }
        Ok(TrialStatus::Completed)
    }
}

/// Top-1 and top-5 accuracy of `model` over labelled samples.
fn evaluate(
    model: &dyn Classifier,
    features: &FeatureTable,
    samples: &[(usize, usize)],
) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let (mut top1, mut top5) = (0usize, 0usize);
    for &(i, class) in samples {
        let scores = model.forward(features.row(i));
        if argmax(&scores) == class {
            top1 += 1;
        }
        if in_top_k(&scores, class, 5) {
            top5 += 1;
        }
    }
    let n = samples.len() as f64;
    (top1 as f64 / n, top5 as f64 / n)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::data::{Dataset, Sample};

    /// Two well separated classes in two dimensions.
    pub fn toy_data(per_class: usize) -> TrialData {
        let classes = vec!["left".to_string(), "right".to_string()];
        let mut samples = Vec::new();
        let mut rows = Vec::new();
        for k in 0..per_class {
            let jitter = k as f32 * 0.01;
            for (id, row) in [(0usize, vec![1.0 + jitter, 0.0]), (1, vec![0.0, 1.0 + jitter])] {
                samples.push(Sample {
                    path: format!("{}/{k}.png", classes[id]).into(),
                    label: classes[id].clone(),
                    class_id: Some(id),
                });
                rows.push(row);
            }
        }
        let dataset = Arc::new(Dataset::new("/toy", classes, samples).unwrap());
        let features = Arc::new(FeatureTable::from_rows(rows, 2).unwrap());
        let (train, validation) = dataset.split(0.25, 0, true).unwrap();
        TrialData::new(train, validation, features).unwrap()
    }
}
