//! Checkpoint store with a versioned "current best" promotion pointer.
//!
//! Layout under the run directory:
//!
//! ```text
//! best.json                               promotion pointer
//! trials/<trial-uuid>/config.json         trial configuration
//! trials/<trial-uuid>/epoch-NNNN.ckpt.json
//! ```
//!
//! Every file is written to a unique temporary sibling and renamed into
//! place, so readers never observe a partial checkpoint or pointer.

use crate::error::{AutoClassError, Result};
use crate::model::ModelState;
use crate::search::TrialConfig;
use autoclass_core::persistence::{atomic_write, atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const POINTER_FILE: &str = "best.json";
const TRIALS_DIR: &str = "trials";
const CHECKPOINT_SUFFIX: &str = ".ckpt.json";

/// Model parameters captured at the end of an improving epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub trial: TrialConfig,
    /// 1-based epoch of capture.
    pub epoch: usize,
    /// Validation top-1 accuracy at capture.
    pub metric: f64,
    pub train_acc: f64,
    pub classes: Vec<String>,
    pub model: ModelState,
    pub created_at: DateTime<Utc>,
}

/// Handle to a persisted checkpoint. `path` is relative to the run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub trial_id: Uuid,
    pub trial_index: usize,
    pub epoch: usize,
    pub metric: f64,
    pub path: PathBuf,
    pub sha256: String,
}

impl CheckpointRef {
    /// Whether this checkpoint should replace `current` as the global best:
    /// a higher metric, or an equal metric from an earlier trial.
    pub fn outranks(&self, current: &CheckpointRef) -> bool {
        self.metric > current.metric
            || (self.metric == current.metric && self.trial_index < current.trial_index)
    }
}

/// The promotion pointer as stored in `best.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    /// Incremented on every successful promotion.
    pub version: u64,
    pub checkpoint: CheckpointRef,
    pub promoted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreState {
    promotion: Option<Promotion>,
    latest: HashMap<Uuid, CheckpointRef>,
}

/// Owns the checkpoint files of one run and is the sole authority on which
/// checkpoint is currently promoted.
#[derive(Debug)]
pub struct CheckpointStore {
    run_dir: PathBuf,
    state: Mutex<StoreState>,
}

impl CheckpointStore {
    /// Start an empty store in `run_dir`.
    pub fn create(run_dir: impl Into<PathBuf>) -> Result<Self> {
        let run_dir = run_dir.into();
        std::fs::create_dir_all(run_dir.join(TRIALS_DIR))?;
        Ok(Self {
            run_dir,
            state: Mutex::new(StoreState::default()),
        })
    }

    /// Reopen a store, reloading the promotion pointer from disk.
    pub fn open(run_dir: impl Into<PathBuf>) -> Result<Self> {
        let run_dir = run_dir.into();
        if !run_dir.is_dir() {
            return Err(AutoClassError::checkpoint(format!(
                "run directory {} does not exist",
                run_dir.display()
            )));
        }
        let promotion: Option<Promotion> = load_json(&run_dir.join(POINTER_FILE))?;
        let mut latest = HashMap::new();
        if let Some(p) = &promotion {
            latest.insert(p.checkpoint.trial_id, p.checkpoint.clone());
        }
        Ok(Self {
            run_dir,
            state: Mutex::new(StoreState { promotion, latest }),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn trial_dir(&self, trial_id: Uuid) -> PathBuf {
        self.run_dir.join(TRIALS_DIR).join(trial_id.to_string())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write_trial_config(&self, config: &TrialConfig) -> Result<()> {
        atomic_write_json(&self.trial_dir(config.trial_id).join("config.json"), config)?;
        Ok(())
    }

    /// Persist a checkpoint, then drop the trial's older checkpoint files
    /// unless one of them is currently promoted.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<CheckpointRef> {
        let trial_id = checkpoint.trial.trial_id;
        let relative = PathBuf::from(TRIALS_DIR)
            .join(trial_id.to_string())
            .join(format!("epoch-{:04}{CHECKPOINT_SUFFIX}", checkpoint.epoch));
        let bytes = serde_json::to_vec(checkpoint)?;
        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        atomic_write(&self.run_dir.join(&relative), &bytes)?;

        let saved = CheckpointRef {
            trial_id,
            trial_index: checkpoint.trial.trial_index,
            epoch: checkpoint.epoch,
            metric: checkpoint.metric,
            path: relative,
            sha256,
        };

        let mut state = self.lock();
        state.latest.insert(trial_id, saved.clone());
        let promoted = state.promotion.as_ref().map(|p| p.checkpoint.path.clone());
        for path in self.list(trial_id)? {
            let relative = path.strip_prefix(&self.run_dir).unwrap_or(&path);
            if relative == saved.path || Some(relative) == promoted.as_deref() {
                continue;
            }
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove superseded checkpoint"
                );
            }
        }
        tracing::debug!(
            trial = %trial_id,
            epoch = saved.epoch,
            metric = saved.metric,
            "Saved checkpoint"
        );
        Ok(saved)
    }

    /// Promote `candidate` if it outranks the current best. Returns whether
    /// the pointer moved. Promotion never regresses.
    pub fn promote(&self, candidate: &CheckpointRef) -> Result<bool> {
        let mut state = self.lock();
        if let Some(current) = &state.promotion
            && !candidate.outranks(&current.checkpoint)
        {
            return Ok(false);
        }

        let promotion = Promotion {
            version: state.promotion.as_ref().map_or(1, |p| p.version + 1),
            checkpoint: candidate.clone(),
            promoted_at: Utc::now(),
        };
        atomic_write_json(&self.run_dir.join(POINTER_FILE), &promotion)?;
        let previous = state.promotion.replace(promotion);

        // The old best is garbage once it is neither promoted nor its trial's latest.
        if let Some(old) = previous {
            let still_latest = state
                .latest
                .get(&old.checkpoint.trial_id)
                .is_some_and(|r| r.path == old.checkpoint.path);
            if !still_latest && old.checkpoint.path != candidate.path {
                let _ = std::fs::remove_file(self.run_dir.join(&old.checkpoint.path));
            }
        }
        tracing::info!(
            trial = %candidate.trial_id,
            epoch = candidate.epoch,
            metric = candidate.metric,
            "Promoted checkpoint"
        );
        Ok(true)
    }

    pub fn current(&self) -> Option<Promotion> {
        self.lock().promotion.clone()
    }

    /// Read a checkpoint back, verifying its content hash.
    pub fn load(&self, reference: &CheckpointRef) -> Result<Checkpoint> {
        let path = self.run_dir.join(&reference.path);
        let bytes = std::fs::read(&path).map_err(|e| {
            AutoClassError::checkpoint(format!("cannot read {}: {e}", path.display()))
        })?;
        let actual = format!("{:x}", Sha256::digest(&bytes));
        if actual != reference.sha256 {
            return Err(AutoClassError::checkpoint(format!(
                "hash mismatch for {}",
                path.display()
            )));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The promoted checkpoint, if any.
    pub fn load_promoted(&self) -> Result<Option<Checkpoint>> {
        match self.current() {
            Some(p) => self.load(&p.checkpoint).map(Some),
            None => Ok(None),
        }
    }

    /// Checkpoint files of a trial, sorted by name.
    pub fn list(&self, trial_id: Uuid) -> Result<Vec<PathBuf>> {
        let dir = self.trial_dir(trial_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("epoch-") && n.ends_with(CHECKPOINT_SUFFIX));
            if is_checkpoint {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NamedTensor;
    use crate::training::trial::fixtures::trial_config;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn checkpoint(config: &TrialConfig, epoch: usize, metric: f64) -> Checkpoint {
        Checkpoint {
            trial: config.clone(),
            epoch,
            metric,
            train_acc: metric,
            classes: vec!["cat".into(), "dog".into()],
            model: ModelState {
                architecture: "linear".into(),
                input_dim: 1,
                num_classes: 2,
                tensors: vec![NamedTensor::new("bias", vec![2], vec![epoch as f32, 0.0])],
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_verifies_hash() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();
        let config = trial_config(0);
        let ckpt = checkpoint(&config, 1, 0.5);
        let saved = store.save(&ckpt).unwrap();
        assert_eq!(
            saved.path,
            PathBuf::from(format!("trials/{}/epoch-0001.ckpt.json", config.trial_id))
        );
        assert_eq!(store.load(&saved).unwrap(), ckpt);

        std::fs::write(dir.path().join(&saved.path), b"{}").unwrap();
        assert!(matches!(store.load(&saved), Err(AutoClassError::Checkpoint(_))));
    }

    #[test]
    fn test_save_prunes_unpromoted_predecessors() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();
        let config = trial_config(0);

        let first = store.save(&checkpoint(&config, 1, 0.3)).unwrap();
        assert!(store.promote(&first).unwrap());
        let second = store.save(&checkpoint(&config, 2, 0.4)).unwrap();
        // epoch 1 stays while promoted
        assert_eq!(store.list(config.trial_id).unwrap().len(), 2);

        assert!(store.promote(&second).unwrap());
        let files = store.list(config.trial_id).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("epoch-0002.ckpt.json"));

        store.save(&checkpoint(&config, 3, 0.45)).unwrap();
        assert_eq!(store.list(config.trial_id).unwrap().len(), 2);
    }

    #[test]
    fn test_promote_never_regresses_and_breaks_ties_by_index() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();
        let a = trial_config(0);
        let b = trial_config(1);

        let b1 = store.save(&checkpoint(&b, 1, 0.6)).unwrap();
        assert!(store.promote(&b1).unwrap());
        let a1 = store.save(&checkpoint(&a, 1, 0.5)).unwrap();
        assert!(!store.promote(&a1).unwrap());
        let a2 = store.save(&checkpoint(&a, 2, 0.6)).unwrap();
        assert!(store.promote(&a2).unwrap());

        let current = store.current().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.checkpoint.trial_id, a.trial_id);
        // b1 is still trial b's best checkpoint
        assert!(dir.path().join(&b1.path).exists());
    }

    #[test]
    fn test_open_reloads_pointer() {
        let dir = TempDir::new().unwrap();
        let config = trial_config(0);
        let ckpt = checkpoint(&config, 1, 0.9);
        {
            let store = CheckpointStore::create(dir.path()).unwrap();
            let saved = store.save(&ckpt).unwrap();
            store.promote(&saved).unwrap();
            store.write_trial_config(&config).unwrap();
        }
        let reopened = CheckpointStore::open(dir.path()).unwrap();
        assert_eq!(reopened.current().unwrap().version, 1);
        assert_eq!(reopened.load_promoted().unwrap(), Some(ckpt));
        assert!(reopened.trial_dir(config.trial_id).join("config.json").is_file());
    }

    #[test]
    fn test_empty_store_has_nothing_promoted() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::create(dir.path()).unwrap();
        assert!(store.current().is_none());
        assert!(store.load_promoted().unwrap().is_none());
        assert!(CheckpointStore::open(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_concurrent_promotions_keep_the_maximum() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CheckpointStore::create(dir.path()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let config = trial_config(i);
                    for epoch in 1..=5 {
                        let metric = ((i * 7 + epoch * 3) % 11) as f64 / 10.0;
                        let saved = store.save(&checkpoint(&config, epoch, metric)).unwrap();
                        store.promote(&saved).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let best = store.current().unwrap();
        assert_eq!(best.checkpoint.metric, 1.0);
        assert!(store.load(&best.checkpoint).is_ok());
    }

    proptest! {
        #[test]
        fn promoted_metrics_are_non_decreasing(
            metrics in prop::collection::vec(0.0f64..1.0, 1..20),
        ) {
            let dir = TempDir::new().unwrap();
            let store = CheckpointStore::create(dir.path()).unwrap();
            let config = trial_config(0);
            let mut seen = Vec::new();
            for (epoch, metric) in metrics.iter().enumerate() {
                let saved = store.save(&checkpoint(&config, epoch + 1, *metric)).unwrap();
                store.promote(&saved).unwrap();
                seen.push(store.current().unwrap().checkpoint.metric);
            }
            prop_assert!(seen.windows(2).all(|w| w[0] <= w[1]));
            let max = metrics.iter().copied().fold(f64::MIN, f64::max);
            prop_assert_eq!(*seen.last().unwrap(), max);
        }
    }
}
