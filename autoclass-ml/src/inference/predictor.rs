//! Inference over the promoted best checkpoint.

use crate::data::{Dataset, DatasetView, ImageLoader};
use crate::error::{AutoClassError, Result};
use crate::model::ops::{argmax, softmax};
use crate::model::{ArchitectureRegistry, Classifier};
use crate::search::TrialConfig;
use crate::training::checkpoint::{Checkpoint, CheckpointStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One prediction row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    /// Softmax probability of `class`, in [0, 1].
    pub score: f64,
    pub id: usize,
}

/// What to predict on.
#[derive(Debug, Clone)]
pub enum PredictInput {
    Single(PathBuf),
    Batch(Vec<PathBuf>),
    View(DatasetView),
}

impl PredictInput {
    fn paths(&self) -> Vec<PathBuf> {
        match self {
            PredictInput::Single(path) => vec![path.clone()],
            PredictInput::Batch(paths) => paths.clone(),
            PredictInput::View(view) => view.paths(),
        }
    }
}

impl From<&Path> for PredictInput {
    fn from(path: &Path) -> Self {
        PredictInput::Single(path.to_path_buf())
    }
}

impl From<PathBuf> for PredictInput {
    fn from(path: PathBuf) -> Self {
        PredictInput::Single(path)
    }
}

impl From<Vec<PathBuf>> for PredictInput {
    fn from(paths: Vec<PathBuf>) -> Self {
        PredictInput::Batch(paths)
    }
}

impl From<DatasetView> for PredictInput {
    fn from(view: DatasetView) -> Self {
        PredictInput::View(view)
    }
}

/// Accuracy of the model over a labelled dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Samples whose label is a known class.
    pub known: usize,
    /// Samples tagged unknown; excluded from accuracy.
    pub unknown: usize,
    pub correct: usize,
    pub accuracy: f64,
}

/// Read-only copy of the promoted model plus the loader that feeds it.
pub struct Predictor {
    model: Box<dyn Classifier>,
    classes: Vec<String>,
    trial: TrialConfig,
    loader: Arc<dyn ImageLoader>,
}

impl Predictor {
    /// Load the store's promoted checkpoint.
    pub fn from_store(
        store: &CheckpointStore,
        registry: &ArchitectureRegistry,
        loader: Arc<dyn ImageLoader>,
    ) -> Result<Self> {
        let checkpoint = store.load_promoted()?.ok_or(AutoClassError::ModelNotFitted)?;
        Self::from_checkpoint(checkpoint, registry, loader)
    }

    pub fn from_checkpoint(
        checkpoint: Checkpoint,
        registry: &ArchitectureRegistry,
        loader: Arc<dyn ImageLoader>,
    ) -> Result<Self> {
        let model = registry.restore(&checkpoint.model)?;
        if model.input_dim() != loader.feature_dim() {
            return Err(AutoClassError::invalid_input(format!(
                "model expects {} features but the loader produces {}",
                model.input_dim(),
                loader.feature_dim()
            )));
        }
        if model.num_classes() != checkpoint.classes.len() {
            return Err(AutoClassError::checkpoint(format!(
                "model has {} outputs for {} classes",
                model.num_classes(),
                checkpoint.classes.len()
            )));
        }
        tracing::debug!(
            trial = %checkpoint.trial.trial_id,
            architecture = %checkpoint.trial.architecture,
            epoch = checkpoint.epoch,
            "Loaded predictor"
        );
        Ok(Self {
            model,
            classes: checkpoint.classes,
            trial: checkpoint.trial,
            loader,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Configuration of the trial that produced the model.
    pub fn trial(&self) -> &TrialConfig {
        &self.trial
    }

    /// One row per input, in input order.
    pub fn predict(&self, input: &PredictInput) -> Result<Vec<Prediction>> {
        input
            .paths()
            .iter()
            .map(|path| self.predict_features(&self.loader.load(path)?))
            .collect()
    }

    /// Full class probability vector for one image.
    pub fn predict_proba(&self, path: &Path) -> Result<Vec<f64>> {
        let features = self.loader.load(path)?;
        Ok(self
            .probabilities(&features)?
            .into_iter()
            .map(f64::from)
            .collect())
    }

    pub fn predict_features(&self, features: &[f32]) -> Result<Prediction> {
        let probs = self.probabilities(features)?;
        let id = argmax(&probs);
        Ok(Prediction {
            class: self.classes[id].clone(),
            score: f64::from(probs[id]),
            id,
        })
    }

    /// Softmax of the model output; a non-finite entry means the stored
    /// parameters are unusable.
    fn probabilities(&self, features: &[f32]) -> Result<Vec<f32>> {
        let probs = softmax(&self.model.forward(features));
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(AutoClassError::checkpoint(format!(
                "{} model produced non-finite probabilities",
                self.model.architecture()
            )));
        }
        Ok(probs)
    }

    /// Top-1 accuracy over samples with a known class.
    pub fn evaluate(&self, dataset: &Dataset) -> Result<Evaluation> {
        let (mut known, mut unknown, mut correct) = (0, 0, 0);
        for sample in dataset.samples() {
            let Some(truth) = sample
                .class_id
                .and_then(|id| dataset.label(id))
                .and_then(|label| self.classes.iter().position(|c| c == label))
            else {
                unknown += 1;
                continue;
            };
            known += 1;
            if self.predict_features(&self.loader.load(&sample.path)?)?.id == truth {
                correct += 1;
            }
        }
        let accuracy = if known > 0 {
            correct as f64 / known as f64
        } else {
            0.0
        };
        Ok(Evaluation {
            known,
            unknown,
            correct,
            accuracy,
        })
    }
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("architecture", &self.model.architecture())
            .field("classes", &self.classes)
            .finish()
    }
}
