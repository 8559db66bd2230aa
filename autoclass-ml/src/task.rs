//! `ImageClassifier`: fit a search over a dataset, then predict.

use crate::data::{
    Dataset, DatasetFetcher, DatasetSource, FeatureTable, ImageDecoder, ImageFolder, ImageLoader,
};
use crate::error::{AutoClassError, Result};
use crate::inference::{Evaluation, PredictInput, Prediction, Predictor};
use crate::model::ArchitectureRegistry;
use crate::search::SearchSpace;
use crate::summary::{FitSummary, LoggingObserver, TrainingObserver, summarize};
use crate::training::{
    CheckpointStore, ResourcePlan, TrialData, TrialExecutor, TrialScheduler, select_best,
};
use autoclass_core::FitConfig;
use autoclass_core::persistence::{atomic_write_json, load_json};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const FIT_CONFIG_FILE: &str = "fit_config.json";
const SUMMARY_FILE: &str = "summary.json";

/// Trained-state object for image classification.
///
/// ```no_run
/// # async fn demo() -> autoclass_ml::Result<()> {
/// use autoclass_ml::{DatasetSource, ImageClassifier, PredictInput};
///
/// let mut classifier = ImageClassifier::new(Default::default())?;
/// let summary = classifier.fit(&DatasetSource::parse("data/shopee")).await?;
/// println!("best validation accuracy: {:?}", summary.valid_acc);
/// let image = PredictInput::Single("data/shopee/test/BabyPants/1.jpg".into());
/// let rows = classifier.predict(&image)?;
/// # Ok(())
/// # }
/// ```
pub struct ImageClassifier {
    config: FitConfig,
    registry: ArchitectureRegistry,
    loader: Arc<dyn ImageLoader>,
    observer: Arc<dyn TrainingObserver>,
    cancel: CancellationToken,
    summary: Option<FitSummary>,
    predictor: Option<Predictor>,
    run_dir: Option<PathBuf>,
}

impl ImageClassifier {
    /// Validate `config` and set up the reference loader and architectures.
    pub fn new(config: FitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            loader: Arc::new(ImageDecoder::new(config.image_size)),
            config,
            registry: ArchitectureRegistry::with_builtin(),
            observer: Arc::new(LoggingObserver),
            cancel: CancellationToken::new(),
            summary: None,
            predictor: None,
            run_dir: None,
        })
    }

    pub fn with_registry(mut self, registry: ArchitectureRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ImageLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TrainingObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token that stops a running fit at the next epoch boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Resolve `source`, load its class folders and run the search.
    pub async fn fit(&mut self, source: &DatasetSource) -> Result<&FitSummary> {
        self.registry.check_all(&self.config.architectures)?;
        let fetcher = DatasetFetcher::new(self.config.resolved_cache_dir());
        let root = fetcher.resolve(source).await?;
        let splits = ImageFolder::load(&root)?;
        self.fit_dataset(splits.train).await
    }

    /// Run the search over an already loaded dataset.
    ///
    /// If no trial produces a checkpoint the summary is still kept for
    /// [`fit_summary`](Self::fit_summary) before the error is returned.
    pub async fn fit_dataset(&mut self, dataset: Arc<Dataset>) -> Result<&FitSummary> {
        self.registry.check_all(&self.config.architectures)?;
        self.summary = None;
        self.predictor = None;

        let (train, validation) = dataset.split(
            self.config.validation_fraction,
            self.config.seed,
            self.config.stratified_split,
        )?;
        tracing::info!(
            classes = dataset.num_classes(),
            train = train.len(),
            validation = validation.len(),
            "Split dataset"
        );

        let loader = Arc::clone(&self.loader);
        let decode_set = Arc::clone(&dataset);
        let features =
            tokio::task::spawn_blocking(move || FeatureTable::build(&decode_set, loader.as_ref()))
                .await
                .map_err(|e| {
                    AutoClassError::data_format(format!("feature decoding task failed: {e}"))
                })??;
        let data = Arc::new(TrialData::new(train, validation, Arc::new(features))?);

        let run_id = Uuid::new_v4();
        let run_dir = create_run_dir(&self.config.output_dir, run_id)?;
        atomic_write_json(&run_dir.join(FIT_CONFIG_FILE), &self.config)?;
        self.run_dir = Some(run_dir.clone());

        let store = Arc::new(CheckpointStore::create(&run_dir)?);
        let executor = TrialExecutor::new(
            self.registry.clone(),
            Arc::clone(&store),
            Arc::clone(&self.observer),
            self.cancel.clone(),
        );
        let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
        let plan = ResourcePlan::from_config(&self.config, threads);
        tracing::info!(
            run = %run_id,
            run_dir = %run_dir.display(),
            parallel = plan.parallel_trials,
            strategy = %self.config.search_strategy,
            "Starting search"
        );
        let scheduler = TrialScheduler::new(Arc::new(executor), plan, self.cancel.clone());

        let space = SearchSpace::from_config(&self.config)?;
        let report = scheduler
            .run_trials(space.configs(), data, self.config.time_limit())
            .await;
        let best = select_best(&report.trials);
        let summary = summarize(&report.trials, best, report.elapsed, run_id);
        atomic_write_json(&run_dir.join(SUMMARY_FILE), &summary)?;

        if best.is_none() {
            let err = AutoClassError::NoTrialCompleted {
                attempted: report.trials.len(),
                failed: report.failed(),
            };
            tracing::warn!(run = %run_id, error = %err, "Search ended without a checkpoint");
            self.summary = Some(summary);
            return Err(err);
        }

        self.predictor = Some(Predictor::from_store(
            &store,
            &self.registry,
            Arc::clone(&self.loader),
        )?);
        tracing::info!(
            run = %run_id,
            valid_acc = ?summary.valid_acc,
            architecture = ?summary.best_config.as_ref().map(|c| c.architecture.as_str()),
            "Fit finished"
        );
        Ok(&*self.summary.insert(summary))
    }

    /// Reopen a finished run directory for inference.
    pub fn load(run_dir: &Path) -> Result<Self> {
        let config: FitConfig = load_json(&run_dir.join(FIT_CONFIG_FILE))?.ok_or_else(|| {
            AutoClassError::checkpoint(format!("{} has no {FIT_CONFIG_FILE}", run_dir.display()))
        })?;
        let mut classifier = Self::new(config)?;
        classifier.summary = Self::read_summary(run_dir)?;
        let store = CheckpointStore::open(run_dir)?;
        classifier.predictor = Some(Predictor::from_store(
            &store,
            &classifier.registry,
            Arc::clone(&classifier.loader),
        )?);
        classifier.run_dir = Some(run_dir.to_path_buf());
        Ok(classifier)
    }

    /// Read a run's `summary.json`, fitted or not.
    pub fn read_summary(run_dir: &Path) -> Result<Option<FitSummary>> {
        Ok(load_json(&run_dir.join(SUMMARY_FILE))?)
    }

    pub fn fit_summary(&self) -> Option<&FitSummary> {
        self.summary.as_ref()
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    pub fn classes(&self) -> Option<&[String]> {
        self.predictor.as_ref().map(|p| p.classes())
    }

    fn predictor(&self) -> Result<&Predictor> {
        self.predictor.as_ref().ok_or(AutoClassError::ModelNotFitted)
    }

    pub fn predict(&self, input: &PredictInput) -> Result<Vec<Prediction>> {
        self.predictor()?.predict(input)
    }

    pub fn predict_proba(&self, path: &Path) -> Result<Vec<f64>> {
        self.predictor()?.predict_proba(path)
    }

    pub fn evaluate(&self, dataset: &Dataset) -> Result<Evaluation> {
        self.predictor()?.evaluate(dataset)
    }
}

impl std::fmt::Debug for ImageClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageClassifier")
            .field("architectures", &self.config.architectures)
            .field("run_dir", &self.run_dir)
            .field("fitted", &self.predictor.is_some())
            .finish()
    }
}

/// `output_dir/run-<UTC timestamp>-<uuid8>`, created exclusively.
fn create_run_dir(output_dir: &Path, run_id: Uuid) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let simple = run_id.simple().to_string();
    let name = format!("run-{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), &simple[..8]);
    let dir = output_dir.join(name);
    std::fs::create_dir(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = FitConfig {
            epochs: 0,
            ..FitConfig::default()
        };
        assert!(matches!(ImageClassifier::new(config), Err(AutoClassError::Config(_))));
    }

    #[test]
    fn test_predict_before_fit_is_not_fitted() {
        let classifier = ImageClassifier::new(FitConfig::default()).unwrap();
        let err = classifier
            .predict(&PredictInput::Single("x.png".into()))
            .unwrap_err();
        assert!(matches!(err, AutoClassError::ModelNotFitted));
        assert!(classifier.fit_summary().is_none());
    }

    #[test]
    fn test_run_dirs_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let a = create_run_dir(dir.path(), Uuid::new_v4()).unwrap();
        let b = create_run_dir(dir.path(), Uuid::new_v4()).unwrap();
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("run-"));
        assert_eq!(name.len(), "run-20260101T000000-abcdef01".len());
    }

    #[tokio::test]
    async fn test_fit_rejects_unknown_architecture_early() {
        let config = FitConfig {
            architectures: vec!["resnet50_v1b".into()],
            ..FitConfig::default()
        };
        let mut classifier = ImageClassifier::new(config).unwrap();
        let err = classifier
            .fit(&DatasetSource::parse("/nonexistent"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutoClassError::UnknownArchitecture(_)));
    }

    #[test]
    fn test_load_missing_run() {
        let dir = TempDir::new().unwrap();
        assert!(ImageClassifier::load(dir.path()).is_err());
    }
}
