//! Configuration for a fit run.
//!
//! [`FitConfig`] enumerates every recognized option with its default. It is
//! validated once via [`FitConfig::validate`] before any trial is built, so
//! downstream code can rely on the invariants documented on each field.
//!
//! Configuration is layered by [`load_config`]:
//! 1. Explicit overrides (CLI flags)
//! 2. Environment variables (prefixed with `AUTOCLASS_`)
//! 3. An explicit config file
//! 4. Workspace-local config (`.autoclass/config.toml`)
//! 5. User config (`~/.config/autoclass/config.toml`)
//! 6. Built-in defaults

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest number of values a grid search may enumerate along the batch-size
/// axis.
pub const MAX_GRID_AXIS: usize = 4096;

/// How trial configurations are generated from the search space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Deterministic enumeration of the cartesian product of discrete values.
    Grid,
    /// Seeded pseudorandom sampling from each domain.
    #[default]
    Random,
}

impl std::fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchStrategy::Grid => write!(f, "grid"),
            SearchStrategy::Random => write!(f, "random"),
        }
    }
}

impl std::str::FromStr for SearchStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grid" | "list" => Ok(SearchStrategy::Grid),
            "random" => Ok(SearchStrategy::Random),
            other => Err(ConfigError::invalid(
                "search_strategy",
                format!("unknown strategy '{other}' (expected grid or random)"),
            )),
        }
    }
}

/// Domain of a floating-point hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FloatParam {
    Fixed { value: f64 },
    Choice { values: Vec<f64> },
    Uniform { min: f64, max: f64 },
    LogUniform { min: f64, max: f64 },
}

impl FloatParam {
    /// Discrete values of this domain, or `None` for continuous ranges.
    pub fn discrete_values(&self) -> Option<Vec<f64>> {
        match self {
            FloatParam::Fixed { value } => Some(vec![*value]),
            FloatParam::Choice { values } => Some(values.clone()),
            FloatParam::Uniform { .. } | FloatParam::LogUniform { .. } => None,
        }
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        match self {
            FloatParam::Fixed { value } if !positive(*value) => Err(ConfigError::invalid(
                field,
                format!("{value} must be a positive finite number"),
            )),
            FloatParam::Choice { values } if values.is_empty() => {
                Err(ConfigError::invalid(field, "choice list is empty"))
            }
            FloatParam::Choice { values } => match values.iter().find(|v| !positive(**v)) {
                Some(bad) => Err(ConfigError::invalid(
                    field,
                    format!("{bad} must be a positive finite number"),
                )),
                None => Ok(()),
            },
            FloatParam::Uniform { min, max } | FloatParam::LogUniform { min, max } => {
                if !positive(*min) || !positive(*max) {
                    Err(ConfigError::invalid(
                        field,
                        "range bounds must be positive finite numbers",
                    ))
                } else if min > max {
                    Err(ConfigError::invalid(
                        field,
                        format!("range min {min} exceeds max {max}"),
                    ))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

/// Domain of an integer hyperparameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntParam {
    Fixed { value: usize },
    Choice { values: Vec<usize> },
    Range { min: usize, max: usize },
}

impl IntParam {
    /// Number of values in the domain, without enumerating it.
    pub fn cardinality(&self) -> usize {
        match self {
            IntParam::Fixed { .. } => 1,
            IntParam::Choice { values } => values.len(),
            IntParam::Range { min, max } => max.saturating_sub(*min).saturating_add(1),
        }
    }

    /// Every value of the domain in declaration (or ascending) order.
    ///
    /// Allocates one entry per value; check [`cardinality`](Self::cardinality)
    /// before calling this on a range.
    pub fn values(&self) -> Vec<usize> {
        match self {
            IntParam::Fixed { value } => vec![*value],
            IntParam::Choice { values } => values.clone(),
            IntParam::Range { min, max } => (*min..=*max).collect(),
        }
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        match self {
            IntParam::Fixed { value: 0 } => Err(ConfigError::invalid(field, "must be at least 1")),
            IntParam::Choice { values } if values.is_empty() => {
                Err(ConfigError::invalid(field, "choice list is empty"))
            }
            IntParam::Choice { values } if values.contains(&0) => {
                Err(ConfigError::invalid(field, "choices must be at least 1"))
            }
            IntParam::Range { min, max } if *min == 0 || min > max => Err(ConfigError::invalid(
                field,
                format!("invalid range {min}..={max}"),
            )),
            _ => Ok(()),
        }
    }
}

/// Learning-rate policy applied across epochs of one trial.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LrSchedule {
    #[default]
    Constant,
    /// Multiply the rate by `factor` every `every` epochs.
    Step { factor: f64, every: usize },
    /// Cosine-anneal from the base rate down to `min_lr` at the last epoch.
    Cosine { min_lr: f64 },
}

impl LrSchedule {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            LrSchedule::Constant => Ok(()),
            LrSchedule::Step { factor, every } => {
                if !(factor.is_finite() && *factor > 0.0 && *factor <= 1.0) {
                    Err(ConfigError::invalid("lr_schedule", "step factor must be in (0, 1]"))
                } else if *every == 0 {
                    Err(ConfigError::invalid("lr_schedule", "step interval must be at least 1"))
                } else {
                    Ok(())
                }
            }
            LrSchedule::Cosine { min_lr } if !(min_lr.is_finite() && *min_lr >= 0.0) => Err(
                ConfigError::invalid("lr_schedule", "cosine min_lr must be non-negative"),
            ),
            LrSchedule::Cosine { .. } => Ok(()),
        }
    }
}

/// Every option recognized by a fit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    /// Candidate architecture names, resolved against the architecture registry.
    #[serde(default = "default_architectures")]
    pub architectures: Vec<String>,
    /// Learning-rate domain.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: FloatParam,
    /// Mini-batch size domain.
    #[serde(default = "default_batch_size")]
    pub batch_size: IntParam,
    /// Maximum epochs per trial.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Global wall-clock budget for the whole search, in seconds.
    #[serde(default = "default_time_limit")]
    pub time_limit_secs: f64,
    /// Requested number of trials. Every listed architecture still gets one.
    #[serde(default = "default_num_trials")]
    pub num_trials: usize,
    #[serde(default)]
    pub search_strategy: SearchStrategy,
    /// Base seed for splits, sampling and weight initialization.
    #[serde(default)]
    pub seed: u64,
    /// Accelerators assigned to each trial.
    #[serde(default)]
    pub ngpus_per_trial: usize,
    /// Worker threads assigned to each trial.
    #[serde(default = "default_threads_per_trial")]
    pub nthreads_per_trial: usize,
    /// Accelerators available to the whole run.
    #[serde(default)]
    pub total_gpus: usize,
    /// Upper bound on concurrently running trials.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_trials: usize,
    /// Fraction of the training set held out for validation, in (0, 1).
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
    /// Split per class rather than over the whole dataset.
    #[serde(default = "default_true")]
    pub stratified_split: bool,
    #[serde(default)]
    pub lr_schedule: LrSchedule,
    /// Epochs of linear learning-rate warmup.
    #[serde(default)]
    pub warmup_epochs: usize,
    /// Stop a trial after this many epochs without improvement (0 disables).
    #[serde(default)]
    pub early_stopping_patience: usize,
    /// L2 penalty applied on each optimizer step.
    #[serde(default)]
    pub weight_decay: f64,
    /// Hidden width for architectures that have one.
    #[serde(default = "default_hidden_units")]
    pub hidden_units: usize,
    /// Images are resized to `image_size` x `image_size` before training.
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    /// Directory under which each run gets its own subdirectory.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Where downloaded dataset archives are cached. Platform cache dir if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            architectures: default_architectures(),
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            epochs: default_epochs(),
            time_limit_secs: default_time_limit(),
            num_trials: default_num_trials(),
            search_strategy: SearchStrategy::default(),
            seed: 0,
            ngpus_per_trial: 0,
            nthreads_per_trial: default_threads_per_trial(),
            total_gpus: 0,
            max_concurrent_trials: default_max_concurrent(),
            validation_fraction: default_validation_fraction(),
            stratified_split: true,
            lr_schedule: LrSchedule::default(),
            warmup_epochs: 0,
            early_stopping_patience: 0,
            weight_decay: 0.0,
            hidden_units: default_hidden_units(),
            image_size: default_image_size(),
            output_dir: default_output_dir(),
            cache_dir: None,
        }
    }
}

fn default_architectures() -> Vec<String> {
    vec!["mlp".to_string()]
}

fn default_learning_rate() -> FloatParam {
    FloatParam::Choice {
        values: vec![0.01, 0.05, 0.1],
    }
}

fn default_batch_size() -> IntParam {
    IntParam::Choice {
        values: vec![16, 32, 64],
    }
}

fn default_epochs() -> usize {
    10
}

fn default_time_limit() -> f64 {
    600.0
}

fn default_num_trials() -> usize {
    1
}

fn default_threads_per_trial() -> usize {
    1
}

fn default_max_concurrent() -> usize {
    1
}

fn default_validation_fraction() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

fn default_hidden_units() -> usize {
    64
}

fn default_image_size() -> u32 {
    32
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("autoclass_runs")
}

impl FitConfig {
    /// Check every option once. Called before any trial is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.architectures.is_empty() {
            return Err(ConfigError::invalid(
                "architectures",
                "at least one architecture is required",
            ));
        }
        for (i, name) in self.architectures.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("architectures", "empty architecture name"));
            }
            if self.architectures[..i].contains(name) {
                return Err(ConfigError::invalid(
                    "architectures",
                    format!("'{name}' is listed twice"),
                ));
            }
        }

        self.learning_rate.validate("learning_rate")?;
        self.batch_size.validate("batch_size")?;
        self.lr_schedule.validate()?;

        if self.search_strategy == SearchStrategy::Grid {
            if self.learning_rate.discrete_values().is_none() {
                return Err(ConfigError::invalid(
                    "learning_rate",
                    "grid search needs a fixed value or a choice list",
                ));
            }
            let n = self.batch_size.cardinality();
            if n > MAX_GRID_AXIS {
                return Err(ConfigError::invalid(
                    "batch_size",
                    format!("grid axis has {n} values, at most {MAX_GRID_AXIS} allowed"),
                ));
            }
        }
        if self.epochs == 0 {
            return Err(ConfigError::invalid("epochs", "must be at least 1"));
        }
        if !(self.time_limit_secs.is_finite() && self.time_limit_secs > 0.0) {
            return Err(ConfigError::invalid(
                "time_limit_secs",
                "must be a positive number of seconds",
            ));
        }
        if Duration::try_from_secs_f64(self.time_limit_secs).is_err() {
            return Err(ConfigError::invalid(
                "time_limit_secs",
                format!("{} seconds is not a representable duration", self.time_limit_secs),
            ));
        }
        if self.num_trials == 0 {
            return Err(ConfigError::invalid("num_trials", "must be at least 1"));
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(ConfigError::invalid(
                "validation_fraction",
                format!("{} is not in (0, 1)", self.validation_fraction),
            ));
        }
        if self.nthreads_per_trial == 0 {
            return Err(ConfigError::invalid("nthreads_per_trial", "must be at least 1"));
        }
        if self.max_concurrent_trials == 0 {
            return Err(ConfigError::invalid(
                "max_concurrent_trials",
                "must be at least 1",
            ));
        }
        if self.ngpus_per_trial > self.total_gpus {
            return Err(ConfigError::invalid(
                "ngpus_per_trial",
                format!(
                    "{} accelerators requested per trial but only {} available",
                    self.ngpus_per_trial, self.total_gpus
                ),
            ));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(ConfigError::invalid("weight_decay", "must be non-negative"));
        }
        if self.hidden_units == 0 {
            return Err(ConfigError::invalid("hidden_units", "must be at least 1"));
        }
        if self.image_size == 0 || self.image_size > 1024 {
            return Err(ConfigError::invalid("image_size", "must be in 1..=1024"));
        }
        Ok(())
    }

    /// The global search budget. Saturates for values `validate` rejects.
    pub fn time_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_limit_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Dataset cache directory, falling back to the platform cache dir.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "autoclass", "autoclass")
            .map(|d| d.cache_dir().join("datasets"))
            .unwrap_or_else(|| PathBuf::from(".autoclass").join("cache"))
    }
}

/// Partial configuration used to override individual options.
///
/// Unset fields are skipped during serialization so they never shadow
/// lower-priority layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architectures: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<FloatParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<IntParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epochs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_trials: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_strategy: Option<SearchStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ngpus_per_trial: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_gpus: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_trials: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

/// Workspace-local config path: `<workspace>/.autoclass/config.toml`.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".autoclass").join("config.toml")
}

/// Load configuration from layered sources and validate the result.
pub fn load_config(
    workspace: Option<&Path>,
    file: Option<&Path>,
    overrides: Option<&FitOverrides>,
) -> Result<FitConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(FitConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "autoclass", "autoclass") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // AUTOCLASS_EPOCHS, AUTOCLASS_SEARCH_STRATEGY, ...
    figment = figment.merge(Env::prefixed("AUTOCLASS_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: FitConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    tracing::debug!(
        strategy = %config.search_strategy,
        architectures = ?config.architectures,
        num_trials = config.num_trials,
        "Loaded fit configuration"
    );
    Ok(config)
}

/// Write a configuration as TOML, e.g. to seed `.autoclass/config.toml`.
pub fn save_config(path: &Path, config: &FitConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    crate::persistence::atomic_write(path, content.as_bytes())?;
    Ok(())
}
