//! Trial configuration space: grid enumeration and seeded random sampling.

use crate::error::Result;
use autoclass_core::{FitConfig, FloatParam, IntParam, LrSchedule, SearchStrategy};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything one trial needs to train, fixed at assignment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    pub trial_index: usize,
    pub trial_id: Uuid,
    pub architecture: String,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Accelerators reserved for this trial.
    pub ngpus: usize,
    pub nthreads: usize,
    pub seed: u64,
    pub lr_schedule: LrSchedule,
    pub warmup_epochs: usize,
    pub early_stopping_patience: usize,
    pub weight_decay: f64,
    pub hidden_units: usize,
    pub assigned_at: DateTime<Utc>,
}

/// The candidate architectures and hyperparameter domains of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    architectures: Vec<String>,
    learning_rate: FloatParam,
    batch_size: IntParam,
    strategy: SearchStrategy,
    num_trials: usize,
    base_seed: u64,
    template: TrialTemplate,
}

/// Per-trial settings that are copied, not searched.
#[derive(Debug, Clone, PartialEq)]
struct TrialTemplate {
    epochs: usize,
    ngpus: usize,
    nthreads: usize,
    lr_schedule: LrSchedule,
    warmup_epochs: usize,
    early_stopping_patience: usize,
    weight_decay: f64,
    hidden_units: usize,
}

impl SearchSpace {
    /// Derive the space from a configuration, validating it first.
    pub fn from_config(config: &FitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            architectures: config.architectures.clone(),
            learning_rate: config.learning_rate.clone(),
            batch_size: config.batch_size.clone(),
            strategy: config.search_strategy,
            num_trials: config.num_trials,
            base_seed: config.seed,
            template: TrialTemplate {
                epochs: config.epochs,
                ngpus: config.ngpus_per_trial,
                nthreads: config.nthreads_per_trial,
                lr_schedule: config.lr_schedule.clone(),
                warmup_epochs: config.warmup_epochs,
                early_stopping_patience: config.early_stopping_patience,
                weight_decay: config.weight_decay,
                hidden_units: config.hidden_units,
            },
        })
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    pub fn architectures(&self) -> &[String] {
        &self.architectures
    }

    /// Number of distinct grid points, or `None` for continuous domains.
    pub fn grid_size(&self) -> Option<usize> {
        let lrs = self.learning_rate.discrete_values()?.len();
        Some(
            self.architectures
                .len()
                .saturating_mul(self.batch_size.cardinality())
                .saturating_mul(lrs),
        )
    }

    /// How many configurations the space emits.
    ///
    /// At least one per declared architecture, and at least `num_trials`;
    /// grid search never repeats a grid point.
    pub fn trial_count(&self) -> usize {
        let wanted = self.num_trials.max(self.architectures.len());
        match self.strategy {
            SearchStrategy::Grid => self.grid_size().map_or(wanted, |n| wanted.min(n)),
            SearchStrategy::Random => wanted,
        }
    }

    /// Lazily yield trial configurations in trial-index order.
    pub fn configs(&self) -> TrialConfigs<'_> {
        // Random search samples ranges directly; only the grid walks them.
        let grid = self.strategy == SearchStrategy::Grid;
        TrialConfigs {
            space: self,
            next_index: 0,
            total: self.trial_count(),
            rng: StdRng::seed_from_u64(self.base_seed),
            batch_sizes: grid.then(|| self.batch_size.values()).unwrap_or_default(),
            learning_rates: self.learning_rate.discrete_values().unwrap_or_default(),
        }
    }

    fn build(
        &self,
        trial_index: usize,
        architecture: &str,
        learning_rate: f64,
        batch_size: usize,
    ) -> TrialConfig {
        let t = &self.template;
        TrialConfig {
            trial_index,
            trial_id: Uuid::new_v4(),
            architecture: architecture.to_string(),
            learning_rate,
            batch_size,
            epochs: t.epochs,
            ngpus: t.ngpus,
            nthreads: t.nthreads,
            seed: self.base_seed.wrapping_add(trial_index as u64),
            lr_schedule: t.lr_schedule.clone(),
            warmup_epochs: t.warmup_epochs,
            early_stopping_patience: t.early_stopping_patience,
            weight_decay: t.weight_decay,
            hidden_units: t.hidden_units,
            assigned_at: Utc::now(),
        }
    }
}

/// Finite iterator over a [`SearchSpace`].
pub struct TrialConfigs<'a> {
    space: &'a SearchSpace,
    next_index: usize,
    total: usize,
    rng: StdRng,
    batch_sizes: Vec<usize>,
    learning_rates: Vec<f64>,
}

impl Iterator for TrialConfigs<'_> {
    type Item = TrialConfig;

    fn next(&mut self) -> Option<TrialConfig> {
        if self.next_index >= self.total {
            return None;
        }
        let i = self.next_index;
        self.next_index += 1;
        let space = self.space;
        let n_arch = space.architectures.len();

        let config = match space.strategy {
            SearchStrategy::Grid => {
                // Architecture varies fastest, then batch size, then learning rate.
                let n_bs = self.batch_sizes.len();
                let arch = &space.architectures[i % n_arch];
                let bs = self.batch_sizes[(i / n_arch) % n_bs];
                let lr = self.learning_rates[(i / (n_arch * n_bs)) % self.learning_rates.len()];
                space.build(i, arch, lr, bs)
            }
            SearchStrategy::Random => {
                let arch = &space.architectures[i % n_arch];
                let lr = sample_float(&space.learning_rate, &mut self.rng);
                let bs = sample_int(&space.batch_size, &mut self.rng);
                space.build(i, arch, lr, bs)
            }
        };
        Some(config)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next_index;
        (left, Some(left))
    }
}

impl ExactSizeIterator for TrialConfigs<'_> {}

/// Draw one value from a float domain.
pub fn sample_float(param: &FloatParam, rng: &mut StdRng) -> f64 {
    match param {
        FloatParam::Fixed { value } => *value,
        FloatParam::Choice { values } => values.choose(rng).copied().unwrap_or(f64::NAN),
        FloatParam::Uniform { min, max } => {
            if min < max {
                rng.gen_range(*min..*max)
            } else {
                *min
            }
        }
        FloatParam::LogUniform { min, max } => {
            if min < max {
                rng.gen_range(min.ln()..max.ln()).exp()
            } else {
                *min
            }
        }
    }
}

/// Draw one value from an integer domain.
pub fn sample_int(param: &IntParam, rng: &mut StdRng) -> usize {
    match param {
        IntParam::Fixed { value } => *value,
        IntParam::Choice { values } => values.choose(rng).copied().unwrap_or(1),
        IntParam::Range { min, max } => rng.gen_range(*min..=*max),
    }
}
