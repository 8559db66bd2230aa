//! Trial scheduling under a global time budget.

use crate::error::{AutoClassError, Result};
use crate::search::TrialConfig;
use crate::training::executor::{TrialData, TrialExecutor};
use crate::training::trial::{TrialResult, TrialStatus};
use autoclass_core::FitConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How many trials may run at once and what each one reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePlan {
    pub parallel_trials: usize,
    pub gpus_per_trial: usize,
    pub threads_per_trial: usize,
}

impl ResourcePlan {
    /// Fit as many trials as the accelerators and `available_threads` allow,
    /// capped by `max_concurrent_trials` and never below one.
    pub fn from_config(config: &FitConfig, available_threads: usize) -> Self {
        let threads = config.nthreads_per_trial.max(1);
        let by_threads = (available_threads / threads).max(1);
        let by_gpus = config
            .total_gpus
            .checked_div(config.ngpus_per_trial)
            .unwrap_or(usize::MAX);
        let parallel_trials = config
            .max_concurrent_trials
            .min(by_threads)
            .min(by_gpus)
            .max(1);
        Self {
            parallel_trials,
            gpus_per_trial: config.ngpus_per_trial,
            threads_per_trial: threads,
        }
    }

    pub fn sequential() -> Self {
        Self {
            parallel_trials: 1,
            gpus_per_trial: 0,
            threads_per_trial: 1,
        }
    }
}

/// Every trial that ran, ordered by trial index.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub trials: Vec<TrialResult>,
    pub elapsed: Duration,
    /// Configurations never started because the budget ran out or the
    /// search was cancelled.
    pub not_started: usize,
}

impl SearchReport {
    pub fn best(&self) -> Option<&TrialResult> {
        select_best(&self.trials)
    }

    pub fn failed(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Failed)
            .count()
    }
}

/// A search that produced at least one checkpoint.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: TrialResult,
    pub trials: Vec<TrialResult>,
    pub elapsed: Duration,
}

/// The trial with the highest best validation accuracy among those holding
/// a checkpoint; the lower trial index wins ties.
pub fn select_best(trials: &[TrialResult]) -> Option<&TrialResult> {
    let mut best: Option<&TrialResult> = None;
    for trial in trials.iter().filter(|t| t.has_checkpoint()) {
        let Some(acc) = trial.best_val_acc else {
            continue;
        };
        let better = match best.and_then(|b| b.best_val_acc.map(|v| (v, b.trial_index()))) {
            None => true,
            Some((v, idx)) => acc > v || (acc == v && trial.trial_index() < idx),
        };
        if better {
            best = Some(trial);
        }
    }
    best
}

/// Budgets too large for the platform clock are capped to this horizon.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Issues trials to the blocking pool within the resource plan and budget.
pub struct TrialScheduler {
    executor: Arc<TrialExecutor>,
    plan: ResourcePlan,
    cancel: CancellationToken,
}

impl TrialScheduler {
    pub fn new(
        executor: Arc<TrialExecutor>,
        plan: ResourcePlan,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            plan,
            cancel,
        }
    }

    pub fn plan(&self) -> ResourcePlan {
        self.plan
    }

    /// Run trials until `configs` is exhausted, the budget is spent or the
    /// search is cancelled.
    ///
    /// No trial starts once the remaining budget is zero. In-flight trials
    /// share the global deadline and stop at their next epoch boundary.
    /// Panicking trials are recorded as failed.
    pub async fn run_trials<I>(
        &self,
        configs: I,
        data: Arc<TrialData>,
        budget: Duration,
    ) -> SearchReport
    where
        I: IntoIterator<Item = TrialConfig>,
        I::IntoIter: ExactSizeIterator,
    {
        let start = Instant::now();
        let deadline = deadline_after(start, budget);
        let mut configs = configs.into_iter();
        let mut set = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, TrialConfig> = HashMap::new();
        let mut trials = Vec::new();
        let mut issuing = true;

        loop {
            while issuing && set.len() < self.plan.parallel_trials {
                if self.cancel.is_cancelled() {
                    tracing::info!("Search cancelled; no further trials");
                    issuing = false;
                    break;
                }
                if Instant::now() >= deadline {
                    tracing::info!(
                        budget_secs = budget.as_secs_f64(),
                        "Time budget exhausted; no further trials"
                    );
                    issuing = false;
                    break;
                }
                let Some(config) = configs.next() else {
                    issuing = false;
                    break;
                };
                tracing::debug!(
                    trial = %config.trial_id,
                    index = config.trial_index,
                    remaining_secs =
                        deadline.saturating_duration_since(Instant::now()).as_secs_f64(),
                    "Issuing trial"
                );
                let executor = Arc::clone(&self.executor);
                let data = Arc::clone(&data);
                let task_config = config.clone();
                let handle =
                    set.spawn_blocking(move || executor.run(&task_config, &data, deadline));
                in_flight.insert(handle.id(), config);
            }

            let Some(joined) = set.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((id, result)) => {
                    in_flight.remove(&id);
                    trials.push(result);
                }
                Err(e) => {
                    let Some(config) = in_flight.remove(&e.id()) else {
                        tracing::error!(error = %e, "Lost track of a failed trial task");
                        continue;
                    };
                    tracing::error!(trial = %config.trial_id, error = %e, "Trial task panicked");
                    let mut result = TrialResult::new(config);
                    result.fail(format!("trial task aborted: {e}"), 0.0);
                    trials.push(result);
                }
            }
        }

        let not_started = configs.len();
        trials.sort_by_key(|t| t.trial_index());
        let elapsed = start.elapsed();
        tracing::info!(
            trials = trials.len(),
            not_started,
            elapsed_secs = elapsed.as_secs_f64(),
            "Search finished"
        );
        SearchReport {
            trials,
            elapsed,
            not_started,
        }
    }

    /// Like [`run_trials`](Self::run_trials), but fails when no trial
    /// produced a checkpoint.
    pub async fn search<I>(
        &self,
        configs: I,
        data: Arc<TrialData>,
        budget: Duration,
    ) -> Result<SearchOutcome>
    where
        I: IntoIterator<Item = TrialConfig>,
        I::IntoIter: ExactSizeIterator,
    {
        let report = self.run_trials(configs, data, budget).await;
        match report.best().cloned() {
            Some(best) => Ok(SearchOutcome {
                best,
                trials: report.trials,
                elapsed: report.elapsed,
            }),
            None => Err(AutoClassError::NoTrialCompleted {
                attempted: report.trials.len(),
                failed: report.failed(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArchitectureRegistry;
    use crate::search::SearchSpace;
    use crate::summary::events::NoopObserver;
    use crate::training::checkpoint::{CheckpointRef, CheckpointStore};
    use crate::training::executor::fixtures::toy_data;
    use crate::training::trial::fixtures::trial_config;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn scheduler(dir: &TempDir, parallel: usize, cancel: CancellationToken) -> TrialScheduler {
        let store = Arc::new(CheckpointStore::create(dir.path()).unwrap());
        let executor = TrialExecutor::new(
            ArchitectureRegistry::with_builtin(),
            store,
            Arc::new(NoopObserver),
            cancel.clone(),
        );
        let plan = ResourcePlan {
            parallel_trials: parallel,
            ..ResourcePlan::sequential()
        };
        TrialScheduler::new(Arc::new(executor), plan, cancel)
    }

    fn configs(n: usize) -> Vec<TrialConfig> {
        (0..n)
            .map(|i| {
                let mut c = trial_config(i);
                c.architecture = if i % 2 == 0 { "linear" } else { "mlp" }.into();
                c
            })
            .collect()
    }

    fn finished(index: usize, acc: Option<f64>) -> TrialResult {
        let mut t = TrialResult::new(trial_config(index));
        if let Some(acc) = acc {
            t.mark_best(
                1,
                acc,
                acc,
                CheckpointRef {
                    trial_id: t.config.trial_id,
                    trial_index: index,
                    epoch: 1,
                    metric: acc,
                    path: PathBuf::from("x"),
                    sha256: String::new(),
                },
            );
        }
        t.finish(TrialStatus::Completed, 0.0);
        t
    }

    #[test]
    fn test_select_best_breaks_ties_by_index() {
        let trials = vec![
            finished(0, Some(0.5)),
            finished(1, Some(0.8)),
            finished(2, Some(0.8)),
            finished(3, None),
        ];
        assert_eq!(select_best(&trials).unwrap().trial_index(), 1);
        assert!(select_best(&[finished(0, None)]).is_none());
    }

    #[test]
    fn test_select_best_considers_stopped_trials() {
        let mut limited = finished(1, Some(0.9));
        limited.status = TrialStatus::TimeLimited;
        let trials = vec![finished(0, Some(0.4)), limited];
        assert_eq!(select_best(&trials).unwrap().trial_index(), 1);
    }

    #[test]
    fn test_resource_plan() {
        let mut config = FitConfig {
            max_concurrent_trials: 8,
            nthreads_per_trial: 2,
            ..FitConfig::default()
        };
        assert_eq!(ResourcePlan::from_config(&config, 6).parallel_trials, 3);
        config.total_gpus = 4;
        config.ngpus_per_trial = 3;
        assert_eq!(ResourcePlan::from_config(&config, 64).parallel_trials, 1);
        config.max_concurrent_trials = 1;
        assert_eq!(ResourcePlan::from_config(&config, 1).parallel_trials, 1);
    }

    #[tokio::test]
    async fn test_runs_all_trials_in_index_order() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, 3, CancellationToken::new());
        let outcome = sched
            .search(configs(5), Arc::new(toy_data(6)), Duration::from_secs(600))
            .await
            .unwrap();
        let indices: Vec<usize> = outcome.trials.iter().map(|t| t.trial_index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(outcome.trials.iter().all(|t| t.status == TrialStatus::Completed));
        assert_eq!(
            select_best(&outcome.trials).unwrap().trial_index(),
            outcome.best.trial_index()
        );
    }

    #[tokio::test]
    async fn test_zero_budget_starts_nothing() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, 2, CancellationToken::new());
        let report = sched
            .run_trials(configs(4), Arc::new(toy_data(4)), Duration::ZERO)
            .await;
        assert!(report.trials.is_empty());
        assert_eq!(report.not_started, 4);

        let err = sched
            .search(configs(2), Arc::new(toy_data(4)), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, AutoClassError::NoTrialCompleted { attempted: 0, failed: 0 }));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, 1, CancellationToken::new());
        let mut cfgs = configs(3);
        cfgs[1].architecture = "does-not-exist".into();
        let outcome = sched
            .search(cfgs, Arc::new(toy_data(6)), Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(outcome.trials[1].status, TrialStatus::Failed);
        assert_eq!(outcome.trials.len(), 3);
        assert_ne!(outcome.best.trial_index(), 1);
    }

    #[tokio::test]
    async fn test_all_failed_is_no_trial_completed() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, 2, CancellationToken::new());
        let mut cfgs = configs(2);
        for c in &mut cfgs {
            c.architecture = "nope".into();
        }
        let err = sched
            .search(cfgs, Arc::new(toy_data(4)), Duration::from_secs(600))
            .await
            .unwrap_err();
        assert!(matches!(err, AutoClassError::NoTrialCompleted { attempted: 2, failed: 2 }));
    }

    #[tokio::test]
    async fn test_cancelled_search_issues_nothing() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let sched = scheduler(&dir, 1, cancel.clone());
        cancel.cancel();
        let report = sched
            .run_trials(configs(3), Arc::new(toy_data(4)), Duration::from_secs(600))
            .await;
        assert!(report.trials.is_empty());
        assert_eq!(report.not_started, 3);
    }

    #[test]
    fn test_unbounded_budget_saturates_deadline() {
        let start = Instant::now();
        let deadline = deadline_after(start, Duration::MAX);
        assert!(deadline > start + Duration::from_secs(3600));
        assert_eq!(deadline_after(start, Duration::ZERO), start);
    }

    #[tokio::test]
    async fn test_huge_budget_runs_normally() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, 2, CancellationToken::new());
        let report = sched
            .run_trials(configs(2), Arc::new(toy_data(4)), Duration::MAX)
            .await;
        assert_eq!(report.trials.len(), 2);
        assert_eq!(report.not_started, 0);
    }

    #[tokio::test]
    async fn test_budget_bounds_wall_time_for_large_trial_counts() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, 2, CancellationToken::new());
        let config = FitConfig {
            architectures: vec!["linear".into()],
            num_trials: 5_000_000,
            epochs: 1,
            seed: 3,
            ..FitConfig::default()
        };
        let space = SearchSpace::from_config(&config).unwrap();
        let budget = Duration::from_millis(200);

        let report = sched
            .run_trials(space.configs(), Arc::new(toy_data(4)), budget)
            .await;
        assert!(
            report.elapsed < budget + Duration::from_secs(2),
            "search took {:?}",
            report.elapsed
        );
        assert!(!report.trials.is_empty());
        assert_eq!(report.not_started + report.trials.len(), 5_000_000);
    }
}
