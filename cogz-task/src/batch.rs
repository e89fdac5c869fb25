//! Repeated runs of one model.
//!
//! Run `i` gets seed `base_seed + i`. After every run the task is detached
//! and, once all runs finish, the first task's [`Task::analyze`] summarises
//! the whole set.
//!
//! [`Task::analyze`]: cogz_core::task::Task::analyze

use std::collections::BTreeMap;

use cogz_core::error::Result;
use cogz_core::event::Time;
use cogz_core::task::Task;
use cogz_core::{Model, RunOutcome, RunStats};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Seed the run used.
    pub seed: u64,
    /// Why it ended.
    pub outcome: RunOutcome,
    /// Simulated time at the end.
    pub time: Time,
    /// Engine counters.
    pub stats: RunStats,
    /// The task's own measurements.
    pub results: BTreeMap<String, f64>,
}

/// Everything a batch produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Per-run records, in run order.
    pub runs: Vec<RunRecord>,
    /// Output of `Task::analyze` over all runs (empty without a task).
    pub analysis: BTreeMap<String, f64>,
}

/// Build and run `runs` models.
///
/// `make` receives the seed for each run. With `duration` each model runs
/// for that many simulated seconds; otherwise until idle.
///
/// # Errors
/// Returns the first error from `make`.
pub fn run_batch<F>(runs: usize, base_seed: u64, duration: Option<Time>, mut make: F) -> Result<BatchReport>
where
    F: FnMut(u64) -> Result<Model>,
{
    let mut report = BatchReport::default();
    let mut tasks: Vec<Box<dyn Task>> = Vec::with_capacity(runs);
    for (seed, index) in (base_seed..).zip(0..runs) {
        let mut model = make(seed)?;
        let outcome = match duration {
            Some(seconds) => model.run(seconds),
            None => model.run_until_idle(),
        };
        let task = model.take_task();
        let results = task.as_ref().map(|t| t.results()).unwrap_or_default();
        info!(run = index, seed, ?outcome, time = model.time(), "run finished");
        report.runs.push(RunRecord {
            seed,
            outcome,
            time: model.time(),
            stats: model.stats(),
            results,
        });
        tasks.extend(task);
    }
    if let Some(first) = tasks.first() {
        report.analysis = first.analyze(&tasks);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use cogz_core::{ModelBuilder, ProductionDraft};

    use super::*;

    fn noisy(seed: u64) -> Result<Model> {
        ModelBuilder::new()
            .parameter(":seed", &seed.to_string())
            .parameter(":egs", "1")
            .chunk("g", "state start")
            .goal("g")
            .add_production(
                ProductionDraft::new("a")
                    .when("=goal>", "state start")
                    .then("=goal>", "state a"),
            )
            .add_production(
                ProductionDraft::new("b")
                    .when("=goal>", "state start")
                    .then("=goal>", "state b"),
            )
            .build()
    }

    #[test]
    fn seeds_are_consecutive_and_runs_complete() {
        let report = run_batch(4, 10, None, noisy).expect("batch");
        let seeds: Vec<u64> = report.runs.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![10, 11, 12, 13]);
        assert!(report.runs.iter().all(|r| r.outcome == RunOutcome::Idle));
        assert!(report.runs.iter().all(|r| r.stats.fired == 1));
        assert!(report.analysis.is_empty());
    }

    #[test]
    fn batches_are_reproducible() {
        let first = run_batch(3, 99, Some(1.0), noisy).expect("batch");
        let second = run_batch(3, 99, Some(1.0), noisy).expect("batch");
        assert_eq!(first, second);
    }

    #[test]
    fn build_errors_stop_the_batch() {
        let result = run_batch(2, 0, None, |_| ModelBuilder::new().goal("missing").build());
        assert!(result.is_err());
    }
}
