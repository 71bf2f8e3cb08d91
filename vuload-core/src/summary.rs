use std::time::Duration;

use vuload_metrics::{MetricValue, Snapshot};

use crate::checks::CheckSummary;
use crate::endpoints::EndpointSummary;
use crate::state::Verdict;
use crate::thresholds_eval::ThresholdReport;

/// Final result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub verdict: Verdict,
    /// `None` for cancelled runs, which are never evaluated.
    pub thresholds: Option<ThresholdReport>,
    pub metrics: Snapshot,
    pub checks: Vec<CheckSummary>,
    /// Sorted by endpoint name.
    pub endpoints: Vec<EndpointSummary>,
    pub interrupted_iterations: u64,
    pub spawned_vus: u64,
    pub peak_vus: u64,
    /// Set when an `abort_on_fail` threshold stopped the run early.
    pub aborted_by_threshold: bool,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Completed iterations.
    pub fn iterations(&self) -> u64 {
        self.counter(crate::builtin::ITERATIONS)
    }

    pub fn iteration_errors(&self) -> u64 {
        self.counter(crate::builtin::ITERATION_ERRORS)
    }

    fn counter(&self, name: &str) -> u64 {
        match self.metrics.get(name).map(|s| &s.value) {
            Some(MetricValue::Counter { total }) => *total as u64,
            _ => 0,
        }
    }
}
