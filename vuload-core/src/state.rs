use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Draining,
    Evaluating,
    Passed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Cancelled)
    }

    /// Legal edges of the run state machine.
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Draining)
                | (Running, Cancelled)
                | (Draining, Evaluating)
                | (Draining, Cancelled)
                | (Evaluating, Passed)
                | (Evaluating, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Verdict {
    Pending,
    Passed,
    Failed,
    Cancelled,
}

/// Live view of a run. The scheduler writes the VU and stage fields; the controller writes
/// the phase, verdict and cancellation flag.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub phase: RunPhase,
    pub verdict: Verdict,
    pub elapsed: Duration,
    pub stage_index: usize,
    pub stage_count: usize,
    pub stage_elapsed: Duration,
    pub target_vus: u64,
    /// Spawned and not retiring.
    pub active_vus: u64,
    /// Asked to stop, still finishing an iteration.
    pub retiring_vus: u64,
    pub peak_vus: u64,
    pub cancellation_requested: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
            verdict: Verdict::Pending,
            elapsed: Duration::ZERO,
            stage_index: 0,
            stage_count: 0,
            stage_elapsed: Duration::ZERO,
            target_vus: 0,
            active_vus: 0,
            retiring_vus: 0,
            peak_vus: 0,
            cancellation_requested: false,
        }
    }
}
