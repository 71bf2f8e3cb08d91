use std::time::Duration;

use crate::config::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear VU target over a list of stages.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    pub fn final_target(&self) -> u64 {
        self.stages.last().map(|s| s.target).unwrap_or(self.start)
    }

    fn stage_index(&self, elapsed: Duration) -> usize {
        match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) | Err(i) => i,
        }
    }

    fn bounds(&self, idx: usize) -> (Duration, Duration, u64, u64) {
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };
        (
            stage_start,
            self.cumulative_ends[idx],
            start_target,
            self.stages[idx].target,
        )
    }

    /// Target VU count at `elapsed`, rounded to the nearest integer and never outside the
    /// stage's `[from, to]` range. Zero-duration stages snap straight to their target.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() {
            return self.start;
        }
        if elapsed >= self.total_duration() {
            return self.final_target();
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);

        let stage_duration = stage_end.saturating_sub(stage_start);
        if stage_duration.is_zero() {
            return end_target;
        }
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        let start_i = i128::from(start_target);
        let delta = i128::from(end_target) - start_i;
        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        // floor(delta * num / den + 1/2)
        let offset = delta
            .saturating_mul(num)
            .saturating_mul(2)
            .saturating_add(den)
            .div_euclid(den.saturating_mul(2).max(1));

        let hi = i128::from(start_target.max(end_target));
        (start_i + offset).clamp(0, hi) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);
        let idx = if clamped >= total {
            self.stages.len() - 1
        } else {
            self.stage_index(clamped)
        };

        let (stage_start, stage_end, start_target, end_target) = self.bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start).min(stage_duration);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target,
            end_target,
            current_target: self.target_at(clamped),
        })
    }
}
