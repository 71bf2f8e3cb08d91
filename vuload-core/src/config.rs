use std::time::Duration;

use vuload_metrics::MetricKind;

use crate::error::{Error, Result};
use crate::thresholds::ThresholdSet;

/// Linear ramp towards `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// What a threshold does when its metric has no samples at evaluation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ZeroSamplePolicy {
    #[default]
    Fail,
    Skip,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub stages: Vec<Stage>,
    /// Target at `t = 0`, before the first stage starts ramping.
    pub start_vus: u64,
    pub thresholds: Vec<ThresholdSet>,
    pub zero_sample_policy: ZeroSamplePolicy,
    /// Custom metrics declared up front; anything else is auto-registered on first write
    /// unless the registry is strict.
    pub metrics: Vec<(String, MetricKind)>,

    /// Scheduler control-loop period.
    pub tick: Duration,
    /// How long retiring VUs may keep running after a drain or cancel before they are aborted.
    pub grace_period: Duration,
    /// Upper bound of the random start delay given to VUs spawned in the same tick.
    pub spawn_jitter: Duration,
    /// Hard wall-clock limit; reaching it cancels the run.
    pub max_duration: Option<Duration>,

    pub report_interval: Duration,
    pub report_timeout: Duration,
    /// How often `abort_on_fail` thresholds are checked while running.
    pub abort_eval_interval: Duration,
    pub tags: Vec<(String, String)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            start_vus: 0,
            thresholds: Vec::new(),
            zero_sample_policy: ZeroSamplePolicy::default(),
            metrics: Vec::new(),
            tick: Duration::from_millis(100),
            grace_period: Duration::from_secs(5),
            spawn_jitter: Duration::from_millis(50),
            max_duration: None,
            report_interval: Duration::from_secs(1),
            report_timeout: Duration::from_secs(2),
            abort_eval_interval: Duration::from_secs(1),
            tags: Vec::new(),
        }
    }
}

impl RunOptions {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            ..Self::default()
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::InvalidPlan("at least one stage is required"));
        }
        if self.total_duration().is_zero() {
            return Err(Error::InvalidPlan(
                "at least one stage must have a positive duration",
            ));
        }
        if self.tick.is_zero() {
            return Err(Error::InvalidOption("`tick` must be a positive duration"));
        }
        if self.report_interval.is_zero() {
            return Err(Error::InvalidOption(
                "`report_interval` must be a positive duration",
            ));
        }
        if self.abort_eval_interval.is_zero() {
            return Err(Error::InvalidOption(
                "`abort_eval_interval` must be a positive duration",
            ));
        }
        if self.max_duration.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidOption(
                "`max_duration` must be a positive duration",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn empty_plan_is_rejected() {
        let opts = RunOptions::new(Vec::new());
        assert!(matches!(opts.validate(), Err(Error::InvalidPlan(_))));
    }

    #[test]
    fn plan_without_any_duration_is_rejected() {
        let opts = RunOptions::new(vec![Stage::new(Duration::ZERO, 10)]);
        assert!(matches!(opts.validate(), Err(Error::InvalidPlan(_))));
    }

    #[test]
    fn zero_duration_stage_is_allowed_next_to_positive_ones() {
        let opts = RunOptions::new(vec![Stage::new(Duration::ZERO, 5), Stage::new(secs(10), 5)]);
        assert!(opts.validate().is_ok());
        assert_eq!(opts.total_duration(), secs(10));
    }

    #[test]
    fn zero_tick_is_rejected() {
        let opts = RunOptions {
            tick: Duration::ZERO,
            ..RunOptions::new(vec![Stage::new(secs(1), 1)])
        };
        assert!(matches!(opts.validate(), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn zero_sample_policy_parses() {
        assert_eq!("skip".parse::<ZeroSamplePolicy>().ok(), Some(ZeroSamplePolicy::Skip));
        assert_eq!(ZeroSamplePolicy::default().to_string(), "fail");
    }
}
