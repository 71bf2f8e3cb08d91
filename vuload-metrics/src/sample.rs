use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::MetricKind;

/// Observed value: a boolean outcome or a number (durations are milliseconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Bool(bool),
    Number(f64),
}

impl SampleValue {
    /// Kind used when a series is auto-registered on first write.
    #[must_use]
    pub fn inferred_kind(self) -> MetricKind {
        match self {
            Self::Bool(_) => MetricKind::Rate,
            Self::Number(_) => MetricKind::Trend,
        }
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(true) => 1.0,
            Self::Bool(false) => 0.0,
            Self::Number(n) => n,
        }
    }

    /// Rate semantics: any non-zero number counts as a hit.
    #[must_use]
    pub fn is_hit(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Number(n) => n != 0.0,
        }
    }
}

impl From<bool> for SampleValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u64> for SampleValue {
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<Duration> for SampleValue {
    fn from(value: Duration) -> Self {
        Self::Number(value.as_secs_f64() * 1_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: Arc<str>,
    pub value: SampleValue,
    pub timestamp: Instant,
}

impl Sample {
    pub fn new(metric: impl Into<Arc<str>>, value: impl Into<SampleValue>) -> Self {
        Self::at(metric, value, Instant::now())
    }

    pub fn at(metric: impl Into<Arc<str>>, value: impl Into<SampleValue>, at: Instant) -> Self {
        Self {
            metric: metric.into(),
            value: value.into(),
            timestamp: at,
        }
    }
}
