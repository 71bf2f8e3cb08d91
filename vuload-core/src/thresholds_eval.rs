use vuload_metrics::{MetricKind, MetricValue, Registry, SeriesSnapshot, Snapshot};

use crate::config::ZeroSamplePolicy;
use crate::error::{Error, Result};
use crate::thresholds::{CompiledThreshold, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ThresholdStatus {
    Passed,
    Failed,
    /// The metric had no samples and the zero-sample policy is `fail`.
    NoSamples,
    /// The metric had no samples and the zero-sample policy is `skip`.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub status: ThresholdStatus,
    pub observed: Option<f64>,
}

impl ThresholdOutcome {
    pub fn passed(&self) -> bool {
        matches!(self.status, ThresholdStatus::Passed | ThresholdStatus::Skipped)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdReport {
    pub outcomes: Vec<ThresholdOutcome>,
}

impl ThresholdReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(ThresholdOutcome::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdOutcome> + '_ {
        self.outcomes.iter().filter(|o| !o.passed())
    }
}

/// Rejects thresholds whose selector cannot apply to an already registered metric, and (for a
/// strict registry) thresholds on metrics that were never declared.
pub fn validate_against_registry(
    registry: &Registry,
    thresholds: &[CompiledThreshold],
) -> Result<()> {
    for t in thresholds {
        match registry.kind_of(&t.metric) {
            Some(kind) => check_selector(t, kind)?,
            None if !registry.auto_register() => {
                return Err(Error::UnknownMetric(t.metric.clone()));
            }
            None => {}
        }
    }
    Ok(())
}

/// Evaluates every threshold against `snapshot`. Pure; the same snapshot always yields the
/// same report.
pub fn evaluate(
    snapshot: &Snapshot,
    thresholds: &[CompiledThreshold],
    policy: ZeroSamplePolicy,
) -> Result<ThresholdReport> {
    let mut outcomes = Vec::with_capacity(thresholds.len());

    for t in thresholds {
        let series = snapshot.get(&t.metric);
        if let Some(series) = series {
            check_selector(t, series.kind)?;
        }

        let sampled = series.filter(|s| has_samples(s));
        let observed = sampled.and_then(|s| observe(s, t.expr.selector));

        let status = match (sampled, observed) {
            (None, _) => match policy {
                ZeroSamplePolicy::Fail => ThresholdStatus::NoSamples,
                ZeroSamplePolicy::Skip => ThresholdStatus::Skipped,
            },
            (Some(_), Some(v)) if t.expr.holds(v) => ThresholdStatus::Passed,
            (Some(_), _) => ThresholdStatus::Failed,
        };

        outcomes.push(ThresholdOutcome {
            metric: t.metric.clone(),
            expression: t.source.clone(),
            status,
            observed,
        });
    }

    Ok(ThresholdReport { outcomes })
}

fn check_selector(t: &CompiledThreshold, kind: MetricKind) -> Result<()> {
    if t.expr.selector.accepts(kind) {
        Ok(())
    } else {
        Err(Error::SelectorKindMismatch {
            metric: t.metric.clone(),
            selector: t.expr.selector.to_string(),
            kind,
        })
    }
}

fn has_samples(series: &SeriesSnapshot) -> bool {
    match series.value.sample_count() {
        Some(n) => n > 0,
        None => series.last_sample_at.is_some(),
    }
}

fn observe(series: &SeriesSnapshot, selector: Selector) -> Option<f64> {
    match (&series.value, selector) {
        (MetricValue::Rate { rate, .. }, Selector::Rate) => Some(*rate),
        (MetricValue::Rate { total, .. }, Selector::Count) => Some(*total as f64),
        (MetricValue::Counter { total }, Selector::Count) => Some(*total),
        (MetricValue::Gauge { value }, Selector::Value) => Some(*value),
        (MetricValue::Trend(d), Selector::Count) => Some(d.count() as f64),
        (MetricValue::Trend(d), Selector::Avg) => d.mean(),
        (MetricValue::Trend(d), Selector::Min) => d.min(),
        (MetricValue::Trend(d), Selector::Max) => d.max(),
        (MetricValue::Trend(d), Selector::Med) => d.percentile(50.0),
        (MetricValue::Trend(d), Selector::Percentile(p)) => d.percentile(p),
        _ => None,
    }
}
