use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use vuload_core::{
    BoxError, MetricValue, Report, ReportSink, RunOptions, RunOutcome, Snapshot, ThresholdReport,
};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _options: &RunOptions) {}

    fn sink(&self) -> Option<Arc<dyn ReportSink>> {
        let sink: Arc<dyn ReportSink> = Arc::new(StdoutProgress);
        Some(sink)
    }

    fn print_summary(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        emit_json_line(&summary_line(outcome));
        Ok(())
    }
}

/// Periodic reports as `report` lines; the final view is covered by the summary line.
struct StdoutProgress;

#[async_trait::async_trait]
impl ReportSink for StdoutProgress {
    async fn push(&self, report: &Report) -> Result<(), BoxError> {
        if !report.is_final {
            emit_json_line(&report_line(report));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonReportLine {
    pub kind: &'static str,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub phase: String,
    pub verdict: String,
    pub elapsed_secs: f64,
    /// 1-based; 0 before the first stage.
    pub stage: usize,
    pub stages: usize,
    pub target_vus: u64,
    pub active_vus: u64,
    pub retiring_vus: u64,
    pub peak_vus: u64,
    pub tags: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, JsonMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Vec<JsonThreshold>>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonMetric {
    Counter {
        total: f64,
    },
    Gauge {
        value: f64,
    },
    Rate {
        total: u64,
        hits: u64,
        rate: f64,
    },
    Trend {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        max: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
        stdev: Option<f64>,
    },
}

impl From<&MetricValue> for JsonMetric {
    fn from(value: &MetricValue) -> Self {
        match value {
            MetricValue::Counter { total } => Self::Counter { total: *total },
            MetricValue::Gauge { value } => Self::Gauge { value: *value },
            MetricValue::Rate { total, hits, rate } => Self::Rate {
                total: *total,
                hits: *hits,
                rate: *rate,
            },
            MetricValue::Trend(d) => Self::Trend {
                count: d.count(),
                avg: d.mean(),
                min: d.min(),
                med: d.percentile(50.0),
                max: d.max(),
                p90: d.percentile(90.0),
                p95: d.percentile(95.0),
                p99: d.percentile(99.0),
                stdev: d.stdev(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub status: String,
    pub observed: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheck {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonEndpoint {
    pub name: String,
    pub requests: u64,
    pub failures: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p95: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub verdict: String,
    pub elapsed_secs: f64,
    pub iterations: u64,
    pub iteration_errors: u64,
    pub interrupted_iterations: u64,
    pub spawned_vus: u64,
    pub peak_vus: u64,
    pub aborted_by_threshold: bool,
    pub checks: Vec<JsonCheck>,
    pub endpoints: Vec<JsonEndpoint>,
    pub thresholds: Option<Vec<JsonThreshold>>,
    pub metrics: BTreeMap<String, JsonMetric>,
}

fn metrics(snapshot: &Snapshot) -> BTreeMap<String, JsonMetric> {
    snapshot
        .iter()
        .map(|(name, s)| (name.to_string(), JsonMetric::from(&s.value)))
        .collect()
}

fn thresholds(report: &ThresholdReport) -> Vec<JsonThreshold> {
    report
        .outcomes
        .iter()
        .map(|o| JsonThreshold {
            metric: o.metric.clone(),
            expression: o.expression.clone(),
            status: o.status.to_string(),
            observed: o.observed,
        })
        .collect()
}

pub(crate) fn report_line(report: &Report) -> JsonReportLine {
    let s = &report.state;
    JsonReportLine {
        kind: "report",
        is_final: report.is_final,
        phase: s.phase.to_string(),
        verdict: s.verdict.to_string(),
        elapsed_secs: s.elapsed.as_secs_f64(),
        stage: if s.stage_count == 0 { 0 } else { s.stage_index + 1 },
        stages: s.stage_count,
        target_vus: s.target_vus,
        active_vus: s.active_vus,
        retiring_vus: s.retiring_vus,
        peak_vus: s.peak_vus,
        tags: report.tags.iter().cloned().collect(),
        metrics: metrics(&report.metrics),
        thresholds: report.thresholds.as_ref().map(thresholds),
    }
}

pub(crate) fn summary_line(outcome: &RunOutcome) -> JsonSummaryLine {
    JsonSummaryLine {
        kind: "summary",
        verdict: outcome.verdict.to_string(),
        elapsed_secs: outcome.elapsed.as_secs_f64(),
        iterations: outcome.iterations(),
        iteration_errors: outcome.iteration_errors(),
        interrupted_iterations: outcome.interrupted_iterations,
        spawned_vus: outcome.spawned_vus,
        peak_vus: outcome.peak_vus,
        aborted_by_threshold: outcome.aborted_by_threshold,
        checks: outcome
            .checks
            .iter()
            .map(|c| JsonCheck {
                name: c.name.clone(),
                passes: c.passes,
                fails: c.fails,
            })
            .collect(),
        endpoints: outcome
            .endpoints
            .iter()
            .map(|e| JsonEndpoint {
                name: e.name.clone(),
                requests: e.requests,
                failures: e.failures,
                avg: e.duration.mean(),
                min: e.duration.min(),
                max: e.duration.max(),
                p95: e.duration.percentile(95.0),
            })
            .collect(),
        thresholds: outcome.thresholds.as_ref().map(thresholds),
        metrics: metrics(&outcome.metrics),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
