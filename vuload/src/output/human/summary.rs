use std::fmt::Write as _;

use vuload_core::{MetricValue, RunOutcome, ThresholdStatus, Verdict};

use super::format::*;

pub(crate) fn render(outcome: &RunOutcome) -> String {
    let mut out = String::new();

    writeln!(&mut out, "summary").ok();
    writeln!(&mut out, "  verdict: {}", outcome.verdict).ok();
    if outcome.aborted_by_threshold {
        out.push_str("  stopped early: an abort_on_fail threshold failed\n");
    }
    writeln!(&mut out, "  elapsed: {}", format_duration(outcome.elapsed)).ok();
    writeln!(
        &mut out,
        "  iterations: {} (errors {}, interrupted {})",
        outcome.iterations(),
        outcome.iteration_errors(),
        outcome.interrupted_iterations
    )
    .ok();
    writeln!(
        &mut out,
        "  vus: peak {} spawned {}",
        outcome.peak_vus, outcome.spawned_vus
    )
    .ok();

    let secs = outcome.elapsed.as_secs_f64().max(1e-9);
    if let Some(MetricValue::Counter { total }) =
        outcome.metrics.get("http_reqs").map(|s| &s.value)
    {
        writeln!(
            &mut out,
            "  requests: {} rps={}",
            *total as u64,
            format_rate(total / secs)
        )
        .ok();
    }

    render_checks(outcome, &mut out);
    render_endpoints(outcome, &mut out);
    render_metrics(outcome, &mut out);
    render_thresholds(outcome, &mut out);

    out
}

fn render_checks(outcome: &RunOutcome, out: &mut String) {
    if outcome.checks.is_empty() {
        return;
    }
    out.push_str("\nchecks\n");
    for c in &outcome.checks {
        let mark = if c.fails == 0 { "ok  " } else { "FAIL" };
        writeln!(
            out,
            "  {mark} {}: {}/{} passed",
            c.name,
            c.passes,
            c.total()
        )
        .ok();
    }
}

fn render_endpoints(outcome: &RunOutcome, out: &mut String) {
    if outcome.endpoints.is_empty() {
        return;
    }
    out.push_str("\nendpoints\n");

    let width = outcome
        .endpoints
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0);
    for e in &outcome.endpoints {
        let d = &e.duration;
        writeln!(
            out,
            "  {:<width$} avg={} min={} max={} p95={} requests={} failed={}",
            e.name,
            format_ms_opt(d.mean()),
            format_ms_opt(d.min()),
            format_ms_opt(d.max()),
            format_ms_opt(d.percentile(95.0)),
            e.requests,
            format_percent(e.failure_rate()),
        )
        .ok();
    }
}

fn render_metrics(outcome: &RunOutcome, out: &mut String) {
    if outcome.metrics.is_empty() {
        return;
    }
    out.push_str("\nmetrics\n");

    let width = outcome
        .metrics
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);

    for (name, series) in outcome.metrics.iter() {
        let line = match &series.value {
            MetricValue::Counter { total } => format!("{total}"),
            MetricValue::Gauge { value } => format!("{value}"),
            MetricValue::Rate { total, hits, rate } => {
                format!("{} ({hits}/{total})", format_percent(*rate))
            }
            MetricValue::Trend(d) if d.is_empty() => "n/a".to_string(),
            MetricValue::Trend(d) => format!(
                "avg={} min={} med={} max={} p90={} p95={} (n={})",
                format_ms_opt(d.mean()),
                format_ms_opt(d.min()),
                format_ms_opt(d.percentile(50.0)),
                format_ms_opt(d.max()),
                format_ms_opt(d.percentile(90.0)),
                format_ms_opt(d.percentile(95.0)),
                d.count()
            ),
        };
        writeln!(out, "  {name:<width$} {line}").ok();
    }
}

fn render_thresholds(outcome: &RunOutcome, out: &mut String) {
    let Some(report) = &outcome.thresholds else {
        if outcome.verdict == Verdict::Cancelled {
            out.push_str("\nthresholds: not evaluated (run cancelled)\n");
        }
        return;
    };
    if report.outcomes.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for o in &report.outcomes {
        let mark = match o.status {
            ThresholdStatus::Passed => "ok  ",
            ThresholdStatus::Skipped => "skip",
            ThresholdStatus::Failed | ThresholdStatus::NoSamples => "FAIL",
        };
        let observed = match o.observed {
            Some(v) => format!("observed {v:.3}"),
            None => o.status.to_string(),
        };
        writeln!(out, "  {mark} {}: {} ({observed})", o.metric, o.expression).ok();
    }
}
