use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use vuload_core::{BoxError, MetricValue, Report, ReportSink, RunState};

use super::format::{format_duration, format_percent, format_rate};

/// One bar spanning the whole plan, refreshed by periodic reports.
pub(crate) struct HumanProgress {
    pb: ProgressBar,
    prev: Mutex<Option<(Duration, u64)>>,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr_with_hz(5));
        pb.set_style(bar_style());
        pb.set_prefix("run");
        Self {
            pb,
            prev: Mutex::new(None),
        }
    }

    pub(crate) fn set_length(&self, total: Duration) {
        self.pb.set_length(total.as_millis() as u64);
    }

    fn update(&self, report: &Report) {
        let s = &report.state;
        let reqs = counter(report, "http_reqs");

        let rps = {
            let mut prev = self
                .prev
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let rps = match *prev {
                Some((at, n)) if s.elapsed > at => {
                    reqs.saturating_sub(n) as f64 / (s.elapsed - at).as_secs_f64()
                }
                _ => 0.0,
            };
            *prev = Some((s.elapsed, reqs));
            rps
        };

        let failed = match report.metrics.get("http_req_failed").map(|m| &m.value) {
            Some(MetricValue::Rate { rate, .. }) => format_percent(*rate),
            _ => "-".to_string(),
        };

        self.pb.set_message(message(s, rps, reqs, &failed));
        let len = self.pb.length().unwrap_or(0);
        self.pb.set_position((s.elapsed.as_millis() as u64).min(len));
    }

    pub(crate) fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

fn counter(report: &Report, name: &str) -> u64 {
    match report.metrics.get(name).map(|m| &m.value) {
        Some(MetricValue::Counter { total }) => *total as u64,
        _ => 0,
    }
}

fn message(s: &RunState, rps: f64, reqs: u64, failed: &str) -> String {
    let mut msg = format!(
        "{} stage={}/{} vus={}/{} elapsed={} rps={} reqs={reqs} failed={failed}",
        s.phase,
        (s.stage_index + 1).min(s.stage_count),
        s.stage_count,
        s.active_vus,
        s.target_vus,
        format_duration(s.elapsed),
        format_rate(rps),
    );
    if s.retiring_vus > 0 {
        msg.push_str(&format!(" retiring={}", s.retiring_vus));
    }
    msg
}

#[async_trait::async_trait]
impl ReportSink for HumanProgress {
    async fn push(&self, report: &Report) -> Result<(), BoxError> {
        if !report.is_final {
            self.update(report);
        }
        Ok(())
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}

#[cfg(test)]
mod tests {
    use vuload_core::RunPhase;

    use super::*;

    #[test]
    fn message_shows_stage_and_vus() {
        let s = RunState {
            phase: RunPhase::Running,
            stage_index: 0,
            stage_count: 3,
            target_vus: 10,
            active_vus: 7,
            retiring_vus: 2,
            elapsed: Duration::from_secs(12),
            ..RunState::default()
        };
        let msg = message(&s, 41.6, 500, "0.00%");
        assert_eq!(
            msg,
            "running stage=1/3 vus=7/10 elapsed=12s rps=42 reqs=500 failed=0.00% retiring=2"
        );
    }
}
