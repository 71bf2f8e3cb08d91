use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use vuload_metrics::{Trend, TrendDistribution};

/// Request totals and latency distribution for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointSummary {
    pub name: String,
    pub requests: u64,
    pub failures: u64,
    /// Request durations in milliseconds.
    pub duration: TrendDistribution,
}

impl EndpointSummary {
    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }
}

#[derive(Debug, Default)]
struct EndpointSeries {
    requests: AtomicU64,
    failures: AtomicU64,
    duration: Trend,
}

/// Per-endpoint view of the built-in HTTP series, keyed by request name.
#[derive(Debug, Default)]
pub struct EndpointTally {
    by_name: DashMap<Arc<str>, EndpointSeries>,
}

impl EndpointTally {
    pub fn record(&self, name: &str, duration: Duration, failed: bool) {
        let series = match self.by_name.get(name) {
            Some(s) => s,
            None => self
                .by_name
                .entry(Arc::from(name))
                .or_default()
                .downgrade(),
        };
        series.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            series.failures.fetch_add(1, Ordering::Relaxed);
        }
        series.duration.add(duration.as_secs_f64() * 1_000.0);
    }

    /// Sorted by endpoint name.
    pub fn summary(&self) -> Vec<EndpointSummary> {
        let mut out: Vec<EndpointSummary> = self
            .by_name
            .iter()
            .map(|e| EndpointSummary {
                name: e.key().to_string(),
                requests: e.value().requests.load(Ordering::Relaxed),
                failures: e.value().failures.load(Ordering::Relaxed),
                duration: e.value().duration.distribution(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// Default request name: the URL without its query string or fragment.
pub fn endpoint_name(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}
