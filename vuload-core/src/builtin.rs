use vuload_metrics::{MetricHandle, MetricKind, Registry, Result};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_WAITING: &str = "http_req_waiting";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATION_ERRORS: &str = "iteration_errors";
pub const INTERRUPTED_ITERATIONS: &str = "interrupted_iterations";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

/// Handles for the series the engine writes on its own.
#[derive(Debug, Clone)]
pub struct BuiltinMetrics {
    pub http_reqs: MetricHandle,
    /// Milliseconds.
    pub http_req_duration: MetricHandle,
    /// Milliseconds.
    pub http_req_waiting: MetricHandle,
    pub http_req_failed: MetricHandle,
    pub checks: MetricHandle,
    pub iterations: MetricHandle,
    /// Milliseconds.
    pub iteration_duration: MetricHandle,
    pub iteration_errors: MetricHandle,
    pub interrupted_iterations: MetricHandle,
    pub vus: MetricHandle,
    pub vus_max: MetricHandle,
}

impl BuiltinMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        Ok(Self {
            http_reqs: registry.register(HTTP_REQS, MetricKind::Counter)?,
            http_req_duration: registry.register(HTTP_REQ_DURATION, MetricKind::Trend)?,
            http_req_waiting: registry.register(HTTP_REQ_WAITING, MetricKind::Trend)?,
            http_req_failed: registry.register(HTTP_REQ_FAILED, MetricKind::Rate)?,
            checks: registry.register(CHECKS, MetricKind::Rate)?,
            iterations: registry.register(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: registry.register(ITERATION_DURATION, MetricKind::Trend)?,
            iteration_errors: registry.register(ITERATION_ERRORS, MetricKind::Counter)?,
            interrupted_iterations: registry
                .register(INTERRUPTED_ITERATIONS, MetricKind::Counter)?,
            vus: registry.register(VUS, MetricKind::Gauge)?,
            vus_max: registry.register(VUS_MAX, MetricKind::Gauge)?,
        })
    }
}
