//! Virtual-user load test engine: ramps a population of VUs along a stage plan, runs a test
//! function in a loop on each of them, aggregates what they record and judges the run
//! against thresholds.

pub mod builtin;
mod checks;
mod client;
mod config;
mod controller;
mod endpoints;
mod error;
mod report;
mod runner;
mod schedule;
mod signal;
mod state;
mod summary;
mod thresholds;
mod thresholds_eval;

pub use checks::{CheckSummary, CheckTally};
pub use client::{HttpClient, HttpResponse, Method, Timings};
pub use config::{RunOptions, Stage, ZeroSamplePolicy};
pub use controller::RunController;
pub use endpoints::{EndpointSummary, EndpointTally, endpoint_name};
pub use error::{Error, Result};
pub use report::{BoxError, Report, ReportSink};
pub use runner::{IterationContext, IterationFault, IterationOutcome, IterationRunner, TestFn};
pub use schedule::{RampingSchedule, StageSnapshot};
pub use signal::CancelHandle;
pub use state::{RunPhase, RunState, Verdict};
pub use summary::RunOutcome;
pub use thresholds::{
    CompiledThreshold, Comparator, Selector, ThresholdExpr, ThresholdSet, compile,
    parse_threshold_expr,
};
pub use thresholds_eval::{
    ThresholdOutcome, ThresholdReport, ThresholdStatus, evaluate, validate_against_registry,
};
pub use vuload_metrics::{
    MetricHandle, MetricKind, MetricValue, Registry, SampleValue, SeriesSnapshot, Snapshot,
    TrendDistribution,
};
