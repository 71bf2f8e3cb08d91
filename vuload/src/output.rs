use std::path::Path;
use std::sync::Arc;

use vuload_core::{ReportSink, RunOptions, RunOutcome};

use crate::cli::OutputFormat;

mod human;
pub(crate) mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan_path: &Path, options: &RunOptions);
    /// Live progress, fed by the run's periodic reports.
    fn sink(&self) -> Option<Arc<dyn ReportSink>>;
    fn print_summary(&self, outcome: &RunOutcome) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
