use std::path::Path;
use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_tags_inline};
use progress::HumanProgress;
use summary::render;
use vuload_core::{ReportSink, RunOptions, RunOutcome};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, options: &RunOptions) {
        println!("plan: {}", plan_path.display());
        let stages = options
            .stages
            .iter()
            .map(|s| format!("{}->{}", format_duration(s.duration), s.target))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "stages: {stages} (total {})",
            format_duration(options.total_duration())
        );
        let tags = format_tags_inline(&options.tags, &[]);
        if !tags.is_empty() {
            println!("tags: {tags}");
        }
        println!();

        self.progress.set_length(options.total_duration());
    }

    fn sink(&self) -> Option<Arc<dyn ReportSink>> {
        let sink: Arc<dyn ReportSink> = self.progress.clone();
        Some(sink)
    }

    fn print_summary(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(outcome));

        if let Some(report) = &outcome.thresholds
            && !report.passed()
        {
            eprintln!("thresholds failed:");
            for f in report.failures() {
                match f.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", f.metric, f.expression),
                    None => eprintln!("  {}: {} ({})", f.metric, f.expression, f.status),
                }
            }
        }

        Ok(())
    }
}
