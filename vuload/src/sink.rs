use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;
use vuload_core::{BoxError, Report, ReportSink};

use crate::output::json::report_line;

/// Appends every report as one JSON line.
pub(crate) struct NdjsonFileSink {
    file: Mutex<tokio::fs::File>,
}

impl NdjsonFileSink {
    pub(crate) async fn create(path: &Path) -> anyhow::Result<Self> {
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("failed to create report file: {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait::async_trait]
impl ReportSink for NdjsonFileSink {
    async fn push(&self, report: &Report) -> Result<(), BoxError> {
        let mut line = serde_json::to_vec(&report_line(report))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        // Lines land in push order.
        file.flush().await?;
        if report.is_final {
            file.sync_data().await?;
        }
        Ok(())
    }
}

/// Forwards each report to every inner sink; the first failure is returned after all have
/// been tried.
pub(crate) struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutSink {
    pub(crate) fn new(sinks: Vec<Arc<dyn ReportSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait::async_trait]
impl ReportSink for FanoutSink {
    async fn push(&self, report: &Report) -> Result<(), BoxError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.push(report).await {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use vuload_core::{Registry, RunState};

    use super::*;

    fn report(is_final: bool) -> Report {
        Report {
            state: RunState::default(),
            tags: Arc::from(vec![("env".to_string(), "ci".to_string())]),
            metrics: Registry::default().snapshot(),
            thresholds: None,
            is_final,
        }
    }

    #[tokio::test]
    async fn file_sink_writes_one_line_per_report() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("report.ndjson");
        let sink = NdjsonFileSink::create(&path).await?;

        sink.push(&report(false))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        sink.push(&report(true))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let raw = std::fs::read_to_string(&path)?;
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["final"], serde_json::Value::Bool(true));
        assert_eq!(lines[0]["tags"]["env"], "ci");
        Ok(())
    }

    struct Counting(AtomicUsize, bool);

    #[async_trait::async_trait]
    impl ReportSink for Counting {
        async fn push(&self, _report: &Report) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if self.1 { Err("broken".into()) } else { Ok(()) }
        }
    }

    #[tokio::test]
    async fn fanout_reaches_every_sink_even_after_a_failure() {
        let broken = Arc::new(Counting(AtomicUsize::new(0), true));
        let healthy = Arc::new(Counting(AtomicUsize::new(0), false));
        let sinks: Vec<Arc<dyn ReportSink>> = vec![broken.clone(), healthy.clone()];
        let fanout = FanoutSink::new(sinks);

        assert!(fanout.push(&report(false)).await.is_err());
        assert_eq!(broken.0.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.0.load(Ordering::SeqCst), 1);
    }
}
