use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use vuload_metrics::{Registry, Snapshot};

use crate::config::ZeroSamplePolicy;
use crate::signal::Signal;
use crate::state::RunState;
use crate::thresholds::CompiledThreshold;
use crate::thresholds_eval::{ThresholdReport, evaluate};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Periodic or final view of a run pushed to a [`ReportSink`].
#[derive(Debug, Clone)]
pub struct Report {
    pub state: RunState,
    pub tags: Arc<[(String, String)]>,
    pub metrics: Snapshot,
    /// Mid-run threshold results are informational; only the final report is binding.
    pub thresholds: Option<ThresholdReport>,
    pub is_final: bool,
}

/// Destination for run reports. Delivery is best effort: a slow or failing sink is logged and
/// never affects the run.
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync + 'static {
    async fn push(&self, report: &Report) -> Result<(), BoxError>;
}

#[derive(Clone)]
pub(crate) struct Reporter {
    pub sink: Arc<dyn ReportSink>,
    pub registry: Arc<Registry>,
    pub thresholds: Arc<[CompiledThreshold]>,
    pub policy: ZeroSamplePolicy,
    pub tags: Arc<[(String, String)]>,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Reporter {
    fn build(&self, state: RunState, is_final: bool) -> Report {
        let metrics = self.registry.snapshot();
        let thresholds = evaluate(&metrics, &self.thresholds, self.policy).ok();
        Report {
            state,
            tags: self.tags.clone(),
            metrics,
            thresholds,
            is_final,
        }
    }

    /// Pushes a report every `interval` until `stop` is set. Each push runs on its own task
    /// so a slow sink cannot delay the next tick.
    ///
    /// The returned task finishes only once every periodic push has settled, so a final
    /// report delivered after awaiting it is always the last one a sink sees.
    pub fn spawn(self, state: watch::Receiver<RunState>, stop: Arc<Signal>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first tick.
            interval.tick().await;

            let mut inflight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stop.wait() => break,
                }
                while inflight.try_join_next().is_some() {}

                let report = self.build(state.borrow().clone(), false);
                let sink = self.sink.clone();
                let timeout = self.timeout;
                inflight.spawn(async move { deliver(sink.as_ref(), &report, timeout).await });
            }

            // Each push is bounded by `timeout`.
            while inflight.join_next().await.is_some() {}
        })
    }

    pub async fn push_final(&self, state: RunState, thresholds: Option<ThresholdReport>) {
        let mut report = self.build(state, true);
        report.thresholds = thresholds;
        deliver(self.sink.as_ref(), &report, self.timeout).await;
    }
}

async fn deliver(sink: &dyn ReportSink, report: &Report, timeout: Duration) {
    match tokio::time::timeout(timeout, sink.push(report)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "report sink push failed"),
        Err(_) => tracing::warn!(?timeout, "report sink push timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records `is_final` of each report once its push completes.
    struct SlowSink {
        delay: Duration,
        seen: Mutex<Vec<bool>>,
    }

    #[async_trait::async_trait]
    impl ReportSink for SlowSink {
        async fn push(&self, report: &Report) -> Result<(), BoxError> {
            if !report.is_final {
                tokio::time::sleep(self.delay).await;
            }
            self.seen.lock().push(report.is_final);
            Ok(())
        }
    }

    fn reporter(sink: Arc<dyn ReportSink>) -> Reporter {
        Reporter {
            sink,
            registry: Arc::new(Registry::default()),
            thresholds: Arc::from(Vec::new()),
            policy: ZeroSamplePolicy::Fail,
            tags: Arc::from(Vec::new()),
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn final_report_is_delivered_after_every_periodic_push() {
        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(450),
            seen: Mutex::new(Vec::new()),
        });
        let dyn_sink: Arc<dyn ReportSink> = sink.clone();
        let reporter = reporter(dyn_sink);
        let (_tx, rx) = watch::channel(RunState::default());
        let stop = Arc::new(Signal::new());

        let task = reporter.clone().spawn(rx, stop.clone());
        tokio::time::sleep(Duration::from_millis(350)).await;
        stop.trigger();
        if let Err(err) = task.await {
            panic!("reporter task failed: {err}");
        }
        reporter.push_final(RunState::default(), None).await;

        let seen = sink.seen.lock().clone();
        assert_eq!(seen.len(), 4, "{seen:?}");
        assert_eq!(seen.iter().filter(|f| **f).count(), 1);
        assert_eq!(seen.last(), Some(&true));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_periodic_push_is_bounded_by_the_timeout() {
        let sink = Arc::new(SlowSink {
            delay: Duration::from_secs(3600),
            seen: Mutex::new(Vec::new()),
        });
        let dyn_sink: Arc<dyn ReportSink> = sink.clone();
        let reporter = Reporter {
            timeout: Duration::from_millis(200),
            ..reporter(dyn_sink)
        };
        let (_tx, rx) = watch::channel(RunState::default());
        let stop = Arc::new(Signal::new());

        let started = tokio::time::Instant::now();
        let task = reporter.clone().spawn(rx, stop.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        stop.trigger();
        if let Err(err) = task.await {
            panic!("reporter task failed: {err}");
        }
        assert!(started.elapsed() < Duration::from_secs(1));

        reporter.push_final(RunState::default(), None).await;
        assert_eq!(sink.seen.lock().as_slice(), &[true]);
    }
}
