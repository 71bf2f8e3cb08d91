use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use vuload_metrics::Registry;

use crate::builtin::BuiltinMetrics;
use crate::checks::CheckTally;
use crate::config::RunOptions;
use crate::error::Result;
use crate::client::HttpClient;
use crate::endpoints::EndpointTally;
use crate::report::{ReportSink, Reporter};
use crate::runner::{
    IterationContext, IterationRunner, Scheduler, SchedulerEvent, SchedulerSettings,
};
use crate::schedule::RampingSchedule;
use crate::signal::{CancelHandle, Signal};
use crate::state::{RunPhase, RunState, Verdict};
use crate::summary::RunOutcome;
use crate::thresholds::{CompiledThreshold, compile};
use crate::thresholds_eval::{ThresholdStatus, evaluate, validate_against_registry};

/// Drives one run from `Idle` to a terminal phase.
pub struct RunController {
    options: RunOptions,
    registry: Arc<Registry>,
    client: Arc<dyn HttpClient>,
    sink: Option<Arc<dyn ReportSink>>,
    cancel: Arc<Signal>,
    state: Arc<watch::Sender<RunState>>,
}

impl RunController {
    pub fn new(options: RunOptions, client: Arc<dyn HttpClient>) -> Self {
        let (state, _) = watch::channel(RunState::default());
        Self {
            options,
            registry: Arc::new(Registry::default()),
            client,
            sink: None,
            cancel: Arc::new(Signal::new()),
            state: Arc::new(state),
        }
    }

    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.cancel.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn transition(&self, next: RunPhase) {
        let prev = self.state.borrow().phase;
        if !prev.can_transition_to(next) {
            tracing::debug!(from = %prev, to = %next, "ignored phase transition");
            return;
        }

        self.state.send_modify(|s| {
            s.phase = next;
            s.verdict = match next {
                RunPhase::Passed => Verdict::Passed,
                RunPhase::Failed => Verdict::Failed,
                RunPhase::Cancelled => Verdict::Cancelled,
                _ => Verdict::Pending,
            };
        });
        tracing::info!(from = %prev, to = %next, "run phase changed");
    }

    /// Runs every configuration check `run` performs up front, without spawning a VU.
    pub fn validate(&self) -> Result<()> {
        self.preflight().map(|_| ())
    }

    fn preflight(&self) -> Result<(Arc<[CompiledThreshold]>, Arc<BuiltinMetrics>)> {
        let opts = &self.options;
        opts.validate()?;
        let thresholds: Arc<[CompiledThreshold]> = compile(&opts.thresholds)?.into();
        for (name, kind) in &opts.metrics {
            self.registry.register(name, *kind)?;
        }
        let builtin = Arc::new(BuiltinMetrics::register(&self.registry)?);
        validate_against_registry(&self.registry, &thresholds)?;
        Ok((thresholds, builtin))
    }

    /// Validates the configuration, runs the plan and returns the verdict.
    ///
    /// Configuration problems (bad plan, malformed threshold, selector/kind mismatch) are
    /// returned before any VU is spawned.
    pub async fn run<F, Fut, E>(self, test_fn: F) -> Result<RunOutcome>
    where
        F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let opts = &self.options;
        let (thresholds, builtin) = self.preflight()?;

        let checks = Arc::new(CheckTally::default());
        let endpoints = Arc::new(EndpointTally::default());
        let runner = Arc::new(IterationRunner::new(
            self.registry.clone(),
            builtin,
            checks.clone(),
            endpoints.clone(),
            self.client.clone(),
            Arc::new(test_fn),
        ));

        let drain = Arc::new(Signal::new());
        let scheduler = Scheduler::new(
            RampingSchedule::new(opts.start_vus, opts.stages.clone()),
            runner,
            SchedulerSettings {
                tick: opts.tick,
                grace_period: opts.grace_period,
                spawn_jitter: opts.spawn_jitter,
            },
            self.cancel.clone(),
            drain.clone(),
            self.state.clone(),
        );

        let reporter = self.sink.clone().map(|sink| Reporter {
            sink,
            registry: self.registry.clone(),
            thresholds: thresholds.clone(),
            policy: opts.zero_sample_policy,
            tags: opts.tags.clone().into(),
            interval: opts.report_interval,
            timeout: opts.report_timeout,
        });
        let report_stop = Arc::new(Signal::new());

        let started = Instant::now();
        self.transition(RunPhase::Running);
        tracing::info!(
            stages = opts.stages.len(),
            planned = ?opts.total_duration(),
            thresholds = thresholds.len(),
            "run started"
        );

        let (events_tx, mut events_rx) = mpsc::channel(4);
        let mut scheduler_task = tokio::spawn(scheduler.run(events_tx));
        let reporter_task = reporter
            .clone()
            .map(|r| r.spawn(self.state.subscribe(), report_stop.clone()));

        let abort_sets: Vec<CompiledThreshold> = thresholds
            .iter()
            .filter(|t| t.abort_on_fail)
            .cloned()
            .collect();
        let mut abort_check = tokio::time::interval(opts.abort_eval_interval);
        abort_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timeout = sleep_until_opt(opts.max_duration.map(|d| started + d));
        tokio::pin!(timeout);

        let mut aborted = false;
        let mut timed_out = false;
        let mut cancel_seen = false;

        let sched = loop {
            tokio::select! {
                res = &mut scheduler_task => break res?,
                Some(event) = events_rx.recv() => match event {
                    SchedulerEvent::Draining => self.transition(RunPhase::Draining),
                },
                _ = self.cancel.wait(), if !cancel_seen => {
                    cancel_seen = true;
                    self.state.send_modify(|s| s.cancellation_requested = true);
                }
                _ = &mut timeout, if !timed_out => {
                    timed_out = true;
                    tracing::warn!(max_duration = ?opts.max_duration, "max duration reached, cancelling");
                    self.cancel.trigger();
                }
                _ = abort_check.tick(), if !abort_sets.is_empty() && !aborted => {
                    if self.abort_triggered(&abort_sets, started.elapsed()) {
                        aborted = true;
                        tracing::warn!("abort_on_fail threshold crossed, stopping early");
                        drain.trigger();
                    }
                }
            }
        };
        // The scheduler may finish before its last event was consumed.
        while let Ok(SchedulerEvent::Draining) = events_rx.try_recv() {
            self.transition(RunPhase::Draining);
        }

        if let Some(task) = reporter_task {
            report_stop.trigger();
            let _ = task.await;
        }
        let elapsed = started.elapsed();

        let thresholds_report = if sched.cancelled {
            self.transition(RunPhase::Cancelled);
            None
        } else {
            self.transition(RunPhase::Evaluating);
            let snapshot = self.registry.snapshot();
            let report = match evaluate(&snapshot, &thresholds, opts.zero_sample_policy) {
                Ok(r) => r,
                Err(err) => {
                    self.transition(RunPhase::Failed);
                    return Err(err);
                }
            };
            for f in report.failures() {
                tracing::warn!(
                    metric = %f.metric,
                    expression = %f.expression,
                    observed = ?f.observed,
                    status = %f.status,
                    "threshold failed"
                );
            }
            let passed = report.passed() && !aborted;
            self.transition(if passed {
                RunPhase::Passed
            } else {
                RunPhase::Failed
            });
            Some(report)
        };

        let final_state = self.state.borrow().clone();
        if let Some(reporter) = &reporter {
            reporter
                .push_final(final_state.clone(), thresholds_report.clone())
                .await;
        }

        tracing::info!(
            verdict = %final_state.verdict,
            elapsed = ?elapsed,
            interrupted = sched.interrupted_iterations,
            "run finished"
        );

        Ok(RunOutcome {
            verdict: final_state.verdict,
            thresholds: thresholds_report,
            metrics: self.registry.snapshot(),
            checks: checks.summary(),
            endpoints: endpoints.summary(),
            interrupted_iterations: sched.interrupted_iterations,
            spawned_vus: sched.spawned_vus,
            peak_vus: sched.peak_vus,
            aborted_by_threshold: aborted,
            elapsed,
        })
    }

    /// Mid-run check: only a definite failure counts; metrics without samples yet do not.
    fn abort_triggered(&self, sets: &[CompiledThreshold], elapsed: Duration) -> bool {
        let eligible: Vec<CompiledThreshold> = sets
            .iter()
            .filter(|t| t.delay_abort_eval.is_none_or(|d| elapsed >= d))
            .cloned()
            .collect();
        if eligible.is_empty() {
            return false;
        }

        let snapshot = self.registry.snapshot();
        match evaluate(&snapshot, &eligible, self.options.zero_sample_policy) {
            Ok(report) => report
                .outcomes
                .iter()
                .any(|o| o.status == ThresholdStatus::Failed),
            Err(_) => false,
        }
    }
}

fn sleep_until_opt(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending().await,
        }
    }
}
