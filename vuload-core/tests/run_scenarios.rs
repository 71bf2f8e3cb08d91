use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use vuload_core::{
    BoxError, Error, HttpClient, HttpResponse, IterationContext, Method, MetricKind, MetricValue,
    RampingSchedule, Registry, Report, ReportSink, RunController, RunOptions, RunOutcome,
    RunPhase, Stage, ThresholdSet, ThresholdStatus, Timings, Verdict, ZeroSamplePolicy,
};

const PATHS: [&str; 5] = ["/", "/contacts.php", "/news.php", "/pi.php", "/flip_coin.php"];

/// Answers every request after a fixed latency; every `fail_every`-th request gets a 500.
struct SimTarget {
    latency: Duration,
    fail_every: Option<u64>,
    served: AtomicU64,
}

impl SimTarget {
    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::from_millis(100),
            fail_every: None,
            served: AtomicU64::new(0),
        })
    }

    fn failing_every(k: u64) -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::from_millis(100),
            fail_every: Some(k),
            served: AtomicU64::new(0),
        })
    }
}

#[async_trait::async_trait]
impl HttpClient for SimTarget {
    async fn request(&self, _method: Method, _url: &str) -> HttpResponse {
        tokio::time::sleep(self.latency).await;
        let n = self.served.fetch_add(1, Ordering::Relaxed);
        let status = match self.fail_every {
            Some(k) if n % k == k - 1 => 500,
            _ => 200,
        };
        HttpResponse::new(status, Timings::waiting_only(self.latency))
    }
}

async fn user_flow(ctx: IterationContext) -> anyhow::Result<()> {
    for path in PATHS {
        let res = ctx.get(&format!("http://target{path}")).await;
        ctx.record("errors", res.status != 200)?;
        ctx.record("response_time", res.timings.duration)?;
        ctx.check("status is 200", res.status == 200);
        ctx.pace(Duration::from_secs(1)).await;
    }
    Ok(())
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn options(stages: Vec<Stage>) -> RunOptions {
    RunOptions {
        thresholds: vec![
            ThresholdSet::new("errors", ["rate<0.1"]),
            ThresholdSet::new("response_time", ["p(95)<500"]),
            ThresholdSet::new("http_req_duration", ["p(95)<500"]),
        ],
        metrics: vec![
            ("errors".to_string(), MetricKind::Rate),
            ("response_time".to_string(), MetricKind::Trend),
        ],
        grace_period: secs(10),
        ..RunOptions::new(stages)
    }
}

fn standard_plan() -> Vec<Stage> {
    vec![
        Stage::new(secs(30), 10),
        Stage::new(secs(60), 10),
        Stage::new(secs(30), 0),
    ]
}

fn short_plan() -> Vec<Stage> {
    vec![
        Stage::new(secs(10), 5),
        Stage::new(secs(10), 5),
        Stage::new(secs(5), 0),
    ]
}

fn counter(outcome: &RunOutcome, name: &str) -> f64 {
    match outcome.metrics.get(name).map(|s| &s.value) {
        Some(MetricValue::Counter { total }) => *total,
        other => panic!("expected counter `{name}`, got {other:?}"),
    }
}

fn rate(outcome: &RunOutcome, name: &str) -> (u64, u64, f64) {
    match outcome.metrics.get(name).map(|s| &s.value) {
        Some(MetricValue::Rate { total, hits, rate }) => (*total, *hits, *rate),
        other => panic!("expected rate `{name}`, got {other:?}"),
    }
}

/// Every committed iteration carries all of its samples and nothing else does.
fn assert_whole_iterations(outcome: &RunOutcome) {
    let iterations = counter(outcome, "iterations");
    assert!(iterations > 0.0);
    assert_eq!(counter(outcome, "http_reqs"), iterations * PATHS.len() as f64);
    let (errors_total, _, _) = rate(outcome, "errors");
    assert_eq!(errors_total as f64, iterations * PATHS.len() as f64);
}

#[tokio::test(start_paused = true)]
async fn healthy_target_passes_every_threshold() -> anyhow::Result<()> {
    let outcome = RunController::new(options(standard_plan()), SimTarget::healthy())
        .run(user_flow)
        .await?;

    assert_eq!(outcome.verdict, Verdict::Passed);
    assert_eq!(outcome.interrupted_iterations, 0);
    assert_eq!(outcome.peak_vus, 10);
    assert_whole_iterations(&outcome);

    let (_, hits, r) = rate(&outcome, "errors");
    assert_eq!(hits, 0);
    assert_eq!(r, 0.0);

    let thresholds = outcome
        .thresholds
        .as_ref()
        .unwrap_or_else(|| panic!("thresholds missing"));
    assert_eq!(thresholds.outcomes.len(), 3);
    for t in &thresholds.outcomes {
        assert_eq!(t.status, ThresholdStatus::Passed, "{t:?}");
    }
    let p95 = thresholds
        .outcomes
        .iter()
        .find(|t| t.metric == "response_time")
        .and_then(|t| t.observed);
    assert_eq!(p95, Some(100.0));

    let check = &outcome.checks[0];
    assert_eq!(check.name, "status is 200");
    assert_eq!(check.fails, 0);
    assert_eq!(check.passes as f64, counter(&outcome, "http_reqs"));

    assert_eq!(outcome.endpoints.len(), PATHS.len());
    for endpoint in &outcome.endpoints {
        assert_eq!(endpoint.requests as f64, counter(&outcome, "iterations"), "{endpoint:?}");
        assert_eq!(endpoint.failures, 0);
        assert_eq!(endpoint.duration.mean(), Some(100.0));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failing_target_fails_the_error_rate_threshold() -> anyhow::Result<()> {
    let outcome = RunController::new(options(standard_plan()), SimTarget::failing_every(5))
        .run(user_flow)
        .await?;

    assert_eq!(outcome.verdict, Verdict::Failed);
    assert_whole_iterations(&outcome);

    let thresholds = outcome
        .thresholds
        .as_ref()
        .unwrap_or_else(|| panic!("thresholds missing"));
    let failures: Vec<_> = thresholds.failures().collect();
    assert_eq!(failures.len(), 1, "{failures:?}");
    assert_eq!(failures[0].metric, "errors");
    assert_eq!(failures[0].expression, "rate<0.1");
    assert_eq!(failures[0].observed, Some(0.2));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_lets_running_iterations_finish() -> anyhow::Result<()> {
    let controller = RunController::new(options(standard_plan()), SimTarget::healthy());
    let cancel = controller.cancel_handle();
    let mut state = controller.subscribe();

    let run = tokio::spawn(controller.run(user_flow));
    tokio::time::sleep(secs(40)).await;
    cancel.cancel();
    let outcome = run.await??;

    assert_eq!(outcome.verdict, Verdict::Cancelled);
    assert!(outcome.thresholds.is_none());
    assert_eq!(outcome.interrupted_iterations, 0);
    assert!(outcome.elapsed < secs(60));
    assert_whole_iterations(&outcome);

    let last = state.borrow_and_update().clone();
    assert_eq!(last.phase, RunPhase::Cancelled);
    assert!(last.cancellation_requested);
    assert_eq!(last.active_vus + last.retiring_vus, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn grace_period_bounds_teardown_and_discards_partial_iterations() -> anyhow::Result<()> {
    let opts = RunOptions {
        grace_period: Duration::ZERO,
        ..options(standard_plan())
    };
    let controller = RunController::new(opts, SimTarget::healthy());
    let cancel = controller.cancel_handle();

    let run = tokio::spawn(controller.run(user_flow));
    tokio::time::sleep(secs(45)).await;
    cancel.cancel();
    let outcome = run.await??;

    assert_eq!(outcome.verdict, Verdict::Cancelled);
    assert!(outcome.interrupted_iterations > 0);
    assert!(outcome.elapsed < secs(46));
    assert_eq!(
        counter(&outcome, "interrupted_iterations"),
        outcome.interrupted_iterations as f64
    );
    assert_whole_iterations(&outcome);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn active_vus_follow_the_schedule() -> anyhow::Result<()> {
    let plan = standard_plan();
    let schedule = RampingSchedule::new(0, plan.clone());
    let controller = RunController::new(options(plan), SimTarget::healthy());
    let state = controller.subscribe();

    let run = tokio::spawn(controller.run(user_flow));
    let mut samples = 0;
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let s = state.borrow().clone();
        if s.phase != RunPhase::Running {
            break;
        }
        let want = schedule.target_at(s.elapsed);
        assert!(
            s.active_vus.abs_diff(want) <= 1,
            "elapsed={:?} active={} want={want}",
            s.elapsed,
            s.active_vus
        );
        assert!(s.active_vus <= 10);
        samples += 1;
    }
    assert!(samples > 200, "samples={samples}");

    let outcome = run.await??;
    assert_eq!(outcome.verdict, Verdict::Passed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn abort_on_fail_stops_the_run_early() -> anyhow::Result<()> {
    let opts = RunOptions {
        thresholds: vec![ThresholdSet::new("errors", ["rate<0.1"]).abort_on_fail(Some(secs(5)))],
        ..options(standard_plan())
    };
    let outcome = RunController::new(opts, SimTarget::failing_every(2))
        .run(user_flow)
        .await?;

    assert_eq!(outcome.verdict, Verdict::Failed);
    assert!(outcome.aborted_by_threshold);
    assert!(outcome.elapsed < secs(30), "elapsed={:?}", outcome.elapsed);
    assert!(outcome.elapsed >= secs(5));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn max_duration_cancels_the_run() -> anyhow::Result<()> {
    let opts = RunOptions {
        max_duration: Some(secs(15)),
        ..options(standard_plan())
    };
    let outcome = RunController::new(opts, SimTarget::healthy())
        .run(user_flow)
        .await?;

    assert_eq!(outcome.verdict, Verdict::Cancelled);
    assert!(outcome.elapsed >= secs(15));
    assert!(outcome.elapsed < secs(30));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_function_faults_do_not_stop_vus() -> anyhow::Result<()> {
    let opts = RunOptions {
        thresholds: Vec::new(),
        ..RunOptions::new(vec![Stage::new(secs(5), 2), Stage::new(secs(5), 2)])
    };
    let outcome = RunController::new(opts, SimTarget::healthy())
        .run(|ctx: IterationContext| async move {
            ctx.pace(Duration::from_millis(500)).await;
            if ctx.iteration() % 2 == 0 {
                anyhow::bail!("odd one out");
            }
            if ctx.iteration() % 3 == 0 {
                panic!("boom");
            }
            anyhow::Ok(())
        })
        .await?;

    assert_eq!(outcome.verdict, Verdict::Passed);
    let iterations = counter(&outcome, "iterations");
    let errors = counter(&outcome, "iteration_errors");
    assert!(iterations >= 10.0, "iterations={iterations}");
    assert!(errors > 0.0 && errors < iterations);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_sample_policy_decides_unwritten_metrics() -> anyhow::Result<()> {
    let plan = vec![Stage::new(secs(2), 1)];
    let base = RunOptions {
        thresholds: vec![ThresholdSet::new("never_written", ["p(95)<1"])],
        ..RunOptions::new(plan)
    };
    let quick = |ctx: IterationContext| async move {
        ctx.pace(Duration::from_millis(200)).await;
        anyhow::Ok(())
    };

    let failing = RunController::new(base.clone(), SimTarget::healthy())
        .run(quick)
        .await?;
    assert_eq!(failing.verdict, Verdict::Failed);
    let outcome = &failing
        .thresholds
        .as_ref()
        .unwrap_or_else(|| panic!("thresholds missing"))
        .outcomes[0];
    assert_eq!(outcome.status, ThresholdStatus::NoSamples);

    let skipping = RunOptions {
        zero_sample_policy: ZeroSamplePolicy::Skip,
        ..base
    };
    let passing = RunController::new(skipping, SimTarget::healthy())
        .run(quick)
        .await?;
    assert_eq!(passing.verdict, Verdict::Passed);
    Ok(())
}

#[tokio::test]
async fn configuration_errors_surface_before_any_vu_runs() {
    let started = Arc::new(AtomicU64::new(0));
    let flow = {
        let started = started.clone();
        move |_ctx: IterationContext| {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::Relaxed);
                anyhow::Ok(())
            }
        }
    };

    let empty = RunController::new(RunOptions::new(Vec::new()), SimTarget::healthy())
        .run(flow.clone())
        .await;
    assert!(matches!(empty, Err(Error::InvalidPlan(_))));

    let malformed = RunOptions {
        thresholds: vec![ThresholdSet::new("errors", ["rate<<0.1"])],
        ..options(short_plan())
    };
    let res = RunController::new(malformed, SimTarget::healthy())
        .run(flow.clone())
        .await;
    assert!(matches!(res, Err(Error::ThresholdSyntax { .. })));

    let mismatch = RunOptions {
        thresholds: vec![ThresholdSet::new("errors", ["p(95)<500"])],
        ..options(short_plan())
    };
    let res = RunController::new(mismatch, SimTarget::healthy())
        .run(flow.clone())
        .await;
    assert!(matches!(res, Err(Error::SelectorKindMismatch { .. })));

    let strict = RunController::new(
        RunOptions {
            metrics: Vec::new(),
            ..options(short_plan())
        },
        SimTarget::healthy(),
    )
    .with_registry(Arc::new(Registry::strict()))
    .run(flow)
    .await;
    assert!(matches!(strict, Err(Error::UnknownMetric(name)) if name == "errors"));

    assert_eq!(started.load(Ordering::Relaxed), 0);
}

#[test]
fn validate_runs_the_same_checks_as_run() {
    let mismatch = RunOptions {
        thresholds: vec![ThresholdSet::new("errors", ["p(95)<500"])],
        ..options(short_plan())
    };
    let res = RunController::new(mismatch, SimTarget::healthy()).validate();
    assert!(matches!(res, Err(Error::SelectorKindMismatch { .. })));

    let strict = RunController::new(
        RunOptions {
            metrics: Vec::new(),
            ..options(short_plan())
        },
        SimTarget::healthy(),
    )
    .with_registry(Arc::new(Registry::strict()))
    .validate();
    assert!(matches!(strict, Err(Error::UnknownMetric(name)) if name == "errors"));

    assert!(RunController::new(options(short_plan()), SimTarget::healthy())
        .validate()
        .is_ok());
}

#[derive(Default)]
struct CollectingSink {
    reports: Mutex<Vec<Report>>,
}

#[async_trait::async_trait]
impl ReportSink for CollectingSink {
    async fn push(&self, report: &Report) -> Result<(), BoxError> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

struct BrokenSink;

#[async_trait::async_trait]
impl ReportSink for BrokenSink {
    async fn push(&self, _report: &Report) -> Result<(), BoxError> {
        Err("sink unavailable".into())
    }
}

#[tokio::test(start_paused = true)]
async fn sinks_receive_periodic_and_final_reports() -> anyhow::Result<()> {
    let sink = Arc::new(CollectingSink::default());
    let opts = RunOptions {
        tags: vec![("env".to_string(), "test".to_string())],
        ..options(short_plan())
    };
    let outcome = RunController::new(opts, SimTarget::healthy())
        .with_sink(sink.clone())
        .run(user_flow)
        .await?;
    assert_eq!(outcome.verdict, Verdict::Passed);

    let reports = sink.reports.lock();
    assert!(reports.len() > 10, "reports={}", reports.len());

    // Periodic pushes are detached, so the final one is not necessarily the last to land.
    let finals: Vec<&Report> = reports.iter().filter(|r| r.is_final).collect();
    assert_eq!(finals.len(), 1);
    let last = finals[0];
    assert_eq!(last.state.verdict, Verdict::Passed);
    assert_eq!(last.state.phase, RunPhase::Passed);
    assert_eq!(last.tags.as_ref(), &[("env".to_string(), "test".to_string())]);
    assert!(last.thresholds.as_ref().is_some_and(|t| t.passed()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failing_sink_never_fails_the_run() -> anyhow::Result<()> {
    let outcome = RunController::new(options(short_plan()), SimTarget::healthy())
        .with_sink(Arc::new(BrokenSink))
        .run(user_flow)
        .await?;
    assert_eq!(outcome.verdict, Verdict::Passed);
    Ok(())
}
