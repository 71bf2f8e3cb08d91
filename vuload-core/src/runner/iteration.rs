use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt as _;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use vuload_metrics::{MetricHandle, Registry, SampleValue};

use crate::builtin::BuiltinMetrics;
use crate::checks::CheckTally;
use crate::client::{HttpClient, HttpResponse, Method};
use crate::endpoints::{EndpointTally, endpoint_name};

#[derive(Debug, thiserror::Error)]
pub enum IterationFault {
    #[error(transparent)]
    Metric(#[from] vuload_metrics::Error),

    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),
}

/// The user-supplied body of one iteration.
///
/// Implemented for any `Fn(IterationContext) -> impl Future<Output = Result<(), E>>`.
pub trait TestFn: Send + Sync + 'static {
    fn call(&self, ctx: IterationContext) -> BoxFuture<'static, Result<(), String>>;
}

impl<F, Fut, E> TestFn for F
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    fn call(&self, ctx: IterationContext) -> BoxFuture<'static, Result<(), String>> {
        let fut = (self)(ctx);
        Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
    }
}

#[derive(Debug, Default)]
struct Pending {
    samples: Vec<(MetricHandle, SampleValue, Instant)>,
    checks: Vec<(Arc<str>, bool)>,
    endpoints: Vec<(Arc<str>, Duration, bool)>,
}

/// Capabilities of one running iteration. Everything recorded through it is buffered and
/// only reaches the registry when the iteration completes, so an iteration cut short by a
/// forced stop leaves no partial trace.
#[derive(Clone)]
pub struct IterationContext {
    vu_id: u64,
    iteration: u64,
    registry: Arc<Registry>,
    builtin: Arc<BuiltinMetrics>,
    client: Arc<dyn HttpClient>,
    pending: Arc<Mutex<Pending>>,
}

impl fmt::Debug for IterationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationContext")
            .field("vu_id", &self.vu_id)
            .field("iteration", &self.iteration)
            .finish_non_exhaustive()
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl IterationContext {
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// Zero-based iteration number within this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Sends a request, counted per endpoint under the URL without its query string.
    pub async fn request(&self, method: Method, url: &str) -> HttpResponse {
        self.request_named(method, url, endpoint_name(url)).await
    }

    /// Sends a request counted per endpoint under `name`.
    pub async fn request_named(&self, method: Method, url: &str, name: &str) -> HttpResponse {
        let res = self.client.request(method, url).await;
        let at = now();

        let b = &self.builtin;
        let mut pending = self.pending.lock();
        pending
            .samples
            .push((b.http_reqs.clone(), SampleValue::Number(1.0), at));
        pending.samples.push((
            b.http_req_duration.clone(),
            res.timings.duration.into(),
            at,
        ));
        pending
            .samples
            .push((b.http_req_waiting.clone(), res.timings.waiting.into(), at));
        pending.samples.push((
            b.http_req_failed.clone(),
            SampleValue::Bool(!res.is_success()),
            at,
        ));
        pending
            .endpoints
            .push((Arc::from(name), res.timings.duration, !res.is_success()));
        drop(pending);

        res
    }

    pub async fn get(&self, url: &str) -> HttpResponse {
        self.request(Method::GET, url).await
    }

    /// Buffers a sample for `metric`. Unknown names are registered on first use (bool as a
    /// rate, number as a trend) unless the registry is strict.
    pub fn record(&self, metric: &str, value: impl Into<SampleValue>) -> Result<(), IterationFault> {
        let value = value.into();
        let handle = self.registry.resolve(metric, value.inferred_kind())?;
        handle.validate(value)?;
        self.pending.lock().samples.push((handle, value, now()));
        Ok(())
    }

    /// Records a named assertion and returns `ok` unchanged.
    pub fn check(&self, name: &str, ok: bool) -> bool {
        let at = now();
        let mut pending = self.pending.lock();
        pending
            .samples
            .push((self.builtin.checks.clone(), SampleValue::Bool(ok), at));
        pending.checks.push((Arc::from(name), ok));
        ok
    }

    /// Think time between requests.
    pub async fn pace(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}

#[derive(Debug)]
pub struct IterationOutcome {
    pub duration: Duration,
    pub fault: Option<IterationFault>,
}

/// Runs single iterations of the test function and commits their samples.
pub struct IterationRunner {
    registry: Arc<Registry>,
    builtin: Arc<BuiltinMetrics>,
    checks: Arc<CheckTally>,
    endpoints: Arc<EndpointTally>,
    client: Arc<dyn HttpClient>,
    test_fn: Arc<dyn TestFn>,
}

impl fmt::Debug for IterationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationRunner").finish_non_exhaustive()
    }
}

impl IterationRunner {
    pub fn new(
        registry: Arc<Registry>,
        builtin: Arc<BuiltinMetrics>,
        checks: Arc<CheckTally>,
        endpoints: Arc<EndpointTally>,
        client: Arc<dyn HttpClient>,
        test_fn: Arc<dyn TestFn>,
    ) -> Self {
        Self {
            registry,
            builtin,
            checks,
            endpoints,
            client,
            test_fn,
        }
    }

    pub fn builtin(&self) -> &BuiltinMetrics {
        &self.builtin
    }

    /// Runs one iteration to completion. Errors and panics become faults; they never
    /// propagate to the VU.
    pub async fn run(&self, vu_id: u64, iteration: u64) -> IterationOutcome {
        let pending = Arc::new(Mutex::new(Pending::default()));
        let ctx = IterationContext {
            vu_id,
            iteration,
            registry: self.registry.clone(),
            builtin: self.builtin.clone(),
            client: self.client.clone(),
            pending: pending.clone(),
        };

        let started = tokio::time::Instant::now();
        let test_fn = self.test_fn.clone();
        let result = AssertUnwindSafe(async move { test_fn.call(ctx).await })
            .catch_unwind()
            .await;
        let duration = started.elapsed();

        let fault = match result {
            Ok(Ok(())) => None,
            Ok(Err(msg)) => Some(IterationFault::Failed(msg)),
            Err(panic) => Some(IterationFault::Panicked(panic_message(panic.as_ref()))),
        };

        let pending = std::mem::take(&mut *pending.lock());
        self.commit(pending);

        let at = now();
        let b = &self.builtin;
        let _ = b.iterations.record(SampleValue::Number(1.0), at);
        let _ = b.iteration_duration.record(duration.into(), at);
        if let Some(fault) = &fault {
            let _ = b.iteration_errors.record(SampleValue::Number(1.0), at);
            tracing::warn!(vu_id, iteration, error = %fault, "iteration failed");
        }

        IterationOutcome { duration, fault }
    }

    fn commit(&self, pending: Pending) {
        for (handle, value, at) in pending.samples {
            if let Err(err) = handle.record(value, at) {
                tracing::debug!(metric = handle.name(), error = %err, "sample rejected");
            }
        }
        for (name, ok) in pending.checks {
            self.checks.record(&name, ok);
        }
        for (name, duration, failed) in pending.endpoints {
            self.endpoints.record(&name, duration, failed);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
