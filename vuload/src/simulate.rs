use std::time::Duration;

use rand::Rng as _;
use vuload_core::{HttpClient, HttpResponse, Method, Timings};

use crate::plan::TargetYaml;

/// In-process stand-in for a service under test: answers after a jittered latency with a
/// configurable share of server and transport errors.
#[derive(Debug, Clone)]
pub(crate) struct SimulatedTarget {
    latency: Duration,
    jitter: Duration,
    error_rate: f64,
    transport_error_rate: f64,
}

enum Answer {
    Ok,
    ServerError,
    Transport,
}

impl SimulatedTarget {
    pub(crate) fn new(target: &TargetYaml) -> Self {
        Self {
            latency: target.latency.0,
            jitter: target.latency_jitter.0,
            error_rate: target.error_rate,
            transport_error_rate: target.transport_error_rate,
        }
    }

    fn roll(&self) -> (Duration, Answer) {
        let mut rng = rand::rng();
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rng.random_range(Duration::ZERO..=self.jitter)
        };
        let p: f64 = rng.random();
        let answer = if p < self.transport_error_rate {
            Answer::Transport
        } else if p < self.transport_error_rate + self.error_rate {
            Answer::ServerError
        } else {
            Answer::Ok
        };
        (self.latency + jitter, answer)
    }
}

#[async_trait::async_trait]
impl HttpClient for SimulatedTarget {
    async fn request(&self, method: Method, url: &str) -> HttpResponse {
        // The rng is not Send; settle everything before the first await.
        let (latency, answer) = self.roll();
        tokio::time::sleep(latency).await;

        tracing::trace!(%method, url, ?latency, "simulated request");
        match answer {
            Answer::Ok => HttpResponse::new(200, Timings::waiting_only(latency)),
            Answer::ServerError => HttpResponse::new(503, Timings::waiting_only(latency)),
            Answer::Transport => HttpResponse::transport_error(latency),
        }
    }
}
