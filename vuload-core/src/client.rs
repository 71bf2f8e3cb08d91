use std::time::Duration;

pub use http::Method;

/// Per-phase timings of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub sending: Duration,
    pub waiting: Duration,
    pub receiving: Duration,
    /// Wall time from first byte sent to last byte received.
    pub duration: Duration,
}

impl Timings {
    /// All time attributed to waiting for the first byte.
    pub fn waiting_only(duration: Duration) -> Self {
        Self {
            waiting: duration,
            duration,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// `0` when the request never produced a response (connect failure, reset, timeout).
    pub status: u16,
    pub timings: Timings,
}

impl HttpResponse {
    pub fn new(status: u16, timings: Timings) -> Self {
        Self { status, timings }
    }

    pub fn transport_error(elapsed: Duration) -> Self {
        Self::new(0, Timings::waiting_only(elapsed))
    }

    pub fn is_transport_error(&self) -> bool {
        self.status == 0
    }

    /// 2xx and 3xx.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Request capability handed to test functions. Transport failures are reported through
/// the response status, never as an error.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn request(&self, method: Method, url: &str) -> HttpResponse;
}
