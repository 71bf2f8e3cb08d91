use vuload_metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid stage plan: {0}")]
    InvalidPlan(&'static str),

    #[error("invalid run option: {0}")]
    InvalidOption(&'static str),

    #[error("invalid threshold `{expression}` on metric `{metric}`: {reason}")]
    ThresholdSyntax {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("selector `{selector}` does not apply to {kind} metric `{metric}`")]
    SelectorKindMismatch {
        metric: String,
        selector: String,
        kind: MetricKind,
    },

    #[error(transparent)]
    Metrics(#[from] vuload_metrics::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Errors raised before any VU is spawned.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Join(_))
    }
}
