use crate::metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{name}` is already registered as {existing} (requested {requested})")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("invalid value `{value}` for {kind} metric `{name}`")]
    InvalidValue {
        name: String,
        kind: MetricKind,
        value: f64,
    },

    #[error("metric name must not be empty")]
    InvalidName,
}
