pub mod error;
pub mod metrics;
pub mod registry;
pub mod sample;
pub mod trend;

pub use error::{Error, Result};
pub use metrics::{MetricHandle, MetricKind, MetricValue, Rate};
pub use registry::{Registry, SeriesSnapshot, Snapshot};
pub use sample::{Sample, SampleValue};
pub use trend::{Trend, TrendDistribution};
