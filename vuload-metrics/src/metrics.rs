use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::sample::SampleValue;
use crate::trend::{Trend, TrendDistribution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

#[derive(Debug, Default)]
pub struct Rate {
    total: AtomicU64,
    hits: AtomicU64,
}

impl Rate {
    #[inline]
    pub fn add(&self, hit: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `(total, hits)`; hits never exceed total even while writers race the read.
    pub fn load(&self) -> (u64, u64) {
        let total = self.total.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        (total, hits.min(total))
    }
}

/// `f64` stored as raw bits so counters and gauges stay lock-free.
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn add(&self, delta: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }
}

#[derive(Debug)]
enum MetricStorage {
    Counter(AtomicF64),
    Gauge(AtomicF64),
    Rate(Rate),
    Trend(Trend),
}

impl MetricStorage {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(AtomicF64::default()),
            MetricKind::Gauge => Self::Gauge(AtomicF64::default()),
            MetricKind::Rate => Self::Rate(Rate::default()),
            MetricKind::Trend => Self::Trend(Trend::new()),
        }
    }
}

#[derive(Debug)]
struct Series {
    name: Arc<str>,
    kind: MetricKind,
    storage: MetricStorage,
    epoch: Instant,
    /// Nanoseconds since `epoch` of the newest sample, plus one (0 = never written).
    last_sample: AtomicU64,
}

/// Aggregated value of one series at snapshot time.
#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter { total: f64 },
    Gauge { value: f64 },
    Rate { total: u64, hits: u64, rate: f64 },
    Trend(Arc<TrendDistribution>),
}

impl MetricValue {
    /// Number of samples folded into this value (`None` for gauges).
    pub fn sample_count(&self) -> Option<u64> {
        match self {
            Self::Counter { .. } | Self::Gauge { .. } => None,
            Self::Rate { total, .. } => Some(*total),
            Self::Trend(d) => Some(d.count()),
        }
    }
}

/// Cheap, cloneable write handle to a registered series.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    series: Arc<Series>,
}

impl MetricHandle {
    pub(crate) fn new(name: Arc<str>, kind: MetricKind, epoch: Instant) -> Self {
        Self {
            series: Arc::new(Series {
                name,
                kind,
                storage: MetricStorage::new(kind),
                epoch,
                last_sample: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.series.name
    }

    pub fn kind(&self) -> MetricKind {
        self.series.kind
    }

    /// Checks `value` against the series kind without recording it.
    pub fn validate(&self, value: SampleValue) -> Result<()> {
        let v = value.as_f64();
        let ok = match self.series.kind {
            MetricKind::Rate => true,
            MetricKind::Counter => v.is_finite() && v >= 0.0,
            MetricKind::Gauge | MetricKind::Trend => v.is_finite(),
        };
        if ok { Ok(()) } else { Err(self.invalid(v)) }
    }

    pub fn record(&self, value: SampleValue, at: Instant) -> Result<()> {
        self.validate(value)?;

        let s = &self.series;
        match &s.storage {
            MetricStorage::Rate(r) => r.add(value.is_hit()),
            MetricStorage::Counter(c) => c.add(value.as_f64()),
            MetricStorage::Gauge(g) => g.store(value.as_f64()),
            MetricStorage::Trend(t) => t.add(value.as_f64()),
        }

        let offset = at.saturating_duration_since(s.epoch).as_nanos();
        let offset = u64::try_from(offset).unwrap_or(u64::MAX - 1);
        s.last_sample
            .fetch_max(offset.saturating_add(1), Ordering::Relaxed);
        Ok(())
    }

    pub fn add(&self, value: impl Into<SampleValue>) -> Result<()> {
        self.record(value.into(), Instant::now())
    }

    /// Offset of the newest sample from the registry epoch.
    pub fn last_sample_at(&self) -> Option<Duration> {
        match self.series.last_sample.load(Ordering::Relaxed) {
            0 => None,
            n => Some(Duration::from_nanos(n - 1)),
        }
    }

    pub fn value(&self) -> MetricValue {
        match &self.series.storage {
            MetricStorage::Counter(c) => MetricValue::Counter { total: c.load() },
            MetricStorage::Gauge(g) => MetricValue::Gauge { value: g.load() },
            MetricStorage::Rate(r) => {
                let (total, hits) = r.load();
                let rate = if total > 0 {
                    hits as f64 / total as f64
                } else {
                    0.0
                };
                MetricValue::Rate { total, hits, rate }
            }
            MetricStorage::Trend(t) => MetricValue::Trend(Arc::new(t.distribution())),
        }
    }

    fn invalid(&self, value: f64) -> Error {
        Error::InvalidValue {
            name: self.series.name.to_string(),
            kind: self.series.kind,
            value,
        }
    }
}
