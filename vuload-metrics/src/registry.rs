use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::metrics::{MetricHandle, MetricKind, MetricValue};
use crate::sample::Sample;

/// Concurrent registry of named series.
///
/// Lookups go through a sharded map, so writers on different series never contend, and
/// writers on the same series only touch atomics or a per-thread trend shard.
#[derive(Debug)]
pub struct Registry {
    series: DashMap<Arc<str>, MetricHandle, ahash::RandomState>,
    auto_register: bool,
    epoch: Instant,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_auto_register(true)
    }
}

impl Registry {
    /// Registry that rejects writes to names that were never registered.
    pub fn strict() -> Self {
        Self::with_auto_register(false)
    }

    pub fn with_auto_register(auto_register: bool) -> Self {
        Self {
            series: DashMap::with_hasher(ahash::RandomState::new()),
            auto_register,
            epoch: Instant::now(),
        }
    }

    pub fn auto_register(&self) -> bool {
        self.auto_register
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Idempotent; re-registering under a different kind is a configuration error.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricHandle> {
        if name.trim().is_empty() {
            return Err(Error::InvalidName);
        }

        let handle = match self.series.get(name) {
            Some(existing) => existing.value().clone(),
            None => {
                let key: Arc<str> = Arc::from(name);
                self.series
                    .entry(key.clone())
                    .or_insert_with(|| MetricHandle::new(key, kind, self.epoch))
                    .value()
                    .clone()
            }
        };

        if handle.kind() != kind {
            return Err(Error::KindMismatch {
                name: name.to_string(),
                existing: handle.kind(),
                requested: kind,
            });
        }
        Ok(handle)
    }

    pub fn get(&self, name: &str) -> Option<MetricHandle> {
        self.series.get(name).map(|h| h.value().clone())
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.series.get(name).map(|h| h.value().kind())
    }

    /// Resolves the series for `name`, auto-registering it when allowed.
    pub fn resolve(&self, name: &str, sample_kind: MetricKind) -> Result<MetricHandle> {
        if let Some(handle) = self.get(name) {
            return Ok(handle);
        }
        if !self.auto_register {
            return Err(Error::UnknownMetric(name.to_string()));
        }
        self.register(name, sample_kind)
    }

    pub fn record(&self, sample: &Sample) -> Result<()> {
        let handle = self.resolve(&sample.metric, sample.value.inferred_kind())?;
        handle.record(sample.value, sample.timestamp)
    }

    /// Reads every series once. Each series is internally consistent; writers are never
    /// blocked for longer than one shard merge.
    pub fn snapshot(&self) -> Snapshot {
        let handles: Vec<MetricHandle> = self.series.iter().map(|e| e.value().clone()).collect();

        let series = handles
            .into_iter()
            .map(|h| {
                let snap = SeriesSnapshot {
                    kind: h.kind(),
                    value: h.value(),
                    last_sample_at: h.last_sample_at(),
                };
                (h.name().to_string(), snap)
            })
            .collect();

        Snapshot { series }
    }
}

#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub kind: MetricKind,
    pub value: MetricValue,
    /// Offset of the newest sample from the registry epoch.
    pub last_sample_at: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    series: BTreeMap<String, SeriesSnapshot>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&SeriesSnapshot> {
        self.series.get(name)
    }

    /// Series in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SeriesSnapshot)> + '_ {
        self.series.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
