use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn total(&self) -> u64 {
        self.passes.saturating_add(self.fails)
    }
}

#[derive(Debug, Default)]
struct CheckCounts {
    passes: AtomicU64,
    fails: AtomicU64,
}

/// Pass/fail tallies per named check, kept next to the aggregate `checks` rate.
#[derive(Debug, Default)]
pub struct CheckTally {
    by_name: DashMap<Arc<str>, CheckCounts>,
}

impl CheckTally {
    pub fn record(&self, name: &str, ok: bool) {
        let counts = match self.by_name.get(name) {
            Some(c) => c,
            None => self
                .by_name
                .entry(Arc::from(name))
                .or_default()
                .downgrade(),
        };
        let slot = if ok { &counts.passes } else { &counts.fails };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    /// Sorted by check name.
    pub fn summary(&self) -> Vec<CheckSummary> {
        let mut out: Vec<CheckSummary> = self
            .by_name
            .iter()
            .map(|e| CheckSummary {
                name: e.key().to_string(),
                passes: e.value().passes.load(Ordering::Relaxed),
                fails: e.value().fails.load(Ordering::Relaxed),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
