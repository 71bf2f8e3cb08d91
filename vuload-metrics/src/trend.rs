use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use hdrhistogram::Histogram;
use parking_lot::Mutex;

/// Histogram resolution: values are stored in thousandths of the recorded unit.
const SCALE: f64 = 1_000.0;

const SHARDS: usize = 16;

static NEXT_SHARD: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static SHARD_HINT: Cell<usize> = const { Cell::new(usize::MAX) };
}

/// Each worker thread sticks to one shard so concurrent writers rarely share a lock.
fn shard_index() -> usize {
    SHARD_HINT.with(|hint| {
        let cur = hint.get();
        if cur != usize::MAX {
            return cur;
        }
        let idx = NEXT_SHARD.fetch_add(1, Ordering::Relaxed) % SHARDS;
        hint.set(idx);
        idx
    })
}

pub(crate) fn new_histogram() -> Histogram<u64> {
    // Auto-resizing, 3 significant digits.
    match Histogram::<u64>::new(3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

#[derive(Debug)]
struct Shard {
    hist: Histogram<u64>,
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Shard {
    fn new() -> Self {
        Self {
            hist: new_histogram(),
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, value: f64) {
        // Negative values keep exact min/max/mean but clamp to 0 in the histogram.
        let scaled = (value.max(0.0) * SCALE).round() as u64;
        let _ = self.hist.record(scaled);

        self.count = self.count.saturating_add(1);
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Distribution series, sharded for concurrent writers and merged on read.
#[derive(Debug)]
pub struct Trend {
    shards: Box<[Mutex<Shard>]>,
}

impl Default for Trend {
    fn default() -> Self {
        Self::new()
    }
}

impl Trend {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(Shard::new())).collect(),
        }
    }

    #[inline]
    pub fn add(&self, value: f64) {
        self.shards[shard_index()].lock().push(value);
    }

    pub fn distribution(&self) -> TrendDistribution {
        let mut out = TrendDistribution::empty();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            if shard.count == 0 {
                continue;
            }
            let _ = out.hist.add(&shard.hist);
            out.count = out.count.saturating_add(shard.count);
            out.sum += shard.sum;
            out.sum_sq += shard.sum_sq;
            out.min = out.min.min(shard.min);
            out.max = out.max.max(shard.max);
        }
        out
    }
}

/// Point-in-time merge of every shard of a [`Trend`].
#[derive(Debug, Clone)]
pub struct TrendDistribution {
    hist: Histogram<u64>,
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl TrendDistribution {
    fn empty() -> Self {
        Self {
            hist: new_histogram(),
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population standard deviation.
    pub fn stdev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let var = (self.sum_sq / self.count as f64) - mean * mean;
        Some(var.max(0.0).sqrt())
    }

    /// Percentile `p` in `[0, 100]`.
    ///
    /// The rank `p/100 * (n-1)` usually falls between two recorded buckets; the estimate
    /// interpolates linearly between them and is clamped to the exact min/max.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if !(0.0..=100.0).contains(&p) {
            return None;
        }
        let total = self.hist.len();
        if total == 0 || self.count == 0 {
            return None;
        }

        let rank = (p / 100.0) * (total - 1) as f64;
        let lo_rank = rank.floor() as u64;
        let hi_rank = rank.ceil() as u64;
        let frac = rank - lo_rank as f64;

        let mut lo = None;
        let mut hi = None;
        let mut seen: u64 = 0;
        for v in self.hist.iter_recorded() {
            seen = seen.saturating_add(v.count_at_value());
            let value = self.hist.median_equivalent(v.value_iterated_to()) as f64 / SCALE;
            if lo.is_none() && lo_rank < seen {
                lo = Some(value);
            }
            if hi_rank < seen {
                hi = Some(value);
                break;
            }
        }

        // The outermost ranks are known exactly.
        let lo = if lo_rank == 0 { Some(self.min) } else { lo };
        let hi = if hi_rank == total - 1 { Some(self.max) } else { hi };

        let (lo, hi) = (lo?, hi?);
        let estimate = lo + (hi - lo) * frac;
        Some(estimate.clamp(self.min, self.max))
    }
}
