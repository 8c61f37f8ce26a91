//! Engine-wide statistics: monotonic tickers and latency/size histograms
//!
//! Collection is opt-in. The engine holds an `Option<Arc<Statistics>>` and
//! records through [`StatsExt`], which is a no-op when statistics are off.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

macro_rules! define_tickers {
    ($($variant:ident => $name:literal,)*) => {
        /// Monotonic event counters
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(usize)]
        pub enum Ticker {
            $($variant,)*
        }

        impl Ticker {
            /// Every ticker, in reporting order
            pub const ALL: &'static [Ticker] = &[$(Ticker::$variant,)*];

            /// Stable reporting name
            pub fn name(self) -> &'static str {
                match self {
                    $(Ticker::$variant => $name,)*
                }
            }
        }
    };
}

define_tickers! {
    BlockCacheMiss => "lsm.block.cache.miss",
    BlockCacheHit => "lsm.block.cache.hit",
    BlockCacheAdd => "lsm.block.cache.add",
    BlockCacheAddFailures => "lsm.block.cache.add.failures",
    BlockCacheIndexMiss => "lsm.block.cache.index.miss",
    BlockCacheIndexHit => "lsm.block.cache.index.hit",
    BlockCacheFilterMiss => "lsm.block.cache.filter.miss",
    BlockCacheFilterHit => "lsm.block.cache.filter.hit",
    BlockCacheDataMiss => "lsm.block.cache.data.miss",
    BlockCacheDataHit => "lsm.block.cache.data.hit",
    BlockCacheBytesRead => "lsm.block.cache.bytes.read",
    BlockCacheBytesWrite => "lsm.block.cache.bytes.write",
    BloomFilterUseful => "lsm.bloom.filter.useful",
    BloomFilterFullPositive => "lsm.bloom.filter.full.positive",
    MemtableHit => "lsm.memtable.hit",
    MemtableMiss => "lsm.memtable.miss",
    GetHitL0 => "lsm.l0.hit",
    GetHitL1 => "lsm.l1.hit",
    GetHitL2AndUp => "lsm.l2andup.hit",
    NumberKeysWritten => "lsm.number.keys.written",
    NumberKeysDeleted => "lsm.number.keys.deleted",
    NumberKeysRead => "lsm.number.keys.read",
    BytesWritten => "lsm.bytes.written",
    BytesRead => "lsm.bytes.read",
    NumberDbSeek => "lsm.number.db.seek",
    NumberDbNext => "lsm.number.db.next",
    NumberDbSeekFound => "lsm.number.db.seek.found",
    IterBytesRead => "lsm.db.iter.bytes.read",
    WalFileSynced => "lsm.wal.synced",
    WalFileBytes => "lsm.wal.bytes",
    FlushWriteBytes => "lsm.flush.write.bytes",
    CompactReadBytes => "lsm.compact.read.bytes",
    CompactWriteBytes => "lsm.compact.write.bytes",
    CompactionKeyDropObsolete => "lsm.compaction.key.drop.obsolete",
    StallMicros => "lsm.stall.micros",
}

macro_rules! define_histograms {
    ($($variant:ident => $name:literal,)*) => {
        /// Distributions recorded per event
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(usize)]
        pub enum HistogramType {
            $($variant,)*
        }

        impl HistogramType {
            /// Every histogram, in reporting order
            pub const ALL: &'static [HistogramType] = &[$(HistogramType::$variant,)*];

            /// Stable reporting name
            pub fn name(self) -> &'static str {
                match self {
                    $(HistogramType::$variant => $name,)*
                }
            }
        }
    };
}

define_histograms! {
    DbGet => "lsm.db.get.micros",
    DbWrite => "lsm.db.write.micros",
    DbSeek => "lsm.db.seek.micros",
    FlushTime => "lsm.db.flush.micros",
    CompactionTime => "lsm.compaction.times.micros",
    SstReadMicros => "lsm.sst.read.micros",
    BytesPerRead => "lsm.bytes.per.read",
    BytesPerWrite => "lsm.bytes.per.write",
}

/// Upper bounds of histogram buckets, shared by every histogram
fn bucket_limits() -> &'static [u64] {
    static LIMITS: OnceLock<Vec<u64>> = OnceLock::new();
    LIMITS.get_or_init(|| {
        let mut limits: Vec<u64> = (1..=10).collect();
        let mut last = 10u64;
        while last < u64::MAX / 2 {
            let mut next = (last as f64 * 1.5) as u64;
            // Keep two significant digits so bounds stay readable
            let mut scale = 1u64;
            while next / scale >= 100 {
                scale *= 10;
            }
            next = next / scale * scale;
            limits.push(next);
            last = next;
        }
        limits.push(u64::MAX);
        limits
    })
}

#[derive(Debug, Clone)]
struct HistogramData {
    count: u64,
    sum: u64,
    min: u64,
    max: u64,
    buckets: Vec<u64>,
}

impl HistogramData {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0,
            min: u64::MAX,
            max: 0,
            buckets: vec![0; bucket_limits().len()],
        }
    }

    fn add(&mut self, value: u64) {
        let limits = bucket_limits();
        let index = limits.partition_point(|&limit| limit < value);
        self.buckets[index.min(limits.len() - 1)] += 1;
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let limits = bucket_limits();
        let threshold = self.count as f64 * (p / 100.0);
        let mut cumulative = 0u64;
        for (i, &bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket;
            if cumulative as f64 >= threshold && bucket > 0 {
                let left = if i == 0 { 0 } else { limits[i - 1] };
                let right = limits[i];
                let before = (cumulative - bucket) as f64;
                let pos = (threshold - before) / bucket as f64;
                let estimate = left as f64 + (right - left) as f64 * pos;
                return estimate.clamp(self.min as f64, self.max as f64);
            }
        }
        self.max as f64
    }
}

/// Summary of one histogram
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub p100: f64,
    pub count: u64,
    pub sum: u64,
}

/// Point-in-time copy of every ticker and histogram
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatisticsSnapshot {
    pub tickers: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

/// Aggregate engine statistics
pub struct Statistics {
    tickers: Vec<AtomicU64>,
    histograms: Vec<Mutex<HistogramData>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            tickers: Ticker::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
            histograms: HistogramType::ALL
                .iter()
                .map(|_| Mutex::new(HistogramData::new()))
                .collect(),
        }
    }

    /// Add `count` to a ticker
    pub fn record_tick(&self, ticker: Ticker, count: u64) {
        self.tickers[ticker as usize].fetch_add(count, Ordering::Relaxed);
    }

    /// Current value of a ticker
    pub fn ticker_count(&self, ticker: Ticker) -> u64 {
        self.tickers[ticker as usize].load(Ordering::Relaxed)
    }

    /// Record one observation
    pub fn record_in_histogram(&self, histogram: HistogramType, value: u64) {
        self.histograms[histogram as usize].lock().add(value);
    }

    /// Summary of one histogram
    pub fn histogram_data(&self, histogram: HistogramType) -> HistogramSnapshot {
        let data = self.histograms[histogram as usize].lock();
        HistogramSnapshot {
            p50: data.percentile(50.0),
            p95: data.percentile(95.0),
            p99: data.percentile(99.0),
            p100: data.max as f64,
            count: data.count,
            sum: data.sum,
        }
    }

    /// Copy of everything recorded so far
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            tickers: Ticker::ALL
                .iter()
                .map(|&t| (t.name().to_string(), self.ticker_count(t)))
                .collect(),
            histograms: HistogramType::ALL
                .iter()
                .map(|&h| (h.name().to_string(), self.histogram_data(h)))
                .collect(),
        }
    }

    /// Zero every ticker and histogram
    pub fn reset(&self) {
        for ticker in &self.tickers {
            ticker.store(0, Ordering::Relaxed);
        }
        for histogram in &self.histograms {
            *histogram.lock() = HistogramData::new();
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, count) in &self.tickers {
            writeln!(f, "{} COUNT : {}", name, count)?;
        }
        for (name, h) in &self.histograms {
            writeln!(
                f,
                "{} P50 : {:.6} P95 : {:.6} P99 : {:.6} P100 : {:.6} COUNT : {} SUM : {}",
                name, h.p50, h.p95, h.p99, h.p100, h.count, h.sum
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Recording helpers for an optional statistics sink
pub(crate) trait StatsExt {
    fn tick(&self, ticker: Ticker, count: u64);
    fn observe(&self, histogram: HistogramType, value: u64);
}

impl StatsExt for Option<Arc<Statistics>> {
    fn tick(&self, ticker: Ticker, count: u64) {
        if let Some(stats) = self {
            stats.record_tick(ticker, count);
        }
    }

    fn observe(&self, histogram: HistogramType, value: u64) {
        if let Some(stats) = self {
            stats.record_in_histogram(histogram, value);
        }
    }
}
