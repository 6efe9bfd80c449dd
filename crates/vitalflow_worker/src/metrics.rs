//! In-memory pipeline metrics.
//!
//! Counters and per-stage latency histograms are plain atomics so every
//! worker task can record without locking. `/metrics` renders them in the
//! Prometheus text exposition format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pipeline stages with a latency histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Decode,
    Validate,
    Process,
    Output,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Fetch,
        Stage::Decode,
        Stage::Validate,
        Stage::Process,
        Stage::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Decode => "decode",
            Stage::Validate => "validate",
            Stage::Process => "process",
            Stage::Output => "output",
        }
    }

    fn index(&self) -> usize {
        match self {
            Stage::Fetch => 0,
            Stage::Decode => 1,
            Stage::Validate => 2,
            Stage::Process => 3,
            Stage::Output => 4,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upper bounds in seconds. `+Inf` is implied.
pub const LATENCY_BUCKETS_SECS: [f64; 11] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0,
];

/// Fixed-bucket histogram. Bucket counts are non-cumulative internally.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; LATENCY_BUCKETS_SECS.len() + 1],
    count: AtomicU64,
    sum_us: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_BUCKET: AtomicU64 = AtomicU64::new(0);

impl LatencyHistogram {
    pub const fn new() -> Self {
        Self {
            buckets: [EMPTY_BUCKET; LATENCY_BUCKETS_SECS.len() + 1],
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let idx = LATENCY_BUCKETS_SECS
            .iter()
            .position(|bound| secs <= *bound)
            .unwrap_or(LATENCY_BUCKETS_SECS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = Vec::with_capacity(self.buckets.len());
        let mut running = 0;
        for bucket in &self.buckets {
            running += bucket.load(Ordering::Relaxed);
            cumulative.push(running);
        }
        HistogramSnapshot {
            cumulative,
            count: self.count.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// One entry per bucket in `LATENCY_BUCKETS_SECS` plus `+Inf`
    pub cumulative: Vec<u64>,
    pub count: u64,
    pub sum_us: u64,
}

/// Worker metrics - all fields are atomic for thread-safe access
#[derive(Debug, Default)]
pub struct Metrics {
    pub messages_received: AtomicU64,
    pub messages_processed: AtomicU64,
    pub messages_failed: AtomicU64,
    pub messages_quarantined: AtomicU64,
    pub messages_dead_lettered: AtomicU64,
    pub messages_retried: AtomicU64,
    pub messages_duplicate: AtomicU64,
    pub messages_deferred: AtomicU64,
    pub expired_records_cleaned: AtomicU64,
    stages: [LatencyHistogram; 5],
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            messages_quarantined: AtomicU64::new(0),
            messages_dead_lettered: AtomicU64::new(0),
            messages_retried: AtomicU64::new(0),
            messages_duplicate: AtomicU64::new(0),
            messages_deferred: AtomicU64::new(0),
            expired_records_cleaned: AtomicU64::new(0),
            stages: [
                LatencyHistogram::new(),
                LatencyHistogram::new(),
                LatencyHistogram::new(),
                LatencyHistogram::new(),
                LatencyHistogram::new(),
            ],
        }
    }

    #[inline]
    pub fn inc_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_quarantined(&self) {
        self.messages_quarantined.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_dead_lettered(&self) {
        self.messages_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_retried(&self) {
        self.messages_retried.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_duplicate(&self) {
        self.messages_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_deferred(&self) {
        self.messages_deferred.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_expired_cleaned(&self, count: u64) {
        self.expired_records_cleaned
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Record the time spent in `stage` since `start`
    #[inline]
    pub fn record_stage(&self, stage: Stage, start: Instant) {
        self.stages[stage.index()].observe(start.elapsed());
    }

    pub fn stage(&self, stage: Stage) -> &LatencyHistogram {
        &self.stages[stage.index()]
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.messages_received.load(Ordering::Relaxed),
            processed: self.messages_processed.load(Ordering::Relaxed),
            failed: self.messages_failed.load(Ordering::Relaxed),
            quarantined: self.messages_quarantined.load(Ordering::Relaxed),
            dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            retried: self.messages_retried.load(Ordering::Relaxed),
            duplicates: self.messages_duplicate.load(Ordering::Relaxed),
            deferred: self.messages_deferred.load(Ordering::Relaxed),
            expired_records_cleaned: self.expired_records_cleaned.load(Ordering::Relaxed),
        }
    }

    /// Format as Prometheus exposition format
    pub fn prometheus_format(&self) -> String {
        let s = self.snapshot();
        let counters = [
            (
                "messages_received_total",
                "Messages pulled from the source",
                s.received,
            ),
            (
                "messages_processed_total",
                "Messages that produced a training artifact",
                s.processed,
            ),
            (
                "messages_failed_total",
                "Messages whose processor reported failure",
                s.failed,
            ),
            (
                "messages_quarantined_total",
                "Messages quarantined for low quality or malformed input",
                s.quarantined,
            ),
            (
                "messages_dead_lettered_total",
                "Messages routed to the dead-letter destination",
                s.dead_lettered,
            ),
            (
                "messages_retried_total",
                "Messages nacked for redelivery",
                s.retried,
            ),
            (
                "messages_duplicate_total",
                "Deliveries of already completed messages dropped by the dedup gate",
                s.duplicates,
            ),
            (
                "messages_deferred_total",
                "Deliveries put back because another worker held the claim",
                s.deferred,
            ),
            (
                "dedup_expired_records_cleaned_total",
                "Expired dedup records removed",
                s.expired_records_cleaned,
            ),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP vitalflow_{name} {help}");
            let _ = writeln!(out, "# TYPE vitalflow_{name} counter");
            let _ = writeln!(out, "vitalflow_{name} {value}");
            out.push('\n');
        }

        let _ = writeln!(
            out,
            "# HELP vitalflow_stage_duration_seconds Time spent per pipeline stage"
        );
        let _ = writeln!(out, "# TYPE vitalflow_stage_duration_seconds histogram");
        for stage in Stage::ALL {
            let h = self.stage(stage).snapshot();
            for (bound, count) in LATENCY_BUCKETS_SECS.iter().zip(&h.cumulative) {
                let _ = writeln!(
                    out,
                    "vitalflow_stage_duration_seconds_bucket{{stage=\"{stage}\",le=\"{bound}\"}} \
                     {count}"
                );
            }
            let _ = writeln!(
                out,
                "vitalflow_stage_duration_seconds_bucket{{stage=\"{stage}\",le=\"+Inf\"}} {}",
                h.count
            );
            let _ = writeln!(
                out,
                "vitalflow_stage_duration_seconds_sum{{stage=\"{stage}\"}} {}",
                h.sum_us as f64 / 1_000_000.0
            );
            let _ = writeln!(
                out,
                "vitalflow_stage_duration_seconds_count{{stage=\"{stage}\"}} {}",
                h.count
            );
        }
        out
    }
}

/// Immutable snapshot of counters for reading
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub quarantined: u64,
    pub dead_lettered: u64,
    pub retried: u64,
    pub duplicates: u64,
    /// Not terminal: a deferred delivery comes back later
    pub deferred: u64,
    pub expired_records_cleaned: u64,
}

impl MetricsSnapshot {
    /// Messages that reached a terminal outcome
    pub fn settled(&self) -> u64 {
        self.processed + self.failed + self.quarantined + self.dead_lettered + self.duplicates
    }
}
