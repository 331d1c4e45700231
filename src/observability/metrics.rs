//! Pool metrics using metrics-rs.

use crate::pool::PoolStats;
use metrics::{Counter, Gauge, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const POOL_USED_RATIO: &str = "segbuf_pool_used_ratio";
const POOL_FREE_BLOCKS: &str = "segbuf_pool_free_blocks";
const POOL_FREE_DESCRIPTORS: &str = "segbuf_pool_free_descriptors";
const PENDING_REQUESTS: &str = "segbuf_pending_requests";
const TAKE_TOTAL: &str = "segbuf_take_total";
const TAKE_FAILURES: &str = "segbuf_take_failures";
const TAKE_SEGMENTS: &str = "segbuf_take_segments";
const PENDING_SERVED: &str = "segbuf_pending_served";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_gauge!(
        POOL_USED_RATIO,
        Unit::Percent,
        "Fraction of raw block bytes currently referenced"
    );
    metrics::describe_gauge!(POOL_FREE_BLOCKS, Unit::Count, "Free raw blocks in the data arena");
    metrics::describe_gauge!(
        POOL_FREE_DESCRIPTORS,
        Unit::Count,
        "Free descriptor blocks in the descriptor arena"
    );
    metrics::describe_gauge!(
        PENDING_REQUESTS,
        Unit::Count,
        "Allocation requests waiting for memory"
    );
    metrics::describe_counter!(TAKE_TOTAL, Unit::Count, "Successful pool allocations");
    metrics::describe_counter!(
        TAKE_FAILURES,
        Unit::Count,
        "Pool allocations refused for lack of memory"
    );
    metrics::describe_histogram!(
        TAKE_SEGMENTS,
        Unit::Count,
        "Segments per allocated record"
    );
    metrics::describe_counter!(
        PENDING_SERVED,
        Unit::Count,
        "Pending requests whose consumer was told to retry"
    );
}

/// Publish a pool's gauges from a stats snapshot.
pub fn record_pool_stats(stats: &PoolStats) {
    let pool = stats.name.clone();
    gauge!(POOL_USED_RATIO, "pool" => pool.clone()).set(stats.used_ratio);
    gauge!(POOL_FREE_BLOCKS, "pool" => pool.clone()).set(stats.free_blocks as f64);
    gauge!(POOL_FREE_DESCRIPTORS, "pool" => pool.clone()).set(stats.free_descriptors as f64);
    gauge!(PENDING_REQUESTS, "pool" => pool).set(stats.pending as f64);
}

/// Handles for one pool's hot-path metrics, labelled once at creation.
#[derive(Clone)]
pub struct PoolMetrics {
    takes: Counter,
    failures: Counter,
    segments: Histogram,
    served: Counter,
    pending: Gauge,
}

impl PoolMetrics {
    /// Register the handles for `pool`.
    pub fn new(pool: &str) -> Self {
        Self {
            takes: counter!(TAKE_TOTAL, "pool" => pool.to_string()),
            failures: counter!(TAKE_FAILURES, "pool" => pool.to_string()),
            segments: histogram!(TAKE_SEGMENTS, "pool" => pool.to_string()),
            served: counter!(PENDING_SERVED, "pool" => pool.to_string()),
            pending: gauge!(PENDING_REQUESTS, "pool" => pool.to_string()),
        }
    }

    /// Record a successful allocation of `segments` segments.
    #[inline]
    pub fn record_take(&self, segments: usize) {
        self.takes.increment(1);
        self.segments.record(segments as f64);
    }

    /// Record a refused allocation.
    #[inline]
    pub fn record_failure(&self) {
        self.failures.increment(1);
    }

    /// Record pending requests served by one retry pass.
    #[inline]
    pub fn record_served(&self, count: usize) {
        self.served.increment(count as u64);
    }

    /// Record the pending queue depth.
    #[inline]
    pub fn record_pending(&self, depth: usize) {
        self.pending.set(depth as f64);
    }
}

impl std::fmt::Debug for PoolMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMetrics").finish_non_exhaustive()
    }
}
