//! Observability: metrics and tracing.
//!
//! - **Metrics**: counters, gauges and a histogram via `metrics-rs`
//! - **Tracing**: spans and events via `tracing`
//!
//! ## Metrics
//!
//! Every metric carries a `pool` label with the pool's name.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `segbuf_pool_used_ratio` | Gauge | Fraction of raw block bytes referenced |
//! | `segbuf_pool_free_blocks` | Gauge | Free raw blocks |
//! | `segbuf_pool_free_descriptors` | Gauge | Free descriptor blocks |
//! | `segbuf_pending_requests` | Gauge | Requests waiting for memory |
//! | `segbuf_take_total` | Counter | Successful allocations |
//! | `segbuf_take_failures` | Counter | Refused allocations |
//! | `segbuf_take_segments` | Histogram | Segments per allocated record |
//! | `segbuf_pending_served` | Counter | Consumers told to retry |
//!
//! Gauges are written by [`Pool::publish_metrics`](crate::pool::Pool::publish_metrics);
//! counters are updated as the pool works.
//!
//! ## Example
//!
//! ```rust,ignore
//! use segbuf::observability::init_metrics;
//!
//! init_metrics();
//! // install an exporter (prometheus, statsd, ...) to collect them
//! ```

mod metrics;
mod tracing_support;

pub use self::metrics::{PoolMetrics, init_metrics, record_pool_stats};
pub use self::tracing_support::{
    instrument_pool, span_pool, trace_exhausted, trace_release, trace_take,
};
