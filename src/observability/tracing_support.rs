//! Tracing spans and events for pool activity.

use tracing::{Level, Span, span};

/// Create a span for work on one pool.
///
/// # Example
///
/// ```rust,ignore
/// use segbuf::observability::span_pool;
///
/// let span = span_pool("readout");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_pool(name: &str) -> Span {
    span!(Level::DEBUG, "pool", name = %name)
}

/// Enter a pool span and return the guard.
pub fn instrument_pool(name: &str) -> tracing::span::EnteredSpan {
    span_pool(name).entered()
}

/// Log an allocation.
#[inline]
pub fn trace_take(pool: &str, size: usize, segments: usize, pooled_descriptor: bool) {
    tracing::trace!(
        pool = %pool,
        size,
        segments,
        pooled_descriptor,
        "buffer taken"
    );
}

/// Log a record going back to the pool.
#[inline]
pub fn trace_release(pool: &str, blocks: usize, freed: bool) {
    tracing::trace!(pool = %pool, blocks, freed, "buffer released");
}

/// Log a refused allocation.
#[inline]
pub fn trace_exhausted(pool: &str, size: usize, error: &dyn std::error::Error) {
    tracing::debug!(pool = %pool, size, error = %error, "allocation refused");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_creation() {
        let _span = span_pool("test-pool");
        let _guard = instrument_pool("test-pool");
    }

    #[test]
    fn test_trace_functions() {
        // No subscriber installed; must not panic.
        trace_take("test", 100, 1, true);
        trace_release("test", 1, true);
        trace_exhausted("test", 100, &crate::Error::PoolExhausted);
    }
}
