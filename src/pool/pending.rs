//! Backpressure: pending requests and the retry wake-up.
//!
//! A consumer that cannot get memory registers a [`PendingRequest`]. When
//! raw blocks are freed, the pool walks the queue from the front and tells
//! each consumer whose request now fits to try again. Each pass has a budget
//! of the blocks free when it started (plus any freed while it runs); every
//! notified request uses up `size.div_ceil(block_size)` blocks of it, whether
//! or not the consumer allocates right away. The walk stops at the first
//! request the budget does not cover, so a small late request never
//! overtakes a large early one.
//!
//! Releases can happen on any thread, but retries are only run on the
//! pool's home thread. A release elsewhere posts a single
//! [`PoolEvent::RetryPending`] on the pool's event channel; further
//! releases before the home thread drains it do not post again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Identifies a consumer in retry callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Token returned on registration, used to withdraw a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingToken(u64);

/// Retry callback of a pending request.
///
/// Called once, on the pool's home thread, when the request's size fits in
/// the free blocks. The callback should attempt its allocation again; if it
/// fails it may register anew (at the back of the queue).
pub trait RetryNotify: Send {
    /// The consumer's request of `size` bytes can likely be satisfied now.
    fn retry(&mut self, consumer: ConsumerId, size: usize);
}

impl<F> RetryNotify for F
where
    F: FnMut(ConsumerId, usize) + Send,
{
    fn retry(&mut self, consumer: ConsumerId, size: usize) {
        self(consumer, size)
    }
}

/// Events delivered to the pool's home thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// Blocks were freed off the home thread; pending requests should be retried.
    RetryPending,
}

/// A queued allocation request.
pub(crate) struct PendingRequest {
    pub(crate) token: PendingToken,
    pub(crate) consumer: ConsumerId,
    pub(crate) size: usize,
    pub(crate) notify: Box<dyn RetryNotify>,
}

impl PendingRequest {
    pub(crate) fn fire(mut self) {
        self.notify.retry(self.consumer, self.size);
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("token", &self.token)
            .field("consumer", &self.consumer)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// FIFO of pending requests.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    next_token: u64,
    queue: VecDeque<PendingRequest>,
}

impl PendingQueue {
    pub(crate) fn push(
        &mut self,
        consumer: ConsumerId,
        size: usize,
        notify: Box<dyn RetryNotify>,
    ) -> PendingToken {
        let token = PendingToken(self.next_token);
        self.next_token += 1;
        self.queue.push_back(PendingRequest {
            token,
            consumer,
            size,
            notify,
        });
        token
    }

    /// Remove a request by token. The request is dropped, never notified.
    pub(crate) fn withdraw(&mut self, token: PendingToken) -> Option<PendingRequest> {
        let index = self.queue.iter().position(|r| r.token == token)?;
        self.queue.remove(index)
    }

    #[inline]
    pub(crate) fn front_size(&self) -> Option<usize> {
        self.queue.front().map(|r| r.size)
    }

    #[inline]
    pub(crate) fn pop_front(&mut self) -> Option<PendingRequest> {
        self.queue.pop_front()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn consumers(&self) -> Vec<ConsumerId> {
        self.queue.iter().map(|r| r.consumer).collect()
    }
}

/// Coalescing wake-up for the home thread.
pub(crate) struct Wakeup {
    scheduled: AtomicBool,
    tx: kanal::Sender<PoolEvent>,
    rx: kanal::Receiver<PoolEvent>,
}

impl Wakeup {
    pub(crate) fn new() -> Self {
        let (tx, rx) = kanal::unbounded();
        Self {
            scheduled: AtomicBool::new(false),
            tx,
            rx,
        }
    }

    /// Post one retry event unless one is already outstanding.
    /// Returns true if an event was posted.
    pub(crate) fn schedule(&self) -> bool {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return false;
        }
        // The receiver lives as long as the pool, so sending cannot fail.
        let _ = self.tx.send(PoolEvent::RetryPending);
        true
    }

    /// Mark the outstanding event as consumed.
    pub(crate) fn clear(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    pub(crate) fn try_recv(&self) -> Option<PoolEvent> {
        self.rx.try_recv().ok().flatten()
    }

    pub(crate) fn receiver(&self) -> kanal::Receiver<PoolEvent> {
        self.rx.clone()
    }
}

/// Reentrancy guard for the retry loop.
///
/// A retry callback that frees memory would start a nested retry loop.
/// Instead the nested call adds the blocks it freed to `freed` and the
/// running pass grows its budget by that much.
#[derive(Debug, Default)]
pub(crate) struct RetryGuard {
    active: AtomicBool,
    freed: AtomicUsize,
}

impl RetryGuard {
    /// Try to become the running retry loop. `None` if one is already
    /// running, in which case `freed` blocks are credited to it.
    pub(crate) fn enter(&self, freed: usize) -> Option<RetryPass<'_>> {
        if self.active.swap(true, Ordering::AcqRel) {
            self.freed.fetch_add(freed, Ordering::AcqRel);
            return None;
        }
        self.freed.store(0, Ordering::Release);
        Some(RetryPass { guard: self })
    }
}

/// The running retry loop; leaves the guard when dropped.
pub(crate) struct RetryPass<'a> {
    guard: &'a RetryGuard,
}

impl RetryPass<'_> {
    /// Blocks freed by nested releases since the last call.
    pub(crate) fn take_freed(&self) -> usize {
        self.guard.freed.swap(0, Ordering::AcqRel)
    }
}

impl Drop for RetryPass<'_> {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn noop() -> Box<dyn RetryNotify> {
        Box::new(|_: ConsumerId, _: usize| {})
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = PendingQueue::default();
        queue.push(ConsumerId(1), 100, noop());
        queue.push(ConsumerId(2), 10, noop());
        assert_eq!(queue.front_size(), Some(100));
        assert_eq!(queue.consumers(), vec![ConsumerId(1), ConsumerId(2)]);
        assert_eq!(queue.pop_front().unwrap().consumer, ConsumerId(1));
        assert_eq!(queue.front_size(), Some(10));
    }

    #[test]
    fn test_withdraw() {
        let mut queue = PendingQueue::default();
        let a = queue.push(ConsumerId(1), 1, noop());
        let b = queue.push(ConsumerId(2), 2, noop());
        assert!(queue.withdraw(a).is_some());
        assert!(queue.withdraw(a).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_front().unwrap().token, b);
    }

    #[test]
    fn test_fire_passes_consumer_and_size() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut queue = PendingQueue::default();
        queue.push(
            ConsumerId(9),
            512,
            Box::new(move |c: ConsumerId, s: usize| sink.lock().unwrap().push((c, s))),
        );
        queue.pop_front().unwrap().fire();
        assert_eq!(*seen.lock().unwrap(), vec![(ConsumerId(9), 512)]);
    }

    #[test]
    fn test_wakeup_coalesces() {
        let wakeup = Wakeup::new();
        assert!(wakeup.schedule());
        assert!(!wakeup.schedule());
        assert_eq!(wakeup.try_recv(), Some(PoolEvent::RetryPending));
        assert_eq!(wakeup.try_recv(), None);
        wakeup.clear();
        assert!(wakeup.schedule());
    }

    #[test]
    fn test_retry_guard_reentry() {
        let guard = RetryGuard::default();
        let pass = guard.enter(0).unwrap();
        assert!(guard.enter(2).is_none());
        assert!(guard.enter(1).is_none());
        assert_eq!(pass.take_freed(), 3);
        assert_eq!(pass.take_freed(), 0);
        drop(pass);
        assert!(guard.enter(0).is_some());
    }
}
