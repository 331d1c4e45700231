//! The buffer pool: raw block arena, descriptor arena and backpressure.
//!
//! A [`Pool`] owns two fixed-size arenas:
//!
//! - the **data arena**: `block_count` raw blocks of `block_size` bytes in
//!   one memfd mapping
//! - the **descriptor arena**: `block_count * descriptor_refcoef` descriptor
//!   blocks, each holding the segment table of one buffer record
//!
//! [`Pool::take`] pops raw blocks from the data arena's free list in FIFO
//! order until they cover the request, trims the last segment to the exact
//! size and wraps the segments in a record with a pooled descriptor. Records
//! that need more segments than a descriptor holds, or that find the
//! descriptor arena empty, get a heap-allocated segment table instead.
//!
//! Every segment holds its own reference on its raw block. Records that
//! share bytes (duplicates, splits, splices) share raw blocks, never
//! descriptors. A raw block returns to the free list when its last segment
//! goes away.
//!
//! # Backpressure
//!
//! Running out of memory is an expected outcome: [`Pool::take`] returns
//! `None` and the caller registers a [`RetryNotify`] callback with
//! [`Pool::register_pending`] (or uses [`Pool::take_or_register`]). When
//! blocks are freed the pool tells waiting consumers, oldest first, to try
//! again, never more than the freed blocks can serve. See
//! [`pending`](self::pending) for the threading rules.
//!
//! # Example
//!
//! ```rust,ignore
//! use segbuf::pool::{Pool, PoolConfig};
//!
//! let pool = Pool::new(PoolConfig::new(1024, 4))?;
//! let buffer = pool.take(2500, false).expect("pool has room");
//! assert_eq!(buffer.segment_count(), 3);
//! assert_eq!(pool.free_blocks(), 1);
//! drop(buffer);
//! assert_eq!(pool.free_blocks(), 4);
//! ```

mod arena;
mod config;
mod pending;

pub use config::PoolConfig;
pub use pending::{ConsumerId, PendingToken, PoolEvent, RetryNotify};

use self::arena::Arenas;
use self::pending::{PendingQueue, PendingRequest, RetryGuard, Wakeup};
use crate::buffer::{BufferHandle, Record, Segment};
use crate::error::{Error, Result};
use crate::memory::SlotId;
use crate::observability::{self, PoolMetrics};
use parking_lot::Mutex;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

/// Global counter for unique pool IDs.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

fn next_pool_id() -> u64 {
    NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Report a broken pool invariant and stop.
#[cold]
#[track_caller]
pub(crate) fn corrupted(err: Error) -> ! {
    tracing::error!(error = %err, "pool invariant violated");
    panic!("{err}")
}

/// Result of [`Pool::take_or_register`].
#[derive(Debug)]
pub enum TakeOutcome {
    /// The allocation succeeded.
    Ready(BufferHandle),
    /// The request was queued; the callback fires when it likely fits.
    Pending(PendingToken),
}

impl TakeOutcome {
    /// The buffer, if the allocation succeeded.
    pub fn ready(self) -> Option<BufferHandle> {
        match self {
            TakeOutcome::Ready(buffer) => Some(buffer),
            TakeOutcome::Pending(_) => None,
        }
    }

    /// True if the request was queued.
    pub fn is_pending(&self) -> bool {
        matches!(self, TakeOutcome::Pending(_))
    }
}

/// Snapshot of a pool's occupancy and activity.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStats {
    /// Pool name.
    pub name: String,
    /// Whether the arenas exist.
    pub configured: bool,
    /// Raw block size in bytes (0 if unconfigured).
    pub block_size: usize,
    /// Number of raw blocks.
    pub block_count: usize,
    /// Raw blocks on the free list.
    pub free_blocks: usize,
    /// Number of descriptor blocks.
    pub descriptor_count: usize,
    /// Descriptor blocks on the free list.
    pub free_descriptors: usize,
    /// Segment capacity of a pooled descriptor.
    pub max_segments: usize,
    /// Fraction of raw block bytes referenced.
    pub used_ratio: f64,
    /// Queued pending requests.
    pub pending: usize,
    /// Arena configuration stamp.
    pub change_counter: u64,
    /// Successful allocations.
    pub takes: u64,
    /// Refused allocations.
    pub take_failures: u64,
    /// Records that fell back to a heap segment table.
    pub heap_descriptors: u64,
    /// Consumers told to retry.
    pub pending_served: u64,
}

#[derive(Debug, Default)]
struct Counters {
    takes: AtomicU64,
    failures: AtomicU64,
    heap_descriptors: AtomicU64,
    served: AtomicU64,
}

/// Arena state guarded by the pool mutex.
struct PoolState {
    arenas: Option<Arenas>,
}

/// Blocks popped for one allocation, before segments are built.
struct Reservation {
    blocks: Vec<(SlotId, NonNull<u8>, usize)>,
    descriptor: Option<(SlotId, Vec<Segment>)>,
    max_segments: usize,
}

/// A segment table about to become a record.
struct Table {
    descriptor: Option<SlotId>,
    segments: Vec<Segment>,
    capacity: usize,
}

/// State shared by every clone of a [`Pool`] and every segment it backs.
pub(crate) struct PoolShared {
    id: u64,
    config: PoolConfig,
    state: Mutex<PoolState>,
    change_counter: AtomicU64,
    pending: Mutex<PendingQueue>,
    wakeup: Wakeup,
    retry: RetryGuard,
    home: Mutex<ThreadId>,
    metrics: PoolMetrics,
    counters: Counters,
}

// ============================================================================
// Arena bookkeeping (PoolShared)
// ============================================================================

impl PoolShared {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn bump_change_counter(&self) {
        self.change_counter.fetch_add(1, Ordering::AcqRel);
    }

    /// The arenas, configuring them from the pool config if allowed.
    fn arenas_or_configure<'a>(&self, state: &'a mut PoolState) -> Result<&'a mut Arenas> {
        if state.arenas.is_none() {
            if !self.config.auto_configure {
                return Err(Error::PoolNotConfigured);
            }
            state.arenas = Some(Arenas::new(&self.config)?);
            self.bump_change_counter();
            tracing::debug!(
                pool = %self.config.name,
                block_size = self.config.block_size,
                block_count = self.config.block_count,
                descriptors = self.config.descriptor_count(),
                "pool configured lazily"
            );
        }
        state.arenas.as_mut().ok_or(Error::PoolNotConfigured)
    }

    /// Pop raw blocks covering `size` bytes plus a descriptor if one fits.
    fn reserve(&self, size: usize, must_reserve: bool) -> Result<Reservation> {
        let mut state = self.state.lock();
        let arenas = self.arenas_or_configure(&mut state)?;

        let slab = arenas.blocks.slab();
        if must_reserve && slab.free_count() == 0 {
            return Err(Error::PoolExhausted);
        }
        let available = slab.free_bytes();
        if available < size {
            return Err(Error::InsufficientTotalCapacity {
                requested: size,
                available,
            });
        }

        let block_size = arenas.block_size();
        let count = size.div_ceil(block_size);
        let mut blocks = Vec::with_capacity(count);
        let mut remaining = size;
        for _ in 0..count {
            let Some(id) = arenas.blocks.slab_mut().pop_free() else {
                corrupted(Error::PoolCorrupted(format!(
                    "free list shorter than its {available} free bytes"
                )));
            };
            let len = remaining.min(block_size);
            blocks.push((id, arenas.blocks.block_ptr(id), len));
            remaining -= len;
        }

        let max_segments = arenas.descriptors.max_segments();
        let descriptor = if count <= max_segments {
            arenas.descriptors.take()
        } else {
            None
        };
        Ok(Reservation {
            blocks,
            descriptor,
            max_segments,
        })
    }

    /// Add one reference to each block. Panics on a broken invariant.
    pub(crate) fn retain_blocks(&self, ids: &[SlotId]) {
        if ids.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        let Some(arenas) = state.arenas.as_mut() else {
            corrupted(Error::PoolCorrupted(format!(
                "retain of {} blocks on an unconfigured pool",
                ids.len()
            )));
        };
        let slab = arenas.blocks.slab_mut();
        for &id in ids {
            if let Err(err) = slab.retain(id) {
                corrupted(err);
            }
        }
    }

    /// Drop one reference from each block. Returns true if any block became
    /// free, in which case pending requests are retried.
    pub(crate) fn release_blocks(&self, ids: &[SlotId]) -> bool {
        if ids.is_empty() {
            return false;
        }
        let freed = {
            let mut state = self.state.lock();
            let Some(arenas) = state.arenas.as_mut() else {
                corrupted(Error::PoolCorrupted(format!(
                    "release of {} blocks on an unconfigured pool",
                    ids.len()
                )));
            };
            release_in(arenas, ids)
        };
        if freed > 0 {
            self.blocks_freed(freed);
        }
        freed > 0
    }

    /// Whether the free blocks could cover a request of `size` bytes.
    fn can_satisfy(&self, size: usize) -> bool {
        let state = self.state.lock();
        match &state.arenas {
            Some(arenas) => {
                let slab = arenas.blocks.slab();
                slab.free_count() > 0 && slab.free_bytes() >= size
            }
            None => self.config.auto_configure,
        }
    }

    // ========================================================================
    // Pending requests
    // ========================================================================

    fn on_home_thread(&self) -> bool {
        *self.home.lock() == thread::current().id()
    }

    /// React to `freed` blocks becoming free: retry now on the home thread,
    /// otherwise post a wake-up for it.
    fn blocks_freed(&self, freed: usize) {
        if self.pending.lock().len() == 0 {
            return;
        }
        if self.on_home_thread() {
            self.process_pending(freed);
        } else if self.wakeup.schedule() {
            tracing::trace!(pool = %self.config.name, "retry wake-up posted");
        }
    }

    /// Blocks a retry pass starting now may hand out.
    fn free_budget(&self) -> usize {
        let state = self.state.lock();
        match &state.arenas {
            Some(arenas) => arenas.blocks.slab().free_count(),
            None if self.config.auto_configure => self.config.block_count,
            None => 0,
        }
    }

    /// Blocks a request of `size` bytes occupies.
    fn block_demand(&self, size: usize) -> usize {
        let state = self.state.lock();
        let block_size = state
            .arenas
            .as_ref()
            .map_or(self.config.block_size, Arenas::block_size);
        size.div_ceil(block_size).max(1)
    }

    /// Pop the head request if the free blocks and what is left of the
    /// pass budget both cover it. Its demand is taken from `budget`.
    fn next_satisfiable(&self, budget: &mut usize) -> Option<PendingRequest> {
        let mut pending = self.pending.lock();
        let size = pending.front_size()?;
        if !self.can_satisfy(size) {
            return None;
        }
        let demand = self.block_demand(size);
        if demand > *budget {
            return None;
        }
        *budget -= demand;
        pending.pop_front()
    }

    /// Notify pending consumers, oldest first, until the head request no
    /// longer fits the pass budget. Callbacks run with no pool lock held.
    ///
    /// The budget starts at the free block count. Blocks freed by callbacks
    /// (`freed` on a nested call) are added to it.
    fn process_pending(&self, freed: usize) -> usize {
        let Some(pass) = self.retry.enter(freed) else {
            return 0;
        };
        let mut budget = self.free_budget();
        let mut served = 0;
        loop {
            while let Some(request) = self.next_satisfiable(&mut budget) {
                tracing::trace!(
                    pool = %self.config.name,
                    consumer = %request.consumer,
                    size = request.size,
                    "pending request retried"
                );
                request.fire();
                served += 1;
            }
            let more = pass.take_freed();
            if more == 0 {
                break;
            }
            budget += more;
        }
        drop(pass);

        if served > 0 {
            self.counters.served.fetch_add(served as u64, Ordering::Relaxed);
            self.metrics.record_served(served);
        }
        self.metrics.record_pending(self.pending.lock().len());
        served
    }
}

/// Release `ids` inside already locked arenas. Returns how many blocks
/// went back on the free list.
fn release_in(arenas: &mut Arenas, ids: &[SlotId]) -> usize {
    let slab = arenas.blocks.slab_mut();
    let mut freed = 0;
    for &id in ids {
        match slab.release(id) {
            Ok(now_free) => freed += usize::from(now_free),
            Err(err) => corrupted(err),
        }
    }
    freed
}

// ============================================================================
// Pool
// ============================================================================

/// A pool of raw blocks and descriptor blocks.
///
/// Cloning a `Pool` is cheap and yields another handle to the same arenas.
/// The pool is `Send + Sync`; buffers it hands out are not (see
/// [`BufferHandle`] and [`SendBuffer`](crate::buffer::SendBuffer)).
///
/// The thread that creates the pool is its home thread: pending-request
/// callbacks only run there. Use [`Pool::bind_home_thread`] to move it.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Create an unconfigured pool. The arenas are built by [`Pool::configure`],
    /// [`Pool::allocate`], or lazily by the first allocation when
    /// `config.auto_configure` is set.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        observability::init_metrics();
        let metrics = PoolMetrics::new(&config.name);
        Ok(Self {
            shared: Arc::new(PoolShared {
                id: next_pool_id(),
                config,
                state: Mutex::new(PoolState { arenas: None }),
                change_counter: AtomicU64::new(0),
                pending: Mutex::new(PendingQueue::default()),
                wakeup: Wakeup::new(),
                retry: RetryGuard::default(),
                home: Mutex::new(thread::current().id()),
                metrics,
                counters: Counters::default(),
            }),
        })
    }

    /// Create a pool and build its arenas immediately.
    pub fn configured(config: PoolConfig) -> Result<Self> {
        let pool = Self::new(config)?;
        pool.configure()?;
        Ok(pool)
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    /// Unique pool id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Pool name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The configuration the pool was created with.
    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// True if both pool handles refer to the same pool.
    #[inline]
    pub fn same_pool(&self, other: &Pool) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Build the arenas from the pool's own config.
    pub fn configure(&self) -> Result<()> {
        self.configure_with(&self.shared.config)
    }

    /// Build the arenas with explicit sizes.
    ///
    /// Returns false if the arenas already exist (live arenas are never
    /// resized) or if the sizes are invalid or cannot be mapped.
    pub fn allocate(&self, block_size: usize, block_count: usize, descriptor_refcoef: usize) -> bool {
        let config = PoolConfig {
            block_size,
            block_count,
            descriptor_refcoef,
            ..self.shared.config.clone()
        };
        match self.configure_with(&config) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(pool = %self.name(), error = %err, "allocate refused");
                false
            }
        }
    }

    fn configure_with(&self, config: &PoolConfig) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if state.arenas.is_some() {
                return Err(Error::AlreadyConfigured);
            }
            state.arenas = Some(Arenas::new(config)?);
        }
        self.shared.bump_change_counter();
        tracing::debug!(
            pool = %self.name(),
            block_size = config.block_size,
            block_count = config.block_count,
            descriptors = config.descriptor_count(),
            max_segments = config.max_segments,
            "pool configured"
        );
        self.shared.blocks_freed(config.block_count);
        Ok(())
    }

    /// True if the arenas exist.
    pub fn is_configured(&self) -> bool {
        self.shared.state.lock().arenas.is_some()
    }

    /// Tear down the arenas.
    ///
    /// Refused with [`Error::PoolInUse`] while any raw block or descriptor is
    /// still referenced. Tearing down an unconfigured pool is a no-op.
    pub fn release(&self) -> Result<()> {
        let arenas = {
            let mut state = self.shared.state.lock();
            let Some(arenas) = state.arenas.as_ref() else {
                return Ok(());
            };
            let blocks = arenas.blocks.slab().used_count();
            let descriptors = arenas.descriptors.slab().used_count();
            if blocks > 0 || descriptors > 0 {
                tracing::warn!(
                    pool = %self.name(),
                    blocks,
                    descriptors,
                    "pool teardown refused while buffers are live"
                );
                return Err(Error::PoolInUse {
                    blocks,
                    descriptors,
                });
            }
            state.arenas.take()
        };
        drop(arenas);
        self.shared.bump_change_counter();
        tracing::debug!(pool = %self.name(), "pool arenas released");
        Ok(())
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate a buffer of exactly `size` bytes.
    ///
    /// Returns `None` when the pool cannot serve the request: with
    /// `must_reserve` set that includes "no raw block is free at all". The
    /// caller is expected to register as pending and retry.
    pub fn take(&self, size: usize, must_reserve: bool) -> Option<BufferHandle> {
        self.try_take(size, must_reserve).ok()
    }

    /// Like [`Pool::take`] but reports why the allocation failed.
    pub fn take_strict(&self, size: usize, must_reserve: bool) -> Result<BufferHandle> {
        self.try_take(size, must_reserve).inspect_err(|err| {
            tracing::warn!(pool = %self.name(), size, error = %err, "strict allocation failed");
        })
    }

    fn try_take(&self, size: usize, must_reserve: bool) -> Result<BufferHandle> {
        let reservation = match self.shared.reserve(size, must_reserve) {
            Ok(reservation) => reservation,
            Err(err) => {
                self.shared.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.shared.metrics.record_failure();
                observability::trace_exhausted(self.name(), size, &err);
                return Err(err);
            }
        };

        let Reservation {
            blocks,
            descriptor,
            max_segments,
        } = reservation;
        let count = blocks.len();
        let pooled_descriptor = descriptor.is_some();
        let mut table = match descriptor {
            Some((id, segments)) => Table {
                descriptor: Some(id),
                segments,
                capacity: max_segments,
            },
            None => self.heap_table(count.max(max_segments)),
        };
        table.segments.extend(
            blocks
                .into_iter()
                .map(|(id, ptr, len)| Segment::pooled(Arc::clone(&self.shared), id, ptr, len)),
        );

        self.shared.counters.takes.fetch_add(1, Ordering::Relaxed);
        self.shared.metrics.record_take(count);
        observability::trace_take(self.name(), size, count, pooled_descriptor);
        Ok(self.finish(table))
    }

    /// An empty record that can hold up to `capacity` segments.
    ///
    /// Uses a pooled descriptor when `capacity` fits one, a heap table
    /// otherwise. Never fails: an unconfigured pool also yields a heap table.
    pub fn take_empty(&self, capacity: usize) -> BufferHandle {
        let mut table = self.acquire_table(capacity);
        table.capacity = capacity;
        self.finish(table)
    }

    /// New record sharing `count` segments of `src` starting at `first`.
    pub fn duplicate(&self, src: &BufferHandle, first: usize, count: usize) -> Result<BufferHandle> {
        let record = src.record();
        let len = record.segments.len();
        let end = first
            .checked_add(count)
            .filter(|&end| end <= len)
            .ok_or(Error::OutOfRange {
                position: first.saturating_add(count),
                limit: len,
            })?;
        let segments = self.increase_segment_refs(&record.segments[first..end]);
        drop(record);
        Ok(self.record_from_segments(segments))
    }

    /// New record holding a physical copy of `src`'s bytes.
    pub fn copy_deep(&self, src: &BufferHandle) -> Result<BufferHandle> {
        let total = src.total_size();
        let dst = self.try_take(total, false)?;
        {
            let mut to = dst.cursor();
            let mut from = src.cursor();
            to.copy_from(&mut from, total);
        }
        Ok(dst)
    }

    /// Wrap already referenced segments in a new record of this pool.
    pub fn record_from_segments(&self, segments: Vec<Segment>) -> BufferHandle {
        let mut table = self.acquire_table(segments.len());
        table.segments.extend(segments);
        self.finish(table)
    }

    /// A pooled descriptor table if `needed` fits one and one is free,
    /// otherwise a heap table.
    fn acquire_table(&self, needed: usize) -> Table {
        let pooled = {
            let mut state = self.shared.state.lock();
            match self.shared.arenas_or_configure(&mut state) {
                Ok(arenas) if needed <= arenas.descriptors.max_segments() => {
                    let max_segments = arenas.descriptors.max_segments();
                    arenas
                        .descriptors
                        .take()
                        .map(|(id, segments)| (id, segments, max_segments))
                }
                _ => None,
            }
        };
        match pooled {
            Some((id, segments, max_segments)) => Table {
                descriptor: Some(id),
                segments,
                capacity: max_segments,
            },
            None => self.heap_table(needed.max(self.shared.config.max_segments)),
        }
    }

    fn heap_table(&self, capacity: usize) -> Table {
        self.shared
            .counters
            .heap_descriptors
            .fetch_add(1, Ordering::Relaxed);
        Table {
            descriptor: None,
            segments: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn finish(&self, table: Table) -> BufferHandle {
        BufferHandle::from_record(Record::new(
            table.segments,
            table.capacity,
            Some(self.clone()),
            table.descriptor,
        ))
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    /// Release a record whose last handle went away.
    ///
    /// Drops every segment's block reference and returns the descriptor with
    /// its table. Returns true if any raw block became free.
    pub(crate) fn release_record(&self, record: &mut Record) -> bool {
        let mut segments = std::mem::take(&mut record.segments);
        let ids: Vec<SlotId> = segments
            .iter_mut()
            .filter_map(|segment| segment.detach_from(&self.shared))
            .collect();
        // Heap and foreign-pool segments release themselves here.
        segments.clear();

        let descriptor = record.descriptor.take();
        if ids.is_empty() && descriptor.is_none() {
            return false;
        }

        let freed = {
            let mut state = self.shared.state.lock();
            let Some(arenas) = state.arenas.as_mut() else {
                corrupted(Error::PoolCorrupted(format!(
                    "record released into unconfigured pool {}",
                    self.name()
                )));
            };
            if let Some(id) = descriptor {
                if let Err(err) = arenas.descriptors.give_back(id, segments) {
                    corrupted(err);
                }
            }
            release_in(arenas, &ids)
        };
        observability::trace_release(self.name(), ids.len(), freed > 0);
        if freed > 0 {
            self.shared.blocks_freed(freed);
        }
        freed > 0
    }

    /// New references to `segments`, taken under one lock.
    ///
    /// Segments from other pools or the heap are cloned individually.
    pub fn increase_segment_refs(&self, segments: &[Segment]) -> Vec<Segment> {
        let ids: Vec<SlotId> = segments
            .iter()
            .filter_map(|segment| segment.block_in(&self.shared))
            .collect();
        self.shared.retain_blocks(&ids);
        segments
            .iter()
            .map(|segment| match segment.block_in(&self.shared) {
                Some(_) => segment.shallow_copy(),
                None => segment.clone(),
            })
            .collect()
    }

    /// Drop `segments`, releasing this pool's blocks under one lock.
    /// Returns true if any raw block became free.
    pub fn decrease_segment_refs(&self, mut segments: Vec<Segment>) -> bool {
        let ids: Vec<SlotId> = segments
            .iter_mut()
            .filter_map(|segment| segment.detach_from(&self.shared))
            .collect();
        drop(segments);
        self.shared.release_blocks(&ids)
    }

    /// Current refcount of raw block `id`, `None` if unknown or unconfigured.
    pub fn block_refcount(&self, id: SlotId) -> Option<u32> {
        let state = self.shared.state.lock();
        state.arenas.as_ref()?.blocks.slab().refcount(id)
    }

    // ========================================================================
    // Backpressure
    // ========================================================================

    /// Queue a request for `size` bytes. `notify` fires once, on the home
    /// thread, when the request is at the head of the queue and fits.
    ///
    /// A callback that captures a clone of this pool keeps the pool alive
    /// until it fires or is withdrawn.
    pub fn register_pending<N>(&self, consumer: ConsumerId, size: usize, notify: N) -> PendingToken
    where
        N: RetryNotify + 'static,
    {
        let (token, depth) = {
            let mut pending = self.shared.pending.lock();
            let token = pending.push(consumer, size, Box::new(notify));
            (token, pending.len())
        };
        self.shared.metrics.record_pending(depth);
        tracing::trace!(pool = %self.name(), %consumer, size, depth, "pending request registered");
        token
    }

    /// Take `size` bytes with `must_reserve`, or queue the request.
    ///
    /// If memory was freed between the failed attempt and the registration,
    /// the retry pass runs right away (on the home thread) or is scheduled.
    pub fn take_or_register<N>(&self, consumer: ConsumerId, size: usize, notify: N) -> TakeOutcome
    where
        N: RetryNotify + 'static,
    {
        if let Some(buffer) = self.take(size, true) {
            return TakeOutcome::Ready(buffer);
        }
        let token = self.register_pending(consumer, size, notify);
        if self.shared.can_satisfy(size) {
            self.shared.blocks_freed(0);
        }
        TakeOutcome::Pending(token)
    }

    /// Withdraw a queued request. Returns false if it was already served.
    pub fn withdraw_pending(&self, token: PendingToken) -> bool {
        let (withdrawn, depth) = {
            let mut pending = self.shared.pending.lock();
            (pending.withdraw(token), pending.len())
        };
        self.shared.metrics.record_pending(depth);
        // The request's callback is dropped outside the lock.
        withdrawn.is_some()
    }

    /// Number of queued requests.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Consumers currently queued, oldest first.
    pub fn pending_consumers(&self) -> Vec<ConsumerId> {
        self.shared.pending.lock().consumers()
    }

    /// Run a retry pass now. Returns the number of consumers notified.
    ///
    /// Usually driven by releases; exposed for event loops that want to
    /// retry after reconfiguring or on a timer.
    pub fn retry_pending(&self) -> usize {
        self.shared.process_pending(0)
    }

    /// Make the calling thread the pool's home thread.
    pub fn bind_home_thread(&self) {
        *self.shared.home.lock() = thread::current().id();
    }

    /// True if called on the pool's home thread.
    pub fn is_home_thread(&self) -> bool {
        self.shared.on_home_thread()
    }

    /// Receiver for the pool's wake-up events, for event loops that select
    /// over several sources. Hand received events to [`Pool::handle_event`].
    pub fn event_receiver(&self) -> kanal::Receiver<PoolEvent> {
        self.shared.wakeup.receiver()
    }

    /// Handle one event on the home thread. Returns consumers notified.
    pub fn handle_event(&self, event: PoolEvent) -> usize {
        match event {
            PoolEvent::RetryPending => {
                self.shared.wakeup.clear();
                self.shared.process_pending(0)
            }
        }
    }

    /// Drain and handle all queued events without blocking.
    /// Returns the number of events handled.
    pub fn poll_events(&self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.shared.wakeup.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Fraction of raw block bytes currently referenced.
    pub fn used_ratio(&self) -> f64 {
        let state = self.shared.state.lock();
        match &state.arenas {
            Some(arenas) => {
                let slab = arenas.blocks.slab();
                slab.used_count() as f64 / slab.slot_count() as f64
            }
            None => 0.0,
        }
    }

    /// Stamp bumped on every arena configuration and teardown.
    #[inline]
    pub fn change_counter(&self) -> u64 {
        self.shared.change_counter.load(Ordering::Acquire)
    }

    /// True if the arenas changed since `last_seen`; updates `last_seen`.
    pub fn check_and_update(&self, last_seen: &mut u64) -> bool {
        let current = self.change_counter();
        if current == *last_seen {
            return false;
        }
        *last_seen = current;
        true
    }

    /// Free raw blocks (0 if unconfigured).
    pub fn free_blocks(&self) -> usize {
        let state = self.shared.state.lock();
        state
            .arenas
            .as_ref()
            .map_or(0, |arenas| arenas.blocks.slab().free_count())
    }

    /// Free descriptor blocks (0 if unconfigured).
    pub fn free_descriptors(&self) -> usize {
        let state = self.shared.state.lock();
        state
            .arenas
            .as_ref()
            .map_or(0, |arenas| arenas.descriptors.slab().free_count())
    }

    /// Raw block ids in the order the next allocations will use them.
    pub fn free_block_ids(&self) -> Vec<SlotId> {
        let state = self.shared.state.lock();
        state
            .arenas
            .as_ref()
            .map(|arenas| arenas.blocks.slab().free_ids().collect())
            .unwrap_or_default()
    }

    /// Snapshot of occupancy and activity.
    pub fn stats(&self) -> PoolStats {
        let pending = self.pending_len();
        let state = self.shared.state.lock();
        let counters = &self.shared.counters;
        let mut stats = PoolStats {
            name: self.name().to_string(),
            configured: state.arenas.is_some(),
            block_size: 0,
            block_count: 0,
            free_blocks: 0,
            descriptor_count: 0,
            free_descriptors: 0,
            max_segments: self.shared.config.max_segments,
            used_ratio: 0.0,
            pending,
            change_counter: self.change_counter(),
            takes: counters.takes.load(Ordering::Relaxed),
            take_failures: counters.failures.load(Ordering::Relaxed),
            heap_descriptors: counters.heap_descriptors.load(Ordering::Relaxed),
            pending_served: counters.served.load(Ordering::Relaxed),
        };
        if let Some(arenas) = &state.arenas {
            let blocks = arenas.blocks.slab();
            let descriptors = arenas.descriptors.slab();
            stats.block_size = blocks.slot_size();
            stats.block_count = blocks.slot_count();
            stats.free_blocks = blocks.free_count();
            stats.descriptor_count = descriptors.slot_count();
            stats.free_descriptors = descriptors.free_count();
            stats.max_segments = arenas.descriptors.max_segments();
            stats.used_ratio = blocks.used_count() as f64 / blocks.slot_count() as f64;
        }
        stats
    }

    /// Write the pool's gauges to the installed metrics recorder.
    pub fn publish_metrics(&self) {
        observability::record_pool_stats(&self.stats());
    }

    /// Check the refcount/free-list invariant of both arenas.
    pub fn verify(&self) -> Result<()> {
        let state = self.shared.state.lock();
        let Some(arenas) = &state.arenas else {
            return Ok(());
        };
        arenas.blocks.slab().verify()?;
        let descriptors = arenas.descriptors.slab();
        descriptors.verify()?;
        for id in 0..descriptors.slot_count() as SlotId {
            if let Some(count @ 2..) = descriptors.refcount(id) {
                return Err(Error::PoolCorrupted(format!(
                    "descriptor {id} shared with refcount {count}"
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Registration support
    // ========================================================================

    /// File descriptor of the data arena, for registering it with I/O
    /// hardware or passing it to another process.
    pub fn arena_fd(&self) -> Option<RawFd> {
        let state = self.shared.state.lock();
        state.arenas.as_ref().map(|arenas| arenas.blocks.region().raw_fd())
    }

    /// Base address and length of the data arena. Valid until the change
    /// counter moves.
    pub fn arena_base(&self) -> Option<(NonNull<u8>, usize)> {
        let state = self.shared.state.lock();
        state.arenas.as_ref().map(|arenas| {
            let region = arenas.blocks.region();
            (region.base(), region.len())
        })
    }

    /// Touch every page of the data arena. Returns false if unconfigured.
    pub fn prefault(&self) -> bool {
        let state = self.shared.state.lock();
        match &state.arenas {
            Some(arenas) => {
                arenas.blocks.region().prefault();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("configured", &self.is_configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> Pool {
        Pool::configured(
            PoolConfig::new(1024, 4)
                .with_name("segbuf-pool-test")
                .with_max_segments(4),
        )
        .unwrap()
    }

    #[test]
    fn test_take_single_block() {
        let pool = small_pool();
        let buffer = pool.take(1024, false).unwrap();
        assert_eq!(buffer.segment_count(), 1);
        assert_eq!(buffer.total_size(), 1024);
        assert_eq!(pool.free_blocks(), 3);
        assert_eq!(pool.block_refcount(0), Some(1));
        drop(buffer);
        assert_eq!(pool.free_blocks(), 4);
        assert_eq!(pool.block_refcount(0), Some(0));
        pool.verify().unwrap();
    }

    #[test]
    fn test_take_uses_fifo_order() {
        let pool = small_pool();
        let a = pool.take(1, false).unwrap();
        let b = pool.take(1, false).unwrap();
        assert_eq!(a.block_id(0), Some(0));
        assert_eq!(b.block_id(0), Some(1));
        drop(a);
        // Block 0 went to the back, behind 2 and 3.
        assert_eq!(pool.free_block_ids(), vec![2, 3, 0]);
        let c = pool.take(1, false).unwrap();
        assert_eq!(c.block_id(0), Some(2));
    }

    #[test]
    fn test_must_reserve_on_empty_pool() {
        let pool = small_pool();
        let all = pool.take(4096, false).unwrap();
        assert!(pool.take(1, true).is_none());
        assert!(matches!(
            pool.take_strict(1, true),
            Err(Error::PoolExhausted)
        ));
        assert!(matches!(
            pool.take_strict(1, false),
            Err(Error::InsufficientTotalCapacity { requested: 1, available: 0 })
        ));
        drop(all);
        assert!(pool.take(1, true).is_some());
    }

    #[test]
    fn test_lazy_configuration() {
        let pool = Pool::new(PoolConfig::new(256, 2).with_name("segbuf-lazy")).unwrap();
        assert!(!pool.is_configured());
        assert_eq!(pool.change_counter(), 0);
        let buffer = pool.take(100, false).unwrap();
        assert!(pool.is_configured());
        assert_eq!(pool.change_counter(), 1);
        assert_eq!(buffer.total_size(), 100);
    }

    #[test]
    fn test_no_lazy_configuration() {
        let pool = Pool::new(
            PoolConfig::new(256, 2)
                .with_name("segbuf-manual")
                .with_auto_configure(false),
        )
        .unwrap();
        assert!(matches!(
            pool.take_strict(1, false),
            Err(Error::PoolNotConfigured)
        ));
        assert!(pool.allocate(256, 2, 1));
        assert!(!pool.allocate(512, 2, 1));
        assert_eq!(pool.stats().descriptor_count, 2);
        assert!(pool.take(1, false).is_some());
    }

    #[test]
    fn test_heap_table_fallback() {
        let pool = small_pool();
        // 4 segments fit a pooled descriptor (max_segments = 4).
        let pooled = pool.take(4096, false).unwrap();
        assert!(pooled.has_pooled_descriptor());
        drop(pooled);

        let pool = Pool::configured(
            PoolConfig::new(1024, 4)
                .with_name("segbuf-pool-test")
                .with_max_segments(2),
        )
        .unwrap();
        let wide = pool.take(3000, false).unwrap();
        assert!(!wide.has_pooled_descriptor());
        assert_eq!(wide.capacity(), 3);
        assert_eq!(pool.stats().heap_descriptors, 1);
    }

    #[test]
    fn test_release_refused_while_in_use() {
        let pool = small_pool();
        let mut stamp = pool.change_counter();
        let buffer = pool.take(10, false).unwrap();
        assert!(matches!(
            pool.release(),
            Err(Error::PoolInUse { blocks: 1, descriptors: 1 })
        ));
        drop(buffer);
        pool.release().unwrap();
        assert!(!pool.is_configured());
        assert!(pool.check_and_update(&mut stamp));
        assert!(!pool.check_and_update(&mut stamp));
    }

    #[test]
    fn test_used_ratio_and_stats() {
        let pool = small_pool();
        assert_eq!(pool.used_ratio(), 0.0);
        let buffer = pool.take(2048, false).unwrap();
        assert_eq!(pool.used_ratio(), 0.5);
        let stats = pool.stats();
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.block_count, 4);
        assert_eq!(stats.takes, 1);
        pool.publish_metrics();
        drop(buffer);
    }

    #[test]
    fn test_segment_refs_batch() {
        let pool = small_pool();
        let buffer = pool.take(2048, false).unwrap();
        let copies = {
            let segments = buffer.segments();
            pool.increase_segment_refs(&segments)
        };
        assert_eq!(pool.block_refcount(0), Some(2));
        assert_eq!(pool.block_refcount(1), Some(2));
        drop(buffer);
        assert_eq!(pool.free_blocks(), 2);
        assert!(pool.decrease_segment_refs(copies));
        assert_eq!(pool.free_blocks(), 4);
        pool.verify().unwrap();
    }

    #[test]
    #[should_panic(expected = "refcount underflow")]
    fn test_release_of_free_block_panics() {
        let pool = small_pool();
        pool.shared().release_blocks(&[0]);
    }

    #[test]
    fn test_release_counts_freed_blocks() {
        let pool = small_pool();
        let buffer = pool.take(3000, false).unwrap();
        let copy = buffer.duplicate().unwrap();
        let mut state = pool.shared().state.lock();
        let arenas = state.arenas.as_mut().unwrap();
        // The duplicate still holds every block.
        assert_eq!(release_in(arenas, &[0, 1, 2]), 0);
        assert_eq!(arenas.blocks.slab_mut().retain(0).unwrap(), 2);
        assert_eq!(arenas.blocks.slab_mut().retain(1).unwrap(), 2);
        assert_eq!(arenas.blocks.slab_mut().retain(2).unwrap(), 2);
        drop(state);
        drop(copy);
        assert_eq!(pool.free_blocks(), 1);
        drop(buffer);
        assert_eq!(pool.free_blocks(), 4);
    }

    #[test]
    fn test_arena_registration_info() {
        let pool = small_pool();
        assert!(pool.arena_fd().is_some());
        let (_, len) = pool.arena_base().unwrap();
        assert_eq!(len, 4 * 1024);
        assert!(pool.prefault());
    }
}
