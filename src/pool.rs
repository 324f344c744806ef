//! Fixed-capacity byte arenas and the pool that hands them out
//!
//! An [`Arena`] is the packed byte region holding every row's aggregator
//! intermediate state. Allocation is external: the ingestion path advances
//! a logical cursor in row-stride steps and the arena only serves views.
//! The [`ArenaPool`] provides scoped acquisition: a taken [`ArenaHolder`]
//! returns its arena to the pool on close or drop, whichever comes first.

use std::cell::UnsafeCell;
use std::sync::Arc;

use parking_lot::Mutex;

/// Fixed-capacity byte region holding packed aggregator state
///
/// The arena performs no allocation tracking, zeroing or compaction;
/// aggregators self-initialize their regions. Interior mutability lets
/// writers of disjoint regions proceed in parallel without a whole-arena
/// lock.
pub struct Arena {
    data: Box<[UnsafeCell<u8>]>,
}

// Safety: the arena hands out raw region views; all access goes through
// `slice_at`, whose callers must hold the lock that serializes their
// region (see the metric-binding locks in `index`). Regions of distinct
// metrics never overlap, so disjoint writes cannot race.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Allocate a zeroed arena of `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
        }
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Mutable view of `len` bytes starting at `offset`
    ///
    /// # Safety
    ///
    /// The caller must guarantee exclusive access to
    /// `[offset, offset + len)` for the lifetime of the returned slice,
    /// and that the range lies within the arena. The index guarantees both:
    /// every region belongs to exactly one (row slot, metric) pair and all
    /// access to a metric's regions happens under that metric's lock.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_at(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.data.len()),
            "arena region out of bounds"
        );
        let base = UnsafeCell::raw_get(self.data.as_ptr().add(offset));
        std::slice::from_raw_parts_mut(base, len)
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.data.len())
            .finish()
    }
}

/// Pool of equal-capacity arenas
///
/// `take` reuses a previously returned arena or allocates a fresh one;
/// the pool never blocks and grows on demand.
///
/// # Example
///
/// ```
/// use magma::pool::ArenaPool;
///
/// let pool = ArenaPool::new(1024);
/// let mut holder = pool.take();
/// assert_eq!(holder.arena().unwrap().capacity(), 1024);
/// holder.close();
/// assert!(holder.arena().is_none());
/// ```
#[derive(Debug)]
pub struct ArenaPool {
    capacity: usize,
    free: Mutex<Vec<Arena>>,
}

impl ArenaPool {
    /// Create a pool of arenas with `capacity` bytes each
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            free: Mutex::new(Vec::new()),
        })
    }

    /// Per-arena capacity in bytes
    pub fn arena_capacity(&self) -> usize {
        self.capacity
    }

    /// Number of arenas currently sitting in the free list
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Take an arena out of the pool
    pub fn take(self: &Arc<Self>) -> ArenaHolder {
        let arena = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Arena::with_capacity(self.capacity));
        ArenaHolder {
            arena: Some(arena),
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, arena: Arena) {
        self.free.lock().push(arena);
    }
}

/// Scoped ownership of a pooled arena
///
/// The arena flows back to its pool on [`close`](ArenaHolder::close) or on
/// drop. Close is idempotent; after it, [`arena`](ArenaHolder::arena)
/// returns `None`.
#[derive(Debug)]
pub struct ArenaHolder {
    arena: Option<Arena>,
    pool: Arc<ArenaPool>,
}

impl ArenaHolder {
    /// The held arena, or `None` once closed
    pub fn arena(&self) -> Option<&Arena> {
        self.arena.as_ref()
    }

    /// Return the arena to the pool
    pub fn close(&mut self) {
        if let Some(arena) = self.arena.take() {
            self.pool.give_back(arena);
        }
    }
}

impl Drop for ArenaHolder {
    fn drop(&mut self) {
        self.close();
    }
}
