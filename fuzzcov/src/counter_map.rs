//! A non-owning view over the 8-bit edge counters written by the
//! instrumentation.

use std::slice;
use std::sync::atomic::{AtomicU8, Ordering};

/// A view over a fixed-length buffer of 8-bit hit counters, one per
/// instrumented edge.
///
/// The buffer is owned by whoever allocated it (usually the instrumentation
/// runtime, through a linker section) and must outlive the view. Its length
/// never changes.
///
/// Instrumented code increments the counters without any synchronization.
/// The view only ever uses relaxed loads and stores on them, so concurrent
/// writers can lose increments or wrap a counter around, but a counter that
/// was hit at least once between two resets is always observed as hit by a
/// single-threaded test.
#[derive(Clone, Copy)]
pub struct CounterMap<'a> {
    counters: &'a [AtomicU8],
}

impl<'a> CounterMap<'a> {
    pub fn new(counters: &'a [AtomicU8]) -> Self {
        Self { counters }
    }

    /// Creates a view over a buffer the caller has exclusive access to.
    pub fn from_mut_slice(counters: &'a mut [u8]) -> Self {
        let len = counters.len();
        // SAFETY: `AtomicU8` has the same size and alignment as `u8`, and the
        // exclusive borrow guarantees nothing else accesses the buffer non-atomically
        // for `'a`.
        let counters = unsafe { slice::from_raw_parts(counters.as_mut_ptr() as *const AtomicU8, len) };
        Self { counters }
    }

    /// Creates a view over the counters in `start..start + len`.
    ///
    /// # Safety
    /// The region must be valid for reads and writes for `'a` and must not
    /// be deallocated or resized while the view exists.
    pub unsafe fn from_raw_parts(start: *mut u8, len: usize) -> Self {
        Self {
            counters: slice::from_raw_parts(start as *const AtomicU8, len),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// The current hit count of the edge, or `None` if out of range.
    #[inline]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.counters.get(index).map(|c| c.load(Ordering::Relaxed))
    }

    /// Increments the counter of an edge the way inline 8-bit counters do,
    /// wrapping around on overflow.
    #[inline]
    pub fn hit(&self, index: usize) {
        let counter = &self.counters[index];
        counter.store(counter.load(Ordering::Relaxed).wrapping_add(1), Ordering::Relaxed);
    }

    pub fn clear(&self) {
        for counter in self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + 'a {
        self.counters.iter().map(|c| c.load(Ordering::Relaxed))
    }

    /// Iterates over `(edge index, hit count)` for the edges that were hit.
    pub fn iter_hit(&self) -> impl Iterator<Item = (usize, u8)> + 'a {
        self.iter().enumerate().filter(|&(_, count)| count != 0)
    }
}
