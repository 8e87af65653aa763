//! Lock-free bounded FIFO with overrun recovery, the core building block
//! underlying every recorder channel.
//!
//! This ring is multi-producer: any number of threads, including signal
//! handler context, may call [`Ring::write`] concurrently. A producer
//! never waits for the reader; if its claim would overrun the reader, it
//! credits the reader forward itself and counts the loss in `overflow`.
//! The claim/commit/catch-up algorithm lives in `ring_core`, shared with
//! the shared-memory sample rings.
//!
//! # Memory ordering
//!
//! - `writer`: relaxed FAA (the FAA itself is a total order; no one needs to
//!   synchronize on its value alone).
//! - `commit`: Release on the producer's publishing FAA, Acquire on the
//!   reader's load: this is the sole producer/consumer handoff.
//! - `reader`: relaxed load/store by the canonical reader path, CAS'd by
//!   overrun recovery so two concurrent overruns cannot both advance past
//!   each other (see `ring_core::claim`).

use crate::ring_core;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// 128-byte alignment to keep the hot producer/consumer counters off each
/// other's cache line (and away from the prefetcher's adjacent-line grab).
#[repr(align(128))]
struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Optional hooks around a write, invoked synchronously on the caller's
/// thread. All are plain `fn` pointers (never closures) so a recorder can
/// pass them from signal-handler context without touching the allocator.
pub type BeforeHook = fn();
pub type AfterHook = fn();
pub type OverflowHook = fn(u64);

/// A fixed-capacity, multi-producer/single-logical-reader lock-free ring.
///
/// `capacity` need not be a power of two; slot indices are computed with
/// `%` at a small cost relative to a mask.
pub struct Ring<T> {
    writer: CacheAligned<AtomicU64>,
    commit: CacheAligned<AtomicU64>,
    reader: CacheAligned<AtomicU64>,
    overflow: AtomicU64,
    capacity: u64,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: Ring<T> may be written from many threads and read from (logically)
// one; all access to `buffer` is guarded by the claim/commit/catch-up
// protocol in `ring_core`, which prevents two claimants from resolving to
// the same physical slot without intervening commit/read synchronization.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T: Copy> Ring<T> {
    /// Creates a new ring with the given capacity (any size `> 0`).
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        let mut buf = Vec::with_capacity(capacity as usize);
        buf.resize_with(capacity as usize, || UnsafeCell::new(MaybeUninit::uninit()));
        Self {
            writer: CacheAligned::new(AtomicU64::new(0)),
            commit: CacheAligned::new(AtomicU64::new(0)),
            reader: CacheAligned::new(AtomicU64::new(0)),
            overflow: AtomicU64::new(0),
            capacity,
            buffer: buf.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Count of items lost to overrun over the ring's lifetime.
    #[inline]
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Writer counter, informational: the next slot a producer will claim.
    #[inline]
    pub fn writer_index(&self) -> u64 {
        self.writer.load(Ordering::Relaxed)
    }

    /// Canonical reader counter, informational.
    #[inline]
    pub fn reader_index(&self) -> u64 {
        self.reader.load(Ordering::Relaxed)
    }

    /// Writes `items` as one contiguous claim. Never blocks, never fails:
    /// producers always succeed, possibly at the cost of overrunning the
    /// reader (accounted in `overflow` and reported to `overflow_hook`).
    /// Returns the number of items written (always `items.len()`).
    pub fn write(
        &self,
        items: &[T],
        before: Option<BeforeHook>,
        after: Option<AfterHook>,
        overflow_hook: Option<OverflowHook>,
    ) -> usize {
        let n = items.len() as u64;
        if n == 0 {
            return 0;
        }
        if let Some(f) = before {
            f();
        }

        let start = ring_core::claim(&self.writer, &self.reader, &self.overflow, self.capacity, n, overflow_hook);
        for (i, item) in items.iter().enumerate() {
            let idx = ((start + i as u64) % self.capacity) as usize;
            // SAFETY: slots [start, start+n) were exclusively claimed by this
            // FAA; no other writer can address them until a future wrap.
            unsafe {
                (*self.buffer[idx].get()).write(*item);
            }
        }
        ring_core::publish(&self.commit, n);

        if let Some(f) = after {
            f();
        }
        items.len()
    }

    /// Reads up to `buf.len()` items using the caller's own cursor. Multiple
    /// independent cursors may coexist; only the cursor that matches the
    /// ring's canonical reader advances the canonical position too.
    ///
    /// Returns 0 both when nothing is available and when `cursor` had fallen
    /// behind the canonical reader (it is snapped forward in that case);
    /// callers must retry after a zero result, per the catch-up contract.
    pub fn read(&self, buf: &mut [T], cursor: &AtomicU64, before: Option<BeforeHook>, after: Option<AfterHook>) -> usize {
        if let Some(f) = before {
            f();
        }
        let Some((start, n)) = ring_core::claim_read(&self.commit, &self.reader, cursor, buf.len() as u64) else {
            return 0;
        };
        for i in 0..n {
            let idx = ((start + i) % self.capacity) as usize;
            // SAFETY: slots [reader, commit) were fully written by a
            // producer and published via the Acquire-ordered commit load
            // inside `claim_read`.
            buf[i as usize] = unsafe { (*self.buffer[idx].get()).assume_init() };
        }
        if let Some(f) = after {
            f();
        }
        n as usize
    }

    /// Non-destructive peek at the oldest item relative to `cursor`, without
    /// advancing anything. Used by the sorted dump to compare `order`
    /// fields across recorders before deciding which ring to actually read.
    pub fn peek(&self, cursor: &AtomicU64) -> Option<T> {
        if !ring_core::peek_available(&self.commit, cursor) {
            return None;
        }
        let pos = cursor.load(Ordering::Relaxed);
        let idx = (pos % self.capacity) as usize;
        Some(unsafe { (*self.buffer[idx].get()).assume_init() })
    }

    /// Instantaneous count of items available to `cursor`.
    pub fn readable(&self, cursor: &AtomicU64) -> u64 {
        let commit = self.commit.load(Ordering::Acquire);
        let pos = cursor.load(Ordering::Relaxed).max(self.reader.load(Ordering::Relaxed));
        commit.saturating_sub(pos)
    }

    /// Instantaneous free space before the next claim would overrun the
    /// canonical reader.
    pub fn writable(&self) -> u64 {
        let writer = self.writer.load(Ordering::Relaxed);
        let reader = self.reader.load(Ordering::Relaxed);
        self.capacity.saturating_sub(writer.wrapping_sub(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn s1_single_producer_single_reader_small_ring() {
        let ring = Ring::<u64>::new(4);
        let cursor = AtomicU64::new(0);

        assert_eq!(ring.write(&[1, 2, 3, 4], None, None, None), 4);
        let mut buf = [0u64; 4];
        assert_eq!(ring.read(&mut buf, &cursor, None, None), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(ring.overflow(), 0);

        assert_eq!(ring.write(&[5, 6, 7], None, None, None), 3);
        let mut buf2 = [0u64; 3];
        assert_eq!(ring.read(&mut buf2, &cursor, None, None), 3);
        assert_eq!(buf2, [5, 6, 7]);
        assert_eq!(ring.overflow(), 0);
    }

    #[test]
    fn s2_overrun_recovery() {
        let ring = Ring::<u64>::new(4);
        let cursor = AtomicU64::new(0);

        for i in 1..=10u64 {
            ring.write(&[i], None, None, None);
        }

        let mut buf = [0u64; 4];
        // First read catches up and reports nothing.
        assert_eq!(ring.read(&mut buf, &cursor, None, None), 0);
        // Second read yields the then-oldest surviving items.
        assert_eq!(ring.read(&mut buf, &cursor, None, None), 4);
        assert_eq!(buf, [7, 8, 9, 10]);
        assert_eq!(ring.overflow(), 6);
    }

    #[test]
    fn peek_does_not_advance() {
        let ring = Ring::<u64>::new(4);
        let cursor = AtomicU64::new(0);
        ring.write(&[42], None, None, None);

        assert_eq!(ring.peek(&cursor), Some(42));
        assert_eq!(ring.peek(&cursor), Some(42));
        assert_eq!(ring.readable(&cursor), 1);

        let mut buf = [0u64; 1];
        assert_eq!(ring.read(&mut buf, &cursor, None, None), 1);
        assert_eq!(ring.peek(&cursor), None);
    }

    #[test]
    fn concurrent_producers_no_loss_within_capacity() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(Ring::<u64>::new(1024));
        let mut handles = vec![];
        for t in 0..8u64 {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..100u64 {
                    ring.write(&[t * 100 + i], None, None, None);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let cursor = AtomicU64::new(0);
        let mut seen = Vec::new();
        let mut buf = [0u64; 64];
        loop {
            let n = ring.read(&mut buf, &cursor, None, None);
            if n == 0 && ring.readable(&cursor) == 0 {
                break;
            }
            seen.extend_from_slice(&buf[..n]);
        }
        assert_eq!(seen.len(), 800);
        assert_eq!(ring.overflow(), 0);
    }
}
