//! The lock-free claim/commit/catch-up algorithm shared by the in-process
//! [`crate::ring::Ring`] and the shared-memory sample rings embedded in a
//! `shm::channel::ShanRaw`.
//!
//! Factoring this out keeps both ring flavors honest to the same overrun
//! recovery rule instead of drifting apart.

use crate::backoff::Backoff;
use crate::invariants::{debug_assert_lost_bounded, debug_assert_monotonic, debug_assert_window_bounded};
use std::sync::atomic::{AtomicU64, Ordering};

/// Claim `n` contiguous slots starting at the fetch-added `writer` value,
/// crediting the reader forward (and counting the loss into `overflow`) if
/// the claim overran it. Returns the start index of the claimed range.
///
/// This is the producer side of the algorithm: the FAA on `writer` is the claim, the
/// FAA on `commit` (done by the caller after writing payload into the
/// claimed slots) is the publication. Overrun recovery happens in between so
/// that a slow reader never blocks a producer.
pub(crate) fn claim(
    writer: &AtomicU64,
    reader: &AtomicU64,
    overflow: &AtomicU64,
    capacity: u64,
    n: u64,
    overflow_hook: Option<fn(u64)>,
) -> u64 {
    let start = writer.fetch_add(n, Ordering::Relaxed);
    let new_writer = start + n;
    debug_assert_monotonic!("writer", start, new_writer);

    let mut backoff = Backoff::new();
    loop {
        let reader_old = reader.load(Ordering::Relaxed);
        if new_writer.wrapping_sub(reader_old) <= capacity {
            break;
        }
        let lost = new_writer - reader_old - capacity;
        debug_assert_lost_bounded!(lost, n);
        match reader.compare_exchange(reader_old, reader_old + lost, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => {
                overflow.fetch_add(lost, Ordering::Relaxed);
                if let Some(f) = overflow_hook {
                    f(lost);
                }
                break;
            }
            Err(_) => backoff.spin(),
        }
    }
    debug_assert_window_bounded!(new_writer, reader.load(Ordering::Relaxed), capacity);
    start
}

/// Publish a claimed range by advancing `commit`. Release-ordered so a
/// reader's Acquire load of `commit` synchronizes with the payload writes
/// that happened between `claim` and this call.
pub(crate) fn publish(commit: &AtomicU64, n: u64) {
    commit.fetch_add(n, Ordering::Release);
}

/// Consumer side of the catch-up contract. `cursor` is the caller's
/// own reader position; `canonical` is the ring's shared "the" reader
/// position that overrun recovery advances.
///
/// Returns `None` (after snapping `cursor` forward) if the caller had fallen
/// behind `canonical`; the caller should retry, per the "first read may
/// fail due to catch-up, retry" contract. Returns `None` with `cursor`
/// unchanged if nothing is available. Otherwise returns `(start, n)`, the
/// physical range to read, having already advanced `cursor` (and
/// `canonical`, if the caller's cursor was exactly the canonical position).
pub(crate) fn claim_read(commit: &AtomicU64, canonical: &AtomicU64, cursor: &AtomicU64, max_n: u64) -> Option<(u64, u64)> {
    let canonical_pos = canonical.load(Ordering::Relaxed);
    let pos = cursor.load(Ordering::Relaxed);
    if pos < canonical_pos {
        cursor.store(canonical_pos, Ordering::Relaxed);
        return None;
    }

    let commit_pos = commit.load(Ordering::Acquire);
    let avail = commit_pos.saturating_sub(pos);
    if avail == 0 {
        return None;
    }
    let n = avail.min(max_n);
    let new_pos = pos + n;
    cursor.store(new_pos, Ordering::Relaxed);
    if pos == canonical_pos {
        let _ = canonical.compare_exchange(canonical_pos, new_pos, Ordering::Release, Ordering::Relaxed);
    }
    Some((pos, n))
}

/// Non-destructive peek at the oldest unread item relative to `cursor`,
/// without advancing anything. Used by the sorted dump's k-way merge to
/// compare candidate `order` values before committing to a `read`.
pub(crate) fn peek_available(commit: &AtomicU64, cursor: &AtomicU64) -> bool {
    let commit_pos = commit.load(Ordering::Acquire);
    let pos = cursor.load(Ordering::Relaxed);
    pos < commit_pos
}
