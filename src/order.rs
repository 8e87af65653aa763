//! The global cross-recorder ordering counter.
//!
//! Every event gets a single process-wide `order` value at record time, in
//! addition to its ring-local position. `dump::sort` uses `order` to merge
//! events from independently-advancing rings into one oldest-first stream.

use std::sync::atomic::{AtomicU64, Ordering};

static ORDER: AtomicU64 = AtomicU64::new(0);

/// Returns the next global order value. Relaxed is enough: `order` is a
/// tiebreaker for the merge, not a synchronization point; the actual
/// producer/consumer handoff happens on each ring's `commit` counter.
#[inline]
pub fn next() -> u64 {
    ORDER.fetch_add(1, Ordering::Relaxed)
}

/// Current order value without advancing it. Exposed for tests and for
/// diagnostics that want to report "how many events recorded so far"
/// without perturbing the counter.
#[inline]
pub fn current() -> u64 {
    ORDER.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_strictly_increasing() {
        let a = next();
        let b = next();
        let c = next();
        assert!(a < b);
        assert!(b < c);
    }
}
