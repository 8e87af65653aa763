//! Debug-only sanity checks for the ring counters, compiled out entirely in
//! release builds so they cost nothing on the signal-safe hot path.
//!
//! Shared by both the in-process `Ring<T>` and the shared-memory `Shan`
//! ring, via `ring_core`.

/// A counter must never move backwards.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!($new >= $old, "{} decreased from {} to {}", $name, $old, $new)
    };
}

/// A single claim must never report more loss than it claimed.
macro_rules! debug_assert_lost_bounded {
    ($lost:expr, $n:expr) => {
        debug_assert!($lost <= $n, "reported loss {} exceeds claimed count {}", $lost, $n)
    };
}

/// After overrun recovery (if any), the claim's end must not have outrun
/// the reader by more than `capacity`.
macro_rules! debug_assert_window_bounded {
    ($writer:expr, $reader:expr, $capacity:expr) => {
        debug_assert!(
            $writer.wrapping_sub($reader) <= $capacity,
            "writer {} - reader {} exceeds capacity {}",
            $writer,
            $reader,
            $capacity
        )
    };
}

pub(crate) use debug_assert_lost_bounded;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_window_bounded;
