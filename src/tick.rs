//! The monotonic tick source consumed by the hot path.
//!
//! `tick()` returns elapsed time since the first call to it, in units of
//! `HZ` per second. On the 64-bit platforms this crate targets that's
//! microseconds; a 32-bit build would need a coarser `HZ` to avoid wrapping
//! too soon, but narrow-platform support is not a goal here.

use std::sync::OnceLock;
use std::time::Instant;

/// Ticks per second. `tick()` returns microseconds.
pub const HZ: u64 = 1_000_000;

static START: OnceLock<Instant> = OnceLock::new();

/// Elapsed microseconds since the first call to `tick()` in this process.
/// Safe to call from a signal handler: after the first call lazily
/// initializes `START`, every subsequent call is a single atomic-ish read
/// through `OnceLock` plus an `Instant::elapsed` subtraction: no
/// allocation, no lock contention in the steady state.
#[inline]
pub fn tick() -> u64 {
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}
