//! The payload written into a recorder's ring.

/// Number of machine-word argument slots carried per event. Four covers the
/// overwhelming majority of call sites in practice; `Recorder::record`
/// takes exactly this many, so callers with more arguments must truncate
/// before calling.
pub const ARGS: usize = 4;

/// One recorded event: a timestamp, a global order, the call site's
/// `where`/`format` strings (owned by the caller, expected to live at least
/// as long as the process, typically `&'static str` string literals), and
/// up to [`ARGS`] machine-word arguments.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub timestamp: u64,
    pub order: u64,
    pub where_: &'static str,
    pub format: &'static str,
    pub args: [usize; ARGS],
}

impl Default for Event {
    fn default() -> Self {
        Self {
            timestamp: 0,
            order: 0,
            where_: "",
            format: "",
            args: [0; ARGS],
        }
    }
}

/// Bit-puns a float into a machine word for storage in `Event::args`. The
/// inverse is [`f64_from_word`].
#[inline]
pub fn word_from_f64(v: f64) -> usize {
    v.to_bits() as usize
}

/// Inverse of [`word_from_f64`].
#[inline]
pub fn f64_from_word(w: usize) -> f64 {
    f64::from_bits(w as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_round_trips_through_word() {
        for v in [0.0, -1.0, 3.14159, f64::MIN, f64::MAX] {
            assert_eq!(f64_from_word(word_from_f64(v)), v);
        }
    }
}
