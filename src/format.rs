//! printf-style format string scanning.
//!
//! The actual rendering of an [`crate::event::Event`]'s arguments into a
//! human-readable message is treated as an external collaborator's job
//! (the "entry-point formatting helpers"); this crate's core only
//! consumes an already-rendered `message` string (see `dump::render`).
//! What *is* core is scanning the format string to classify an argument's
//! conversion specifier, which the shared-memory type-inference step needs
//! regardless of who renders the final text.
//!
//! [`default_format`] below is a minimal, replaceable placeholder renderer,
//! kept for the crate's own tests/examples to produce readable output.

/// A conversion specifier's inferred shared-memory sample type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Real,
    Signed,
    Unsigned,
    Invalid,
}

/// Finds the `n`th (0-based) conversion specifier in a printf-style format
/// string and classifies it. Returns `None` if the string has fewer than
/// `n + 1` specifiers. `%%` is a literal percent and does not count.
pub fn nth_conversion(format: &str, n: usize) -> Option<ArgKind> {
    let mut chars = format.chars().peekable();
    let mut seen = 0usize;
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            continue;
        }
        // Skip flags/width/precision/length modifiers up to the conversion
        // letter itself.
        let mut conv = None;
        for c2 in chars.by_ref() {
            if c2.is_ascii_alphabetic() {
                conv = Some(c2);
                break;
            }
        }
        let Some(conv) = conv else { break };
        if seen == n {
            return Some(classify(conv));
        }
        seen += 1;
    }
    None
}

fn classify(conv: char) -> ArgKind {
    match conv {
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' => ArgKind::Real,
        'd' | 'i' => ArgKind::Signed,
        'u' | 'x' | 'X' | 'o' | 'c' | 's' | 'p' => ArgKind::Unsigned,
        _ => ArgKind::Invalid,
    }
}

/// A minimal best-effort substitution supporting the common specifiers
/// (`%d %i %u %x %X %o %c %s %f %g %p %%`), used only as the crate's default
/// `FormatFn` (see `dump::set_format`). Unsupported specifiers stop
/// rendering at the offending specifier and still terminate with whatever
/// was rendered so far.
pub fn default_format(format: &str, args: &[usize]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    let mut arg_i = 0usize;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut conv = None;
        for c2 in chars.by_ref() {
            if c2.is_ascii_alphabetic() {
                conv = Some(c2);
                break;
            }
        }
        let Some(conv) = conv else {
            return out;
        };
        let word = args.get(arg_i).copied().unwrap_or(0);
        arg_i += 1;
        match conv {
            'd' | 'i' => out.push_str(&(word as isize).to_string()),
            'u' => out.push_str(&word.to_string()),
            'x' => out.push_str(&format!("{word:x}")),
            'X' => out.push_str(&format!("{word:X}")),
            'o' => out.push_str(&format!("{word:o}")),
            'c' => {
                if let Some(ch) = char::from_u32(word as u32) {
                    out.push(ch);
                }
            }
            's' => out.push_str(&format!("{word:#x}")),
            'p' => out.push_str(&format!("{word:#x}")),
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                out.push_str(&format!("{}", f64::from_bits(word as u64)))
            }
            _ => return out,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_specifiers() {
        assert_eq!(nth_conversion("x=%d y=%f", 0), Some(ArgKind::Signed));
        assert_eq!(nth_conversion("x=%d y=%f", 1), Some(ArgKind::Real));
        assert_eq!(nth_conversion("%%d not a spec", 0), None);
        assert_eq!(nth_conversion("%u", 0), Some(ArgKind::Unsigned));
    }

    #[test]
    fn default_format_substitutes_known_specifiers() {
        let msg = default_format("n=%d f=%f", &[41, (3.5f64).to_bits() as usize]);
        assert_eq!(msg, "n=41 f=3.5");
    }

    #[test]
    fn default_format_stops_at_unsupported_specifier() {
        let msg = default_format("ok=%d bad=%zzz", &[1]);
        assert!(msg.starts_with("ok=1 bad="));
    }
}
