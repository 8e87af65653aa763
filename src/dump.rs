//! Global order and sorted dump: the k-way merge that drains every
//! registered recorder's ring in strictly increasing `order`, plus the
//! render/show/format callback machinery the recorder's live-trace path
//! and `sort` both use.

use crate::event::Event;
use crate::format;
use crate::recorder::{self, Recorder};
use crate::tick::HZ;
use crate::tweak::RECORDER_DUMP_SLEEP;
use regex::Regex;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub type ShowFn = fn(bytes: &[u8], out: &mut dyn Write);
pub type RenderFn = fn(show: ShowFn, out: &mut dyn Write, name: &str, where_: &str, order: u64, timestamp: u64, message: &str);
pub type FormatFn = fn(format: &str, args: &[usize]) -> String;

fn default_show(bytes: &[u8], out: &mut dyn Write) {
    let _ = out.write_all(bytes);
}

fn default_render(show: ShowFn, out: &mut dyn Write, name: &str, where_: &str, order: u64, timestamp: u64, message: &str) {
    let seconds = timestamp as f64 / HZ as f64;
    let line = format!("{where_}: [{order} {seconds:.6}] {name}: {message}\n");
    show(line.as_bytes(), out);
}

// Replaceable at runtime via AtomicUsize-transmuted fn pointers rather than
// a Mutex<fn>, so swapping the renderer never takes a lock on a path a
// signal handler might (transitively) reach.
static RENDER: AtomicUsize = AtomicUsize::new(default_render as usize);
static SHOW: AtomicUsize = AtomicUsize::new(default_show as usize);
static FORMAT: AtomicUsize = AtomicUsize::new(format::default_format as usize);

pub fn render() -> RenderFn {
    // SAFETY: only ever stores values produced by casting a `RenderFn`.
    unsafe { std::mem::transmute::<usize, RenderFn>(RENDER.load(Ordering::Acquire)) }
}

pub fn set_render(f: RenderFn) -> RenderFn {
    let prev = RENDER.swap(f as usize, Ordering::AcqRel);
    unsafe { std::mem::transmute::<usize, RenderFn>(prev) }
}

pub fn show() -> ShowFn {
    unsafe { std::mem::transmute::<usize, ShowFn>(SHOW.load(Ordering::Acquire)) }
}

pub fn set_show(f: ShowFn) -> ShowFn {
    let prev = SHOW.swap(f as usize, Ordering::AcqRel);
    unsafe { std::mem::transmute::<usize, ShowFn>(prev) }
}

pub fn format_fn() -> FormatFn {
    unsafe { std::mem::transmute::<usize, FormatFn>(FORMAT.load(Ordering::Acquire)) }
}

pub fn set_format(f: FormatFn) -> FormatFn {
    let prev = FORMAT.swap(f as usize, Ordering::AcqRel);
    unsafe { std::mem::transmute::<usize, FormatFn>(prev) }
}

/// Invoked from `Recorder::record`'s live-trace path. Not required to be
/// signal-safe, only reached when `trace != 0`.
pub(crate) fn render_and_show(name: &str, event: &Event) {
    let message = format_fn()(event.format, &event.args);
    let mut stderr = io::stderr();
    let mut lock = stderr.lock();
    render()(show(), &mut lock, name, event.where_, event.order, event.timestamp, &message);
}

/// The sorted dump. Compiles `pattern` as a case-insensitive,
/// full-match extended regex; returns 0 immediately if compilation fails.
/// Otherwise repeatedly picks, among every matching recorder with a
/// readable event, the one whose peeked event has the smallest `order`,
/// reads one entry from it, and emits it, until no matching recorder has
/// anything left. Returns the number of events emitted.
pub fn sort(pattern: &str, render_fn: RenderFn, show_fn: ShowFn, out: &mut dyn Write) -> u64 {
    let re = match Regex::new(&format!("(?i)^(?:{pattern})$")) {
        Ok(re) => re,
        Err(_) => return 0,
    };

    let mut dumped = 0u64;
    loop {
        let mut winner: Option<&'static Recorder> = None;
        let mut winner_order = u64::MAX;
        recorder::for_each(|r| {
            if !re.is_match(r.name) {
                return;
            }
            if let Some(event) = r.ring().peek(r.dump_cursor()) {
                if event.order < winner_order {
                    winner_order = event.order;
                    winner = Some(r);
                }
            }
        });

        let Some(r) = winner else { break };
        let mut buf = [Event::default()];
        let n = r.ring().read(&mut buf, r.dump_cursor(), None, None);
        if n == 0 {
            // Catch-up snap: this recorder's cursor was behind. Retry the
            // outer loop without counting a dump.
            continue;
        }
        let event = buf[0];
        let message = format_fn()(event.format, &event.args);
        render_fn(show_fn, out, r.name, event.where_, event.order, event.timestamp, &message);
        dumped += 1;
    }
    dumped
}

/// A cooperative background dumper: repeatedly
/// calls `sort` to exhaustion, then sleeps `tweak(recorder_dump_sleep)`
/// milliseconds, until `stop` is observed.
pub struct BackgroundDumper {
    pattern: String,
    running: AtomicBool,
}

impl BackgroundDumper {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), running: AtomicBool::new(true) }
    }

    /// Signals the loop to exit at its next check. Cooperative: does not
    /// interrupt a sleep or a `sort` pass in progress.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn run(&self) {
        log::info!("background dumper started, pattern {:?}", self.pattern);
        let mut out = io::stderr();
        while self.running.load(Ordering::Relaxed) {
            loop {
                let n = sort(&self.pattern, render(), show(), &mut out);
                if n == 0 {
                    break;
                }
                log::trace!("drained {n} events matching {:?}", self.pattern);
            }
            let sleep_ms = RECORDER_DUMP_SLEEP.get().max(0) as u64;
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }
        log::info!("background dumper stopped, pattern {:?}", self.pattern);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;

    #[test]
    fn sort_emits_strictly_increasing_order_across_recorders() {
        let a = Recorder::create_and_register("dump.test.a", "", 8);
        let b = Recorder::create_and_register("dump.test.b", "", 8);
        a.record("a:1", "x", [0, 0, 0, 0]);
        b.record("b:1", "y", [0, 0, 0, 0]);
        a.record("a:2", "z", [0, 0, 0, 0]);

        let mut out = Vec::new();
        let n = sort("dump\\.test\\..*", render(), show(), &mut out);
        assert_eq!(n, 3);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("dump.test.a"));
        assert!(lines[1].contains("dump.test.b"));
        assert!(lines[2].contains("dump.test.a"));
    }

    #[test]
    fn sort_returns_zero_on_bad_regex() {
        let mut out = Vec::new();
        assert_eq!(sort("(unclosed", render(), show(), &mut out), 0);
    }

    #[test]
    fn sort_ignores_non_matching_recorders() {
        let _ = Recorder::create_and_register("dump.test.other", "", 4);
        let mut out = Vec::new();
        let n = sort("no_such_prefix\\..*", render(), show(), &mut out);
        assert_eq!(n, 0);
    }
}
