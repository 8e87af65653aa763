//! A named producer surface that packs a timestamp and arguments into one
//! ring slot and assigns each event its place in the global order.

use crate::dump;
use crate::event::{Event, ARGS};
use crate::order;
use crate::ring::Ring;
use crate::shm::ChanHandle;
use crate::tick;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Sentinel `trace` value meaning "export only, do not live-print".
/// Distinguished from `0` (silenced) and any positive live-print level.
pub const CHAN_MAGIC: i64 = i64::MIN;

struct Export {
    chans: Arc<crate::shm::ChansFile>,
    handle: ChanHandle,
}

/// A registered recorder. `name`/`description`/the backing `Ring` are fixed
/// at construction; `trace` and `exported` are the only mutable state,
/// touched exclusively by the configuration protocol (never by `record`
/// itself beyond reading `trace`).
pub struct Recorder {
    pub name: &'static str,
    pub description: &'static str,
    ring: Ring<Event>,
    trace: AtomicI64,
    exported: [OnceLock<Export>; ARGS],
    dump_cursor: AtomicU64,
    next: AtomicPtr<Recorder>,
}

impl Recorder {
    pub fn new(name: &'static str, description: &'static str, capacity: u64) -> Self {
        Self {
            name,
            description,
            ring: Ring::new(capacity),
            trace: AtomicI64::new(0),
            exported: Default::default(),
            dump_cursor: AtomicU64::new(0),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Constructs and activates a recorder in one step, as the macro sugar
    /// a caller would usually reach for at a call site would. Leaks the
    /// recorder: recorders are never destroyed during the process
    /// lifetime.
    pub fn create_and_register(name: &'static str, description: &'static str, capacity: u64) -> &'static Recorder {
        let recorder = Box::leak(Box::new(Self::new(name, description, capacity)));
        register(recorder);
        recorder
    }

    #[inline]
    pub fn trace(&self) -> i64 {
        self.trace.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_trace(&self, value: i64) -> i64 {
        self.trace.swap(value, Ordering::Relaxed)
    }

    pub fn ring(&self) -> &Ring<Event> {
        &self.ring
    }

    pub fn dump_cursor(&self) -> &AtomicU64 {
        &self.dump_cursor
    }

    /// Exports argument slot `i` to a newly allocated (or found) channel
    /// named `label` in `chans`.
    pub fn export(&self, i: usize, chans: &Arc<crate::shm::ChansFile>, handle: ChanHandle) {
        let _ = self.exported[i].set(Export { chans: Arc::clone(chans), handle });
        if self.trace() == 0 {
            self.set_trace(CHAN_MAGIC);
        }
    }

    pub fn is_exported(&self, i: usize) -> bool {
        self.exported[i].get().is_some()
    }

    /// The hot path. Wait-free except for the unavoidable `Ring`
    /// claim/commit FAAs: one global-order fetch-add, one tick read, one
    /// ring write, and, only when `trace != 0`, the live-trace path
    /// below, which is explicitly *not* required to be signal-safe.
    pub fn record(&self, where_: &'static str, format: &'static str, args: [usize; ARGS]) {
        let o = order::next();
        let t = tick::tick();
        let event = Event { timestamp: t, order: o, where_, format, args };
        self.ring.write(&[event], None, None, None);

        let trace = self.trace();
        if trace != 0 {
            self.live_trace(&event, trace);
        }
    }

    fn live_trace(&self, event: &Event, trace: i64) {
        if trace != CHAN_MAGIC {
            dump::render_and_show(self.name, event);
        }
        for (i, slot) in self.exported.iter().enumerate() {
            if let Some(export) = slot.get() {
                export.handle.infer_type_once(&export.chans, event.format, i);
                export.handle.chan_write(&export.chans, &[(event.timestamp, event.args[i] as u64)]);
            }
        }
    }
}

static HEAD: AtomicPtr<Recorder> = AtomicPtr::new(std::ptr::null_mut());

/// CAS-prepends a recorder onto the process-wide registry. Safe from
/// concurrent callers and from constructors
/// running in any order; recorders are never removed.
pub fn register(recorder: &'static Recorder) {
    let ptr = recorder as *const Recorder as *mut Recorder;
    let mut backoff = crate::backoff::Backoff::new();
    loop {
        let head = HEAD.load(Ordering::Acquire);
        recorder.next.store(head, Ordering::Relaxed);
        if HEAD.compare_exchange(head, ptr, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            return;
        }
        backoff.spin();
    }
}

/// Walks every registered recorder, oldest-registered last (most recently
/// registered first, since the list is built by prepending).
pub fn for_each(mut f: impl FnMut(&'static Recorder)) {
    let mut cur = HEAD.load(Ordering::Acquire);
    while let Some(recorder) = unsafe { cur.as_ref() } {
        f(recorder);
        cur = recorder.next.load(Ordering::Relaxed);
    }
}

pub fn find(name: &str) -> Option<&'static Recorder> {
    let mut found = None;
    for_each(|r| {
        if found.is_none() && r.name.eq_ignore_ascii_case(name) {
            found = Some(r);
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_writes_to_ring_and_advances_order() {
        let r = Recorder::new("test.record", "unit test recorder", 8);
        let before = order::current();
        r.record("file.rs:1", "x=%d", [41, 0, 0, 0]);
        r.record("file.rs:2", "x=%d", [42, 0, 0, 0]);
        assert!(order::current() >= before + 2);
        assert_eq!(r.ring().writer_index(), 2);
    }

    #[test]
    fn default_trace_is_silent() {
        let r = Recorder::new("test.silent", "", 4);
        assert_eq!(r.trace(), 0);
    }

    #[test]
    fn registry_finds_by_case_insensitive_name() {
        let r = Recorder::create_and_register("test.registry.Findme", "", 4);
        let found = find("TEST.REGISTRY.FINDME").expect("recorder registered");
        assert!(std::ptr::eq(found, r));
    }
}
