//! Tweaks: named, live-adjustable knobs exposed through the same
//! colon-separated grammar as traces.
//!
//! Each [`Tweak`] is a static, process-wide cell holding either a bare
//! integer or one of a fixed set of named labels. Tweaks register
//! themselves into a CAS-prepended singly linked list, the same
//! never-remove, always-append discipline `recorder`'s channel registry
//! uses: nothing is ever deregistered, so readers never need to guard
//! against a node disappearing mid-walk.

use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};
use std::sync::Once;

/// One `name=label` pairing for a labeled tweak (`name=label[,label...]`).
pub struct Label {
    pub name: &'static str,
    pub value: i64,
}

/// A single named, live-adjustable integer. `labels` is empty for a bare
/// integer tweak (`name=<integer>`); non-empty for a tweak whose valid
/// values are a closed enumeration (`name=<label>`).
pub struct Tweak {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [Label],
    value: AtomicI64,
    next: AtomicPtr<Tweak>,
}

impl Tweak {
    pub const fn new(name: &'static str, help: &'static str, default: i64, labels: &'static [Label]) -> Self {
        Self {
            name,
            help,
            labels,
            value: AtomicI64::new(default),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, v: i64) -> i64 {
        self.value.swap(v, Ordering::Relaxed)
    }

    /// Resolves a label name to its integer value, if this tweak has labels.
    pub fn label_value(&self, label: &str) -> Option<i64> {
        self.labels.iter().find(|l| l.name.eq_ignore_ascii_case(label)).map(|l| l.value)
    }
}

static HEAD: AtomicPtr<Tweak> = AtomicPtr::new(std::ptr::null_mut());

/// Registers a tweak into the process-wide registry. `tweak` must be a
/// `'static` reference (a `static` item) since nothing is ever removed.
/// CAS-prepend: safe to call concurrently from multiple threads, though in
/// practice registration happens once at startup.
pub fn register(tweak: &'static Tweak) {
    let ptr = tweak as *const Tweak as *mut Tweak;
    let mut backoff = crate::backoff::Backoff::new();
    loop {
        let head = HEAD.load(Ordering::Acquire);
        tweak.next.store(head, Ordering::Relaxed);
        if HEAD.compare_exchange(head, ptr, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            return;
        }
        backoff.spin();
    }
}

/// Iterates the registry. Lock-free: a concurrent `register` may or may not
/// be visible to a given call, but the list is never corrupted or
/// use-after-freed since nodes are always `'static`.
pub fn for_each(mut f: impl FnMut(&'static Tweak)) {
    let mut cur = HEAD.load(Ordering::Acquire);
    while let Some(tweak) = unsafe { cur.as_ref() } {
        f(tweak);
        cur = tweak.next.load(Ordering::Relaxed);
    }
}

/// Finds a registered tweak by name (case-insensitive, full match, same
/// matching discipline as recorder name patterns).
pub fn find(name: &str) -> Option<&'static Tweak> {
    let mut found = None;
    for_each(|t| {
        if found.is_none() && t.name.eq_ignore_ascii_case(name) {
            found = Some(t);
        }
    });
    found
}

/// Milliseconds the background dumper sleeps between drain passes.
/// Default 100ms, a reasonable poll cadence for a best-effort exporter.
pub static RECORDER_DUMP_SLEEP: Tweak = Tweak::new(
    "recorder_dump_sleep",
    "milliseconds the background dumper sleeps between drain passes",
    100,
    &[],
);

static INIT: Once = Once::new();

/// Registers the crate's built-in tweaks. Idempotent; called from
/// `config_protocol::bootstrap_from_env` so a user who never touches tweaks
/// still gets `recorder_dump_sleep` visible to `list`/`help`.
pub fn register_builtins() {
    INIT.call_once(|| {
        register(&RECORDER_DUMP_SLEEP);
    });
}
