//! Shared-memory channel file: self-describing, file-mapped, numeric export
//! channels a second process can poll.
//!
//! Grounded in the mmap-plus-raw-atomic-struct idiom used throughout the
//! pack's IPC examples (`other_examples/.../cell-transport-src-shm.rs.rs`):
//! a `memmap2::MmapMut` holding `#[repr(C)]` structs whose fields are
//! themselves atomics, so concurrent readers/writers across process
//! boundaries synchronize the same way in-process atomics do. All offsets
//! are relative (file-start for the header, `Shan`-start for everything
//! else); no code here is allowed to cache an absolute pointer across a
//! growth-triggered remap.

mod channel;
mod file;

pub use channel::{ChanHandle, ChanType};
pub use file::{ChansFile, MAGIC, VERSION};

use crate::error::ShmError;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

/// Default export file path, used when `RECORDER_SHARE` is unset.
pub const DEFAULT_SHARE_PATH: &str = "/tmp/recorder_share";

static ACTIVE: RwLock<Option<Arc<ChansFile>>> = RwLock::new(None);

/// Every `ChansFile` ever created through `set_share_path`, held weakly so
/// registering here never keeps a superseded file alive on its own. Walked
/// by `run_cleanup_hook` at process exit.
static CLEANUP_REGISTRY: Mutex<Vec<Weak<ChansFile>>> = Mutex::new(Vec::new());
static ATEXIT_REGISTERED: OnceLock<()> = OnceLock::new();

/// `share=path`: closes whatever export file is currently active
/// and creates a fresh one at `path`. The old file's mapping and fd are
/// released when the last `Arc` referencing it (held by any already
/// exporting recorder) drops, or sooner, forcibly, at process exit via the
/// at-exit hook registered below.
pub fn set_share_path<P: AsRef<Path>>(path: P) -> Result<Arc<ChansFile>, ShmError> {
    let chans = Arc::new(ChansFile::create(path)?);
    register_cleanup(&chans);
    *ACTIVE.write().expect("shm active lock poisoned") = Some(Arc::clone(&chans));
    Ok(chans)
}

/// Registers `chans` for forced teardown at process exit, installing the
/// `atexit` hook itself on the very first call (matching the "register an
/// at-exit cleanup on first creation" rule; the hook is process-global,
/// not per-file).
fn register_cleanup(chans: &Arc<ChansFile>) {
    CLEANUP_REGISTRY.lock().expect("shm cleanup registry lock poisoned").push(Arc::downgrade(chans));
    ATEXIT_REGISTERED.get_or_init(|| {
        #[cfg(unix)]
        unsafe {
            libc::atexit(run_cleanup_hook);
        }
    });
}

/// Unmaps and closes every still-live registered file. Bypasses ordinary
/// `Drop`: a `ChansFile` may still have live `Arc` clones (an exporting
/// recorder's `Export`, say) at process exit, and those are never going to
/// run their destructors since they are leaked `'static` values; this is
/// the only place the mapping and descriptor are actually released.
#[cfg(unix)]
extern "C" fn run_cleanup_hook() {
    let registry = match CLEANUP_REGISTRY.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    for weak in registry.iter() {
        if let Some(chans) = weak.upgrade() {
            chans.force_unmap_and_close();
        }
    }
}

/// The currently active export file, if `share=` (or bootstrap's
/// `RECORDER_SHARE`) has set one.
pub fn active() -> Option<Arc<ChansFile>> {
    ACTIVE.read().expect("shm active lock poisoned").clone()
}

/// Returns the active export file, lazily creating one at
/// [`DEFAULT_SHARE_PATH`] if nothing has been configured yet, the
/// behavior an `export` config item needs when the user never issued an
/// explicit `share=`.
pub fn active_or_create_default() -> Result<Arc<ChansFile>, ShmError> {
    if let Some(chans) = active() {
        return Ok(chans);
    }
    set_share_path(DEFAULT_SHARE_PATH)
}
