//! A non-blocking, lock-free flight recorder: always-on, in-process event
//! capture into bounded ring buffers, safe to call from signal handlers,
//! with a sorted cross-recorder dump and an optional shared-memory export
//! path for a second process to poll.
//!
//! - [`ring`] / [`ring_core`]: the lock-free bounded FIFO with overrun
//!   recovery that backs every recorder.
//! - [`event`]: the payload a recorder packs into one ring slot.
//! - [`recorder`]: named producer surfaces, registered process-wide.
//! - [`order`]: the global monotonic counter stitching recorders together.
//! - [`dump`]: the sorted k-way merge and render/show callback machinery.
//! - [`tweak`]: runtime-adjustable named parameters read from the hot path.
//! - [`shm`]: the shared-memory channel file for cross-process export.
//! - [`config_protocol`]: the trace/tweak/export specification grammar.

mod backoff;
mod invariants;

pub mod config_protocol;
pub mod dump;
pub mod error;
pub mod event;
pub mod format;
pub mod order;
pub mod recorder;
pub mod ring;
pub mod shm;
pub mod tick;
pub mod tweak;

pub(crate) mod ring_core;

pub use config_protocol::{apply, bootstrap_from_env, ConfigStatus};
pub use dump::{sort, BackgroundDumper};
pub use event::Event;
pub use recorder::{Recorder, CHAN_MAGIC};
pub use ring::Ring;
pub use tweak::Tweak;
