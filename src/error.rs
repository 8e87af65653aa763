//! Error types for the crate's fallible paths.
//!
//! The hot `record()` path is infallible by construction; nothing here is
//! on it. This covers the one cold-path failure surface that actually
//! returns `Result`: opening/growing the shared-memory export file.
//! Configuration-grammar failures are reported through `ConfigStatus`
//! (see `config_protocol`) rather than a distinct error type, since the
//! grammar has no source errors worth wrapping, only "which kind of
//! token was rejected".

use thiserror::Error;

/// Failures from the shared-memory export file (`shm` module).
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("i/o error on shared-memory file {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shared-memory file {path:?} too small: need at least {need} bytes, found {found}")]
    TooSmall {
        path: std::path::PathBuf,
        need: usize,
        found: usize,
    },

    #[error("shared-memory file {path:?} has bad magic {found:#x}, expected {expected:#x}")]
    BadMagic {
        path: std::path::PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("no channel named {0:?} in this shared-memory file")]
    NoSuchChannel(String),
}
