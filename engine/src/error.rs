//! Error types for the transfer engine.
//!
//! The primary error type is `EngineError`. Operation-level failures are
//! returned to the caller; per-file failures are additionally recorded on
//! the affected `FileEntry` and persisted, so state stays visible to a
//! later `test` even across a process restart.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::BackendKind;

/// Errors surfaced by the public engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Control directory or configuration unusable; fatal at init
    #[error("configuration error: {0}")]
    Config(String),

    /// A backend could not be initialized or has no implementation; fatal
    /// for the handle, since the declared backend is unusable
    #[error("backend {kind} unavailable: {reason}")]
    BackendInit { kind: BackendKind, reason: String },

    /// Unknown handle id; no state was mutated
    #[error("no transfer handle with id {0}")]
    HandleNotFound(u64),

    /// Operation not legal for the handle's current state; caller error
    #[error("invalid state for handle {id}: {reason}")]
    InvalidState { id: u64, reason: String },

    /// I/O failure after bounded retries
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Destination bytes disagree with the recorded source checksum
    #[error("checksum mismatch for {}: recorded {expected:#010x}, found {actual:#010x}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    /// Backend string did not name any known kind; handle not created
    #[error("unrecognized backend kind: {0:?}")]
    UnrecognizedBackend(String),

    /// A descriptor file exists but cannot be decoded
    #[error("descriptor {} is corrupt: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

impl EngineError {
    /// Wrap an `io::Error` with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that leave the handle in a terminal `Error` state.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(self, EngineError::Io { .. } | EngineError::ChecksumMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
