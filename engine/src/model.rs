//! Core data model for transfer handles.
//!
//! This module defines the main data structures for representing transfers:
//! - TransferHandle: one transfer request grouping source/destination pairs
//! - FileEntry: a single file within a handle
//! - BackendKind, TransferStatus, FileStatus: enums controlling behavior
//! - DaemonCommand, DaemonState: control words exchanged with the daemon

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a single transfer request.
///
/// A TransferHandle encompasses:
/// - An id unique for the process lifetime
/// - A caller-supplied name (opaque to the engine)
/// - The backend responsible for moving the bytes
/// - Per-file source/destination pairs with their own state
#[derive(Debug, Clone)]
pub struct TransferHandle {
    /// Unique identifier, monotonically increasing, never reused
    pub id: u64,

    /// Caller-supplied label
    pub name: String,

    /// Transfer strategy for this handle
    pub backend: BackendKind,

    /// Aggregate status, derived from the files (see [`TransferStatus::aggregate`])
    pub status: TransferStatus,

    /// Files in insertion order; source paths are unique within a handle
    pub files: Vec<FileEntry>,

    /// When the handle was created
    pub created_at: DateTime<Utc>,

    /// When the handle was last dispatched
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl TransferHandle {
    pub fn new(id: u64, backend: BackendKind, name: &str) -> Self {
        TransferHandle {
            id,
            name: name.to_string(),
            backend,
            status: TransferStatus::Source,
            files: Vec::new(),
            created_at: Utc::now(),
            dispatched_at: None,
        }
    }

    /// Look up a file entry by its source path.
    pub fn file(&self, source: &Path) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.source == source)
    }

    /// Mutable lookup by source path.
    pub fn file_mut(&mut self, source: &Path) -> Option<&mut FileEntry> {
        self.files.iter_mut().find(|f| f.source == source)
    }

    /// Re-derive the aggregate status from the per-file statuses.
    ///
    /// A handle pinned at `Cancelled` stays there; re-dispatch is the only
    /// way out of that state.
    pub fn refresh_status(&mut self) {
        if self.status != TransferStatus::Cancelled {
            self.status = TransferStatus::aggregate(&self.files);
        }
    }
}

/// Represents a single source -> destination pair within a handle.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Full source path (unique key within the handle)
    pub source: PathBuf,

    /// Full destination path
    pub destination: PathBuf,

    /// Current state of this file
    pub status: FileStatus,

    /// Byte length of the source at add-time (informational)
    pub size: u64,

    /// CRC32 of the source, computed at or before dispatch; immutable once set
    pub crc32: Option<u32>,

    /// Progress counter; authoritative for the daemon backend only
    pub bytes_written: u64,
}

impl FileEntry {
    pub fn new(source: PathBuf, destination: PathBuf, size: u64) -> Self {
        FileEntry {
            source,
            destination,
            status: FileStatus::Source,
            size,
            crc32: None,
            bytes_written: 0,
        }
    }
}

/// The transfer strategy used for a handle.
///
/// `Sync` and `AsyncDaemon` are built in. The burst-buffer and vendor kinds
/// are external collaborators: they are only usable once an implementation
/// has been registered with the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendKind {
    /// In-process copy; dispatch blocks until the handle is terminal
    Sync,
    /// Background copy performed by a separate daemon process
    AsyncDaemon,
    /// Vendor burst-buffer service (variant A)
    BurstBufferA,
    /// Vendor burst-buffer service (variant B)
    BurstBufferB,
    /// Vendor transfer service
    VendorC,
}

impl BackendKind {
    /// Parse a backend kind from its configuration string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sync" => Some(Self::Sync),
            "daemon" => Some(Self::AsyncDaemon),
            "burst-buffer-a" => Some(Self::BurstBufferA),
            "burst-buffer-b" => Some(Self::BurstBufferB),
            "vendor-c" => Some(Self::VendorC),
            _ => None,
        }
    }

    /// True for backends whose `start` returns before the copy finishes.
    pub fn is_async(&self) -> bool {
        !matches!(self, Self::Sync)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::AsyncDaemon => write!(f, "daemon"),
            Self::BurstBufferA => write!(f, "burst-buffer-a"),
            Self::BurstBufferB => write!(f, "burst-buffer-b"),
            Self::VendorC => write!(f, "vendor-c"),
        }
    }
}

/// The state of an individual file within a handle.
///
/// Advances only Source -> InProgress -> {Destination | Error}; the sole
/// regression is an explicit reset on re-dispatch after cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    /// Not yet dispatched; bytes live only at the source
    Source,
    /// Currently transferring
    InProgress,
    /// Delivered and verified at the destination
    Destination,
    /// Copy or verification failed; destination contents are invalid
    Error,
}

impl FileStatus {
    /// Returns true if this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Destination | FileStatus::Error)
    }
}

/// The aggregate state of a transfer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Created, nothing dispatched yet
    Source,
    /// Dispatched; at least one file is still moving
    InProgress,
    /// Every file arrived at its destination
    Destination,
    /// At least one file failed
    Error,
    /// Cancelled by the caller; terminal until re-dispatched
    Cancelled,
}

impl TransferStatus {
    /// Derive the aggregate status from a set of files.
    ///
    /// Error wins over everything; Destination requires every file to have
    /// arrived (vacuously true for an empty handle); any movement at all is
    /// InProgress; otherwise nothing has been dispatched.
    pub fn aggregate(files: &[FileEntry]) -> Self {
        if files.iter().any(|f| f.status == FileStatus::Error) {
            TransferStatus::Error
        } else if files.iter().all(|f| f.status == FileStatus::Destination) {
            TransferStatus::Destination
        } else if files
            .iter()
            .any(|f| matches!(f.status, FileStatus::InProgress | FileStatus::Destination))
        {
            TransferStatus::InProgress
        } else {
            TransferStatus::Source
        }
    }

    /// Returns true if this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Destination | TransferStatus::Error | TransferStatus::Cancelled
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Destination => write!(f, "destination"),
            Self::Error => write!(f, "error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Command written by the owning process for the daemon to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DaemonCommand {
    /// Copy the files in this entry
    Run,
    /// Halt this entry; abort the in-flight file
    Stop,
    /// Shut the daemon down entirely
    Exit,
}

/// State reported by the daemon for the owning process to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DaemonState {
    /// Actively copying
    Running,
    /// Idle or halted on request
    Stopped,
    /// Shut down; will not pick up further work
    Exited,
}

/// Outcome of testing a dispatched handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    /// Every file arrived; terminal
    Complete,
    /// Still moving; poll again
    InProgress,
    /// At least one file failed, or the handle was cancelled; terminal
    Failed,
}
