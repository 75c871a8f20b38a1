//! Durable descriptor store.
//!
//! Handle and file state live in versioned JSON documents so a process
//! restart (or a second process, for the daemon) can reconstruct transfer
//! state without re-scanning the filesystem. Two documents exist:
//!
//! - the flush document (`flush.info`), private to the owning process,
//!   recording every handle and file state;
//! - the transfer document (`transfer.info`), shared with the daemon,
//!   carrying per-entry commands, per-file progress, and the
//!   daemon-reported state.
//!
//! Persistence is atomic with respect to crashes: documents are written to
//! a temporary sibling and renamed into place, so a concurrent reader
//! observes either the old or the new version, never a mix. A missing
//! document reads as empty; a corrupt one is a `Parse` error, never
//! silently ignored.
//!
//! The on-disk records are deliberately separate from the in-memory model
//! so the disk format can evolve independently.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::model::{
    BackendKind, DaemonCommand, DaemonState, FileEntry, FileStatus, TransferHandle, TransferStatus,
};

/// On-disk format version; bumped on any incompatible schema change.
pub const FORMAT_VERSION: u32 = 1;

/// Process-private descriptor file name, relative to the control directory.
pub const FLUSH_FILE_NAME: &str = "flush.info";

/// Daemon-shared descriptor file name, relative to the control directory.
pub const TRANSFER_FILE_NAME: &str = "transfer.info";

/// One source -> destination pair as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "SOURCE")]
    pub source: PathBuf,
    #[serde(rename = "DESTINATION")]
    pub destination: PathBuf,
    #[serde(rename = "SIZE")]
    pub size: u64,
    #[serde(rename = "WRITTEN")]
    pub written: u64,
    #[serde(rename = "STATUS")]
    pub status: FileStatus,
    #[serde(rename = "CRC32")]
    pub crc32: Option<u32>,
}

impl From<&FileEntry> for FileRecord {
    fn from(entry: &FileEntry) -> Self {
        FileRecord {
            source: entry.source.clone(),
            destination: entry.destination.clone(),
            size: entry.size,
            written: entry.bytes_written,
            status: entry.status,
            crc32: entry.crc32,
        }
    }
}

impl From<FileRecord> for FileEntry {
    fn from(record: FileRecord) -> Self {
        FileEntry {
            source: record.source,
            destination: record.destination,
            status: record.status,
            size: record.size,
            crc32: record.crc32,
            bytes_written: record.written,
        }
    }
}

/// One transfer handle as persisted in the flush document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleRecord {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "BACKEND")]
    pub backend: BackendKind,
    #[serde(rename = "STATUS")]
    pub status: TransferStatus,
    #[serde(rename = "FILES")]
    pub files: Vec<FileRecord>,
    #[serde(rename = "CREATED")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "DISPATCHED")]
    pub dispatched_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&TransferHandle> for HandleRecord {
    fn from(handle: &TransferHandle) -> Self {
        HandleRecord {
            name: handle.name.clone(),
            backend: handle.backend,
            status: handle.status,
            files: handle.files.iter().map(FileRecord::from).collect(),
            created_at: handle.created_at,
            dispatched_at: handle.dispatched_at,
        }
    }
}

impl HandleRecord {
    /// Rebuild the in-memory handle this record was taken from.
    pub fn into_handle(self, id: u64) -> TransferHandle {
        TransferHandle {
            id,
            name: self.name,
            backend: self.backend,
            status: self.status,
            files: self.files.into_iter().map(FileEntry::from).collect(),
            created_at: self.created_at,
            dispatched_at: self.dispatched_at,
        }
    }
}

/// Process-private descriptor: every handle the registry knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushDocument {
    #[serde(rename = "VERSION")]
    pub version: u32,
    #[serde(rename = "HANDLES")]
    pub handles: BTreeMap<u64, HandleRecord>,
}

impl Default for FlushDocument {
    fn default() -> Self {
        FlushDocument {
            version: FORMAT_VERSION,
            handles: BTreeMap::new(),
        }
    }
}

impl FlushDocument {
    pub fn load(path: &Path) -> Result<Self> {
        load_document(path)
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        persist_document(path, self)
    }

    pub fn get(&self, id: u64) -> Option<&HandleRecord> {
        self.handles.get(&id)
    }

    pub fn set(&mut self, id: u64, record: HandleRecord) {
        self.handles.insert(id, record);
    }

    pub fn remove(&mut self, id: u64) -> Option<HandleRecord> {
        self.handles.remove(&id)
    }
}

/// One handle's worth of work in the transfer document.
///
/// Field ownership is split between the two processes: the owning process
/// writes `command` and the initial file list; the daemon writes `done`,
/// per-file `written`/`status`, and the document-level state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEntry {
    #[serde(rename = "COMMAND")]
    pub command: DaemonCommand,
    #[serde(rename = "FLAG_DONE")]
    pub done: bool,
    #[serde(rename = "FILES")]
    pub files: Vec<FileRecord>,
}

impl TransferEntry {
    /// Build a fresh entry instructing the daemon to copy a handle's files.
    pub fn run(handle: &TransferHandle) -> Self {
        TransferEntry {
            command: DaemonCommand::Run,
            done: false,
            files: handle.files.iter().map(FileRecord::from).collect(),
        }
    }
}

/// Daemon-shared descriptor: the IPC channel between the two processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferDocument {
    #[serde(rename = "VERSION")]
    pub version: u32,
    /// Document-level command; `Exit` shuts the daemon down
    #[serde(rename = "COMMAND")]
    pub command: Option<DaemonCommand>,
    /// Daemon-reported state
    #[serde(rename = "STATE")]
    pub state: DaemonState,
    #[serde(rename = "ENTRIES")]
    pub entries: BTreeMap<u64, TransferEntry>,
}

impl Default for TransferDocument {
    fn default() -> Self {
        TransferDocument {
            version: FORMAT_VERSION,
            command: None,
            state: DaemonState::Stopped,
            entries: BTreeMap::new(),
        }
    }
}

impl TransferDocument {
    pub fn load(path: &Path) -> Result<Self> {
        load_document(path)
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        persist_document(path, self)
    }
}

trait Versioned {
    fn version(&self) -> u32;
}

impl Versioned for FlushDocument {
    fn version(&self) -> u32 {
        self.version
    }
}

impl Versioned for TransferDocument {
    fn version(&self) -> u32 {
        self.version
    }
}

fn load_document<T: DeserializeOwned + Default + Versioned>(path: &Path) -> Result<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        // Missing descriptor reads as an empty store.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(EngineError::io(path, e)),
    };

    let doc: T = serde_json::from_slice(&bytes).map_err(|e| EngineError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if doc.version() != FORMAT_VERSION {
        return Err(EngineError::Parse {
            path: path.to_path_buf(),
            reason: format!(
                "unsupported descriptor version {} (expected {})",
                doc.version(),
                FORMAT_VERSION
            ),
        });
    }

    Ok(doc)
}

/// Write to a temporary sibling, fsync, then rename into place.
fn persist_document<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let tmp = tmp_path(path);
    let bytes = serde_json::to_vec_pretty(doc).map_err(|e| EngineError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut file = fs::File::create(&tmp).map_err(|e| EngineError::io(&tmp, e))?;
    io::Write::write_all(&mut file, &bytes).map_err(|e| EngineError::io(&tmp, e))?;
    file.sync_all().map_err(|e| EngineError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| EngineError::io(path, e))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
