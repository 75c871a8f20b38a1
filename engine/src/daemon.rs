//! Asynchronous daemon backend and its IPC protocol.
//!
//! Copies are performed by a second, independently scheduled process. The
//! two sides never signal each other directly; everything moves through
//! the shared transfer descriptor, whose atomic-rename persistence makes
//! each read observe a complete document.
//!
//! Field ownership keeps the file-swap channel coherent: the owning
//! process writes entry commands and initial file lists, the daemon writes
//! per-file progress, the done flag, and the document-level state. Each
//! side re-reads the document before writing so the other side's fields
//! are preserved.
//!
//! This module carries both sides: [`DaemonBackend`] (owning process) and
//! [`Daemon`] (worker loop, wrapped by the `offload-daemon` binary and
//! driven directly by tests).

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::Backend;
use crate::checksums::Crc32;
use crate::descriptor::{TransferDocument, TransferEntry};
use crate::error::{EngineError, Result};
use crate::fs_ops;
use crate::model::{
    DaemonCommand, DaemonState, FileStatus, TestResult, TransferHandle, TransferStatus,
};

/// How many chunks the daemon copies between command checks and progress
/// publishes. With the default buffer this is a few megabytes, keeping
/// cancel latency bounded without hammering the descriptor.
const COMMAND_CHECK_CHUNKS: u64 = 8;

/// Owning-process side of the daemon backend.
pub struct DaemonBackend {
    transfer_file: PathBuf,
}

impl DaemonBackend {
    pub fn new(transfer_file: PathBuf) -> Self {
        DaemonBackend { transfer_file }
    }
}

impl Backend for DaemonBackend {
    /// Publish the file list with `Command = Run` and return immediately.
    fn start(&mut self, handle: &mut TransferHandle) -> Result<()> {
        let mut doc = TransferDocument::load(&self.transfer_file)?;
        doc.entries.insert(handle.id, TransferEntry::run(handle));
        doc.persist(&self.transfer_file)?;

        // The transfer is under way even though no byte has moved yet;
        // per-file statuses catch up from the daemon's reports.
        handle.status = TransferStatus::InProgress;
        handle.files.iter_mut().for_each(|f| f.bytes_written = 0);

        tracing::debug!(handle = handle.id, files = handle.files.len(), "daemon transfer dispatched");
        Ok(())
    }

    /// Re-read the shared descriptor and fold the daemon's reports into
    /// the handle.
    fn test(&mut self, handle: &mut TransferHandle) -> Result<TestResult> {
        let doc = TransferDocument::load(&self.transfer_file)?;
        let Some(entry) = doc.entries.get(&handle.id) else {
            return Err(EngineError::InvalidState {
                id: handle.id,
                reason: "no transfer entry for dispatched handle".to_string(),
            });
        };

        for record in &entry.files {
            if let Some(file) = handle.file_mut(&record.source) {
                file.status = record.status;
                file.bytes_written = record.written;
                if file.crc32.is_none() {
                    file.crc32 = record.crc32;
                }
            }
        }

        if entry.command == DaemonCommand::Stop {
            // Cancelled; terminal once the daemon acknowledges the halt.
            if entry.done || doc.state != DaemonState::Running {
                handle.status = TransferStatus::Cancelled;
                return Ok(TestResult::Failed);
            }
            return Ok(TestResult::InProgress);
        }

        if entry.done {
            handle.refresh_status();
            return Ok(match handle.status {
                TransferStatus::Destination => TestResult::Complete,
                _ => TestResult::Failed,
            });
        }

        Ok(TestResult::InProgress)
    }

    /// Write `Command = Stop`; completion of the halt is observed via
    /// `test`, there is no hard deadline.
    fn cancel(&mut self, handle: &mut TransferHandle) -> Result<()> {
        let mut doc = TransferDocument::load(&self.transfer_file)?;
        if let Some(entry) = doc.entries.get_mut(&handle.id) {
            entry.command = DaemonCommand::Stop;
            doc.persist(&self.transfer_file)?;
            tracing::info!(handle = handle.id, "halt requested");
        }
        Ok(())
    }
}

/// Remove a handle's entry from the transfer descriptor (used by `free`).
pub fn remove_entry(transfer_file: &Path, id: u64) -> Result<()> {
    if !transfer_file.exists() {
        return Ok(());
    }
    let mut doc = TransferDocument::load(transfer_file)?;
    if doc.entries.remove(&id).is_some() {
        doc.persist(transfer_file)?;
    }
    Ok(())
}

/// Shut down any daemon left over from a prior run and clear its
/// descriptor, returning the final document so leftover outcomes can be
/// reconciled.
///
/// A daemon that never acknowledges within `timeout` (e.g. it crashed
/// along with the previous owner) is logged and the descriptor is cleared
/// anyway; waiting forever would wedge every subsequent startup.
pub fn drain_stale(
    transfer_file: &Path,
    timeout: Duration,
    poll: Duration,
) -> Result<Option<TransferDocument>> {
    if !transfer_file.exists() {
        return Ok(None);
    }

    let mut doc = TransferDocument::load(transfer_file)?;
    if doc.state == DaemonState::Running {
        doc.command = Some(DaemonCommand::Exit);
        doc.persist(transfer_file)?;

        let deadline = Instant::now() + timeout;
        loop {
            thread::sleep(poll);
            doc = TransferDocument::load(transfer_file)?;
            if doc.state != DaemonState::Running {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    file = %transfer_file.display(),
                    "stale daemon did not acknowledge exit; clearing descriptor anyway"
                );
                break;
            }
        }
    }

    fs_ops::unlink(transfer_file)?;
    Ok(Some(doc))
}

/// Outcome of a single daemon poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonTick {
    /// Nothing to do
    Idle,
    /// Made progress on some entry; poll again without sleeping
    Busy,
    /// Exit command observed; the loop should terminate
    Exit,
}

/// The background worker: polls the transfer descriptor and performs
/// copies on behalf of dispatched handles.
pub struct Daemon {
    transfer_file: PathBuf,
    buf_size: usize,
    poll_interval: Duration,
}

enum CopyEnd {
    Delivered { bytes: u64, crc: u32 },
    Aborted,
    Failed(EngineError),
}

impl Daemon {
    pub fn new(transfer_file: PathBuf, buf_size: usize, poll_interval: Duration) -> Self {
        Daemon {
            transfer_file,
            buf_size: buf_size.max(1),
            poll_interval,
        }
    }

    /// Poll until an exit command arrives.
    pub fn run(&self) -> Result<()> {
        tracing::info!(file = %self.transfer_file.display(), "transfer daemon started");
        loop {
            match self.poll_once()? {
                DaemonTick::Exit => {
                    tracing::info!("transfer daemon exiting on command");
                    return Ok(());
                }
                DaemonTick::Busy => {}
                DaemonTick::Idle => thread::sleep(self.poll_interval),
            }
        }
    }

    /// One scheduling decision: handle an exit command, settle idle state,
    /// or advance a single pending entry by at most one file.
    ///
    /// File-at-a-time granularity keeps the window between command checks
    /// small and makes the loop easy to drive deterministically.
    pub fn poll_once(&self) -> Result<DaemonTick> {
        let mut doc = TransferDocument::load(&self.transfer_file)?;

        if doc.command == Some(DaemonCommand::Exit) {
            doc.state = DaemonState::Exited;
            doc.persist(&self.transfer_file)?;
            return Ok(DaemonTick::Exit);
        }

        let pending = doc.entries.iter().find(|(_, e)| !e.done).map(|(id, _)| *id);
        let Some(id) = pending else {
            if doc.state == DaemonState::Running {
                doc.state = DaemonState::Stopped;
                doc.persist(&self.transfer_file)?;
            }
            return Ok(DaemonTick::Idle);
        };

        if doc.state != DaemonState::Running {
            doc.state = DaemonState::Running;
            doc.persist(&self.transfer_file)?;
        }

        self.advance_entry(&mut doc, id)?;
        Ok(DaemonTick::Busy)
    }

    /// Advance one entry: honor a stop request, mark a finished entry
    /// done, or copy its next pending file.
    fn advance_entry(&self, doc: &mut TransferDocument, id: u64) -> Result<()> {
        let Some(entry) = doc.entries.get_mut(&id) else {
            return Ok(());
        };

        if entry.command == DaemonCommand::Stop {
            // Halt at a file boundary: nothing is in flight, so files
            // still at Source are simply left there.
            entry.done = true;
            doc.state = DaemonState::Stopped;
            tracing::info!(handle = id, "entry halted on request");
            return doc.persist(&self.transfer_file);
        }

        let Some(idx) = entry.files.iter().position(|f| f.status == FileStatus::Source) else {
            entry.done = true;
            tracing::info!(handle = id, "entry complete");
            return doc.persist(&self.transfer_file);
        };

        entry.files[idx].status = FileStatus::InProgress;
        doc.persist(&self.transfer_file)?;

        self.copy_file(doc, id, idx)
    }

    /// Copy one file chunk-wise, publishing progress and re-checking
    /// commands at batch boundaries so a halt aborts the in-flight file.
    fn copy_file(&self, doc: &mut TransferDocument, id: u64, idx: usize) -> Result<()> {
        let Some(record) = doc.entries.get(&id).and_then(|e| e.files.get(idx)).cloned() else {
            return Ok(());
        };

        let end = self.stream_file(doc, id, idx, &record.source, &record.destination)?;

        match end {
            CopyEnd::Aborted => Ok(()),
            CopyEnd::Delivered { bytes, crc } => {
                let status = if bytes != record.size {
                    tracing::warn!(
                        handle = id,
                        file = %record.source.display(),
                        copied = bytes,
                        expected = record.size,
                        "size mismatch after copy"
                    );
                    FileStatus::Error
                } else if record.crc32.is_some_and(|expected| expected != crc) {
                    tracing::warn!(
                        handle = id,
                        file = %record.source.display(),
                        "checksum mismatch after copy"
                    );
                    FileStatus::Error
                } else {
                    FileStatus::Destination
                };
                self.finish_file(doc, id, idx, status, bytes, Some(crc))
            }
            CopyEnd::Failed(e) => {
                tracing::warn!(handle = id, file = %record.source.display(), error = %e, "copy failed");
                self.finish_file(doc, id, idx, FileStatus::Error, 0, None)
            }
        }
    }

    /// The chunk loop. Returns `Aborted` if a halt arrived mid-file (the
    /// partial destination is left behind; the owner treats it as
    /// invalid), `Failed` on an I/O error for this file only.
    fn stream_file(
        &self,
        doc: &mut TransferDocument,
        id: u64,
        idx: usize,
        src: &Path,
        dst: &Path,
    ) -> Result<CopyEnd> {
        if let Err(e) = fs_ops::ensure_parent_dir_exists(dst) {
            return Ok(CopyEnd::Failed(e));
        }
        let mut src_file = match fs_ops::retrying_open_read(src) {
            Ok(f) => f,
            Err(e) => return Ok(CopyEnd::Failed(e)),
        };
        let mut dst_file = match fs_ops::retrying_open_write(dst) {
            Ok(f) => f,
            Err(e) => return Ok(CopyEnd::Failed(e)),
        };

        let mut buffer = vec![0u8; self.buf_size];
        let mut crc = Crc32::new();
        let mut written: u64 = 0;
        let mut chunks: u64 = 0;

        loop {
            let n = match fs_ops::read_attempt(&mut src_file, &mut buffer) {
                Ok(n) => n,
                Err(e) => return Ok(CopyEnd::Failed(EngineError::io(src, e))),
            };
            if n == 0 {
                break;
            }
            if let Err(e) = fs_ops::write_attempt(&mut dst_file, &buffer[..n]) {
                return Ok(CopyEnd::Failed(EngineError::io(dst, e)));
            }
            crc.update(&buffer[..n]);
            written += n as u64;
            chunks += 1;

            if chunks % COMMAND_CHECK_CHUNKS == 0 {
                let mut fresh = TransferDocument::load(&self.transfer_file)?;
                let halt = fresh.command == Some(DaemonCommand::Exit)
                    || fresh
                        .entries
                        .get(&id)
                        .map_or(true, |e| e.command == DaemonCommand::Stop);

                if let Some(f) = fresh.entries.get_mut(&id).and_then(|e| e.files.get_mut(idx)) {
                    f.written = written;
                }

                if halt {
                    if let Some(e) = fresh.entries.get_mut(&id) {
                        if let Some(f) = e.files.get_mut(idx) {
                            f.status = FileStatus::Error;
                        }
                        e.done = true;
                    }
                    fresh.state = if fresh.command == Some(DaemonCommand::Exit) {
                        DaemonState::Exited
                    } else {
                        DaemonState::Stopped
                    };
                    fresh.persist(&self.transfer_file)?;
                    *doc = fresh;
                    tracing::info!(handle = id, file = %src.display(), "in-flight copy aborted");
                    return Ok(CopyEnd::Aborted);
                }

                fresh.persist(&self.transfer_file)?;
                *doc = fresh;
            }
        }

        if let Err(e) = dst_file.sync_all() {
            return Ok(CopyEnd::Failed(EngineError::io(dst, e)));
        }

        Ok(CopyEnd::Delivered {
            bytes: written,
            crc: crc.finalize(),
        })
    }

    /// Record a file's final state, preserving any commands the owner
    /// wrote while the copy ran.
    fn finish_file(
        &self,
        doc: &mut TransferDocument,
        id: u64,
        idx: usize,
        status: FileStatus,
        written: u64,
        crc: Option<u32>,
    ) -> Result<()> {
        let mut fresh = TransferDocument::load(&self.transfer_file)?;
        if let Some(f) = fresh.entries.get_mut(&id).and_then(|e| e.files.get_mut(idx)) {
            f.status = status;
            f.written = written;
            if f.crc32.is_none() {
                f.crc32 = crc;
            }
        }
        fresh.persist(&self.transfer_file)?;
        *doc = fresh;
        Ok(())
    }
}
