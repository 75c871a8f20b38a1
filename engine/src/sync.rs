//! Synchronous backend: the copy runs in the caller's own control flow.
//!
//! `start` never returns before the handle is terminal, so `wait` after a
//! sync dispatch degenerates to an immediate answer and `cancel` has
//! nothing to halt.

use crate::backend::Backend;
use crate::error::{EngineError, Result};
use crate::fs_ops;
use crate::model::{FileStatus, TestResult, TransferHandle, TransferStatus};

pub struct SyncBackend {
    buf_size: usize,
}

impl SyncBackend {
    pub fn new(buf_size: usize) -> Self {
        SyncBackend { buf_size }
    }

    /// Copy one entry, enforcing the byte-count and checksum contracts.
    fn copy_entry(
        &self,
        entry: &mut crate::model::FileEntry,
    ) -> Result<()> {
        let (bytes, crc) = fs_ops::copy_with_checksum(&entry.source, &entry.destination, self.buf_size)?;

        if bytes != entry.size {
            return Err(EngineError::io(
                &entry.source,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("copied {} bytes, expected {}", bytes, entry.size),
                ),
            ));
        }

        match entry.crc32 {
            Some(expected) if expected != crc => {
                return Err(EngineError::ChecksumMismatch {
                    path: entry.source.clone(),
                    expected,
                    actual: crc,
                });
            }
            Some(_) => {}
            None => entry.crc32 = Some(crc),
        }

        entry.bytes_written = bytes;
        Ok(())
    }
}

impl Backend for SyncBackend {
    /// Copy every file in insertion order, fail-fast.
    ///
    /// The first failure marks its file `Error` and aborts the remaining
    /// copies; this backend has no background recovery path, so there is
    /// no point continuing.
    fn start(&mut self, handle: &mut TransferHandle) -> Result<()> {
        for idx in 0..handle.files.len() {
            handle.files[idx].status = FileStatus::InProgress;

            match self.copy_entry(&mut handle.files[idx]) {
                Ok(()) => {
                    handle.files[idx].status = FileStatus::Destination;
                    tracing::debug!(
                        handle = handle.id,
                        file = %handle.files[idx].source.display(),
                        bytes = handle.files[idx].bytes_written,
                        "file delivered"
                    );
                }
                Err(e) => {
                    handle.files[idx].status = FileStatus::Error;
                    handle.refresh_status();
                    tracing::warn!(handle = handle.id, error = %e, "synchronous transfer failed");
                    return Err(e);
                }
            }
        }

        handle.refresh_status();
        Ok(())
    }

    /// `start` leaves the handle terminal, so observing `InProgress` here
    /// means a caller or implementation defect.
    fn test(&mut self, handle: &mut TransferHandle) -> Result<TestResult> {
        match handle.status {
            TransferStatus::Destination => Ok(TestResult::Complete),
            TransferStatus::Error | TransferStatus::Cancelled => Ok(TestResult::Failed),
            _ => Err(EngineError::InvalidState {
                id: handle.id,
                reason: "synchronous transfer observed in progress".to_string(),
            }),
        }
    }
}
