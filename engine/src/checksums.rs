//! CRC32 computation and verification.
//!
//! Integrity for every transfer is a CRC32 (IEEE polynomial) over the
//! source bytes, computed either eagerly at dispatch or streamed during the
//! copy itself. The checksum is recorded in the descriptor and is immutable
//! once set; a mismatch on verification is always reported, never silently
//! accepted.

use std::io::Read;
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::fs_ops;
use crate::model::{FileEntry, FileStatus};

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Streaming CRC32 (IEEE) accumulator.
#[derive(Debug, Clone)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Crc32 { state: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let idx = ((self.state ^ byte as u32) & 0xFF) as usize;
            self.state = (self.state >> 8) ^ CRC32_TABLE[idx];
        }
    }

    pub fn finalize(self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Open, read, and compute the CRC32 of an entire file.
///
/// Doubles as an existence/readability check at dispatch time.
pub fn compute_file_crc32(path: &Path) -> Result<u32> {
    let mut file = fs_ops::retrying_open_read(path)?;
    let mut crc = Crc32::new();
    let mut buffer = vec![0u8; fs_ops::DEFAULT_FILE_BUF_SIZE];

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => crc.update(&buffer[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::io(path, e)),
        }
    }

    Ok(crc.finalize())
}

/// Re-verify a delivered file against its recorded checksum.
///
/// Recomputes the CRC32 of the destination and compares it to the value
/// recorded at dispatch. On mismatch the entry is marked `Error` and a
/// `ChecksumMismatch` is returned. Entries without a recorded checksum or
/// not yet at `Destination` are left untouched.
pub fn verify_file_entry(entry: &mut FileEntry) -> Result<()> {
    let expected = match (entry.status, entry.crc32) {
        (FileStatus::Destination, Some(crc)) => crc,
        _ => return Ok(()),
    };

    let actual = compute_file_crc32(&entry.destination)?;
    if actual != expected {
        entry.status = FileStatus::Error;
        return Err(EngineError::ChecksumMismatch {
            path: entry.destination.clone(),
            expected,
            actual,
        });
    }

    Ok(())
}
