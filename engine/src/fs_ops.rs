//! Reliable filesystem primitives.
//!
//! Every operation here retries transient failures a bounded number of
//! times before surfacing an error, so callers never see an interrupted
//! syscall or a partial read/write as success. The streaming copy
//! accumulates a CRC32 over the source bytes as they are read.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::checksums::Crc32;
use crate::error::{EngineError, Result};

/// Chunk size used for streaming copies and checksums.
pub const DEFAULT_FILE_BUF_SIZE: usize = 1024 * 1024;

/// Bounded retry budget for opening files.
const MAX_OPEN_ATTEMPTS: u32 = 5;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Open a file with the given options, retrying a bounded number of times.
pub fn retrying_open(path: &Path, options: &OpenOptions) -> Result<File> {
    let mut last_err = None;
    for attempt in 0..MAX_OPEN_ATTEMPTS {
        match options.open(path) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Waiting will not make the file appear.
                return Err(EngineError::io(path, e));
            }
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    attempt,
                    error = %e,
                    "open failed, retrying"
                );
                last_err = Some(e);
                thread::sleep(OPEN_RETRY_DELAY);
            }
        }
    }
    let source = last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "open failed"));
    Err(EngineError::io(path, source))
}

/// Open a file for reading with the standard retry discipline.
pub fn retrying_open_read(path: &Path) -> Result<File> {
    retrying_open(path, OpenOptions::new().read(true))
}

/// Create or truncate a file for writing with the standard retry discipline.
pub fn retrying_open_write(path: &Path) -> Result<File> {
    retrying_open(path, OpenOptions::new().write(true).create(true).truncate(true))
}

/// Read up to `buf.len()` bytes, looping until the buffer is full or EOF.
///
/// Partial reads and interrupted syscalls are retried; the returned count
/// is only short of the buffer length at end of file.
pub fn read_attempt(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Write the entire buffer, retrying partial writes and interruptions.
pub fn write_attempt(file: &mut File, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match file.write(&buf[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned zero bytes",
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Copy `src` into `dst` in fixed-size chunks, computing a CRC32 over the
/// source bytes as read.
///
/// The destination's parent directories are created first. The destination
/// is fsynced before return and its mtime is set to match the source on a
/// best-effort basis. On an unrecoverable failure a partial destination
/// file is left behind; callers must treat it as invalid and re-attempt
/// from scratch.
pub fn copy_with_checksum(src: &Path, dst: &Path, buf_size: usize) -> Result<(u64, u32)> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = retrying_open_read(src)?;
    let src_mtime = src_file
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .map(filetime::FileTime::from_system_time);

    let mut dst_file = retrying_open_write(dst)?;

    let mut buffer = vec![0u8; buf_size.max(1)];
    let mut crc = Crc32::new();
    let mut copied: u64 = 0;

    loop {
        let n = read_attempt(&mut src_file, &mut buffer).map_err(|e| EngineError::io(src, e))?;
        if n == 0 {
            break;
        }
        crc.update(&buffer[..n]);
        write_attempt(&mut dst_file, &buffer[..n]).map_err(|e| EngineError::io(dst, e))?;
        copied += n as u64;
    }

    dst_file.sync_all().map_err(|e| EngineError::io(dst, e))?;
    drop(dst_file);

    if let Some(mtime) = src_mtime {
        let _ = filetime::set_file_mtime(dst, mtime);
    }

    Ok((copied, crc.finalize()))
}

/// Return the byte length of a file.
pub fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| EngineError::io(path, e))
}

/// Delete a file; a file that is already gone is not an error.
pub fn unlink(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::io(path, e)),
    }
}

/// Ensure the parent directory of a path exists, creating it recursively
/// if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))
}
