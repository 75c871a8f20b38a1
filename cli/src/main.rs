//! Offload - Command-line interface for the checkpoint transfer engine.
//!
//! This is a simple CLI for testing and manual use of the transfer engine.
//! It drives one handle through its full lifecycle and reports the outcome
//! to stderr. Transfers using the `daemon` backend require a running
//! `offload-daemon` pointed at the same control directory.

use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use engine::{BackendKind, Config, EngineError, Registry, TestResult};

/// Offload - Move checkpoint file sets between storage tiers
#[derive(Parser, Debug)]
#[command(name = "offload")]
#[command(version = "0.1.0")]
#[command(about = "Transfer file sets with crash-recoverable state tracking")]
struct Args {
    /// Control directory for descriptor files
    #[arg(long, value_name = "PATH")]
    control_dir: PathBuf,

    /// Transfer backend: sync or daemon
    #[arg(long, value_name = "BACKEND", default_value = "sync")]
    backend: String,

    /// Name for this transfer
    #[arg(long, value_name = "NAME", default_value = "transfer")]
    name: String,

    /// File to transfer, as SOURCE=DESTINATION (repeatable)
    #[arg(long = "file", value_name = "SRC=DST", required = true)]
    files: Vec<String>,

    /// Re-verify destination checksums after the transfer completes
    #[arg(long)]
    verify: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

fn format_duration(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Split a SOURCE=DESTINATION argument.
fn parse_file_pair(raw: &str) -> Result<(PathBuf, PathBuf), String> {
    match raw.split_once('=') {
        Some((src, dst)) if !src.is_empty() && !dst.is_empty() => {
            Ok((PathBuf::from(src), PathBuf::from(dst)))
        }
        _ => Err(format!(
            "Invalid file pair '{}'. Expected SOURCE=DESTINATION",
            raw
        )),
    }
}

/// Parse and validate command-line arguments, then run the transfer
fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if args.verbose { "debug" } else { "warn" })
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    // Exit code tracking
    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), String> {
    let backend = BackendKind::parse(&args.backend)
        .ok_or_else(|| EngineError::UnrecognizedBackend(args.backend.clone()).to_string())?;

    let pairs = args
        .files
        .iter()
        .map(|raw| parse_file_pair(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let start_time = Instant::now();
    let mut registry = Registry::init(Config::new(&args.control_dir))
        .map_err(|e| format!("Engine startup failed: {}", e))?;

    let id = registry
        .create(backend, &args.name)
        .map_err(|e| format!("Handle creation failed: {}", e))?;

    for (src, dst) in &pairs {
        registry
            .add_file(id, src, dst)
            .map_err(|e| format!("Cannot add {}: {}", src.display(), e))?;
        if args.verbose {
            eprintln!("Queued: {} -> {}", src.display(), dst.display());
        }
    }

    eprintln!(
        "Transferring {} file(s) via {} backend...",
        pairs.len(),
        backend
    );

    registry
        .dispatch(id)
        .map_err(|e| format!("Dispatch failed: {}", e))?;

    let result = registry
        .wait(id)
        .map_err(|e| format!("Transfer failed: {}", e))?;

    let handle = registry
        .handle(id)
        .ok_or_else(|| "Handle vanished during transfer".to_string())?;
    let total_bytes: u64 = handle.files.iter().map(|f| f.bytes_written).sum();
    let delivered = handle
        .files
        .iter()
        .filter(|f| f.status == engine::FileStatus::Destination)
        .count();

    eprintln!();
    eprintln!(
        "Summary: {} of {} delivered, {} in {}",
        delivered,
        handle.files.len(),
        format_bytes(total_bytes),
        format_duration(start_time.elapsed())
    );

    if result != TestResult::Complete {
        for file in &handle.files {
            if file.status != engine::FileStatus::Destination {
                eprintln!("  Not delivered: {}", file.source.display());
            }
        }
        return Err("One or more files failed to transfer".to_string());
    }

    if args.verify {
        registry
            .verify(id)
            .map_err(|e| format!("Verification failed: {}", e))?;
        eprintln!("Verification: all destination checksums match");
    }

    registry
        .free(id)
        .map_err(|e| format!("Cleanup failed: {}", e))?;
    registry
        .finalize()
        .map_err(|e| format!("Shutdown failed: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base_args(src: &std::path::Path, dst: &std::path::Path, ctl: &std::path::Path) -> Args {
        Args {
            control_dir: ctl.to_path_buf(),
            backend: "sync".to_string(),
            name: "test".to_string(),
            files: vec![format!("{}={}", src.display(), dst.display())],
            verify: false,
            verbose: false,
        }
    }

    #[test]
    fn test_cli_sync_transfer() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let src = dir.path().join("ckpt");
        let dst = dir.path().join("out/ckpt");
        std::fs::write(&src, "hello").expect("Failed to write file");

        let args = base_args(&src, &dst, &dir.path().join("ctl"));
        let result = run_cli(&args);
        assert!(result.is_ok(), "CLI should succeed: {:?}", result);
        assert_eq!(std::fs::read(&dst).expect("read dest"), b"hello");
    }

    #[test]
    fn test_cli_with_verification() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let src = dir.path().join("ckpt");
        let dst = dir.path().join("out/ckpt");
        std::fs::write(&src, "hello").expect("Failed to write file");

        let mut args = base_args(&src, &dst, &dir.path().join("ctl"));
        args.verify = true;
        let result = run_cli(&args);
        assert!(result.is_ok(), "CLI should succeed with verification");
    }

    #[test]
    fn test_cli_rejects_missing_source() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let args = base_args(
            &dir.path().join("nonexistent"),
            &dir.path().join("out/x"),
            &dir.path().join("ctl"),
        );
        let result = run_cli(&args);
        assert!(result.is_err(), "CLI should reject missing source");
    }

    #[test]
    fn test_cli_rejects_invalid_backend() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let src = dir.path().join("ckpt");
        std::fs::write(&src, "hello").expect("Failed to write file");

        let mut args = base_args(&src, &dir.path().join("out/ckpt"), &dir.path().join("ctl"));
        args.backend = "carrier-pigeon".to_string();
        let result = run_cli(&args);
        assert!(result.is_err(), "CLI should reject unknown backend");
    }

    #[test]
    fn test_cli_rejects_unregistered_vendor_backend() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let src = dir.path().join("ckpt");
        std::fs::write(&src, "hello").expect("Failed to write file");

        let mut args = base_args(&src, &dir.path().join("out/ckpt"), &dir.path().join("ctl"));
        args.backend = "burst-buffer-a".to_string();
        let result = run_cli(&args);
        assert!(result.is_err(), "vendor kinds need a registered backend");
    }

    #[test]
    fn test_cli_rejects_malformed_file_pair() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut args = base_args(
            &dir.path().join("a"),
            &dir.path().join("b"),
            &dir.path().join("ctl"),
        );
        args.files = vec!["no-separator".to_string()];
        let result = run_cli(&args);
        assert!(result.is_err(), "CLI should reject malformed pairs");
    }

    #[test]
    fn test_parse_file_pair() {
        let (src, dst) = parse_file_pair("/a/b=/c/d").expect("valid pair");
        assert_eq!(src, PathBuf::from("/a/b"));
        assert_eq!(dst, PathBuf::from("/c/d"));
        assert!(parse_file_pair("=x").is_err());
        assert!(parse_file_pair("x=").is_err());
    }
}
