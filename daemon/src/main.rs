//! Offload daemon - background worker for asynchronous transfers.
//!
//! Watches the transfer descriptor in a control directory and performs
//! copies on behalf of handles dispatched with the `daemon` backend. Runs
//! until it observes an exit command in the descriptor, which the owning
//! process writes during startup reconciliation.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use engine::{fs_ops, Daemon, TRANSFER_FILE_NAME};

/// Offload daemon - performs transfers dispatched by the offload engine
#[derive(Parser, Debug)]
#[command(name = "offload-daemon")]
#[command(version = "0.1.0")]
#[command(about = "Background copy worker for the offload transfer engine")]
struct Args {
    /// Control directory shared with the owning process
    #[arg(long, value_name = "PATH")]
    control_dir: PathBuf,

    /// Poll interval in milliseconds when idle
    #[arg(long, value_name = "MS", default_value_t = 100)]
    poll_ms: u64,

    /// Copy buffer size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = fs_ops::DEFAULT_FILE_BUF_SIZE)]
    buf_size: usize,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let daemon = Daemon::new(
        args.control_dir.join(TRANSFER_FILE_NAME),
        args.buf_size,
        Duration::from_millis(args.poll_ms),
    );

    if let Err(e) = daemon.run() {
        tracing::error!(error = %e, "daemon terminated abnormally");
        std::process::exit(1);
    }
}
