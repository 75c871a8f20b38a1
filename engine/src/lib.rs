//! # Offload Engine - Checkpoint Transfer Library
//!
//! An asynchronous, fault-tolerant file transfer engine for moving
//! checkpoint sets between storage tiers. Designed as the foundation for
//! multiple front ends (CLI, daemon, embedding applications).
//!
//! ## Overview
//!
//! The engine copies lists of files on behalf of transfer handles and
//! survives process crashes. It features:
//! - Handle-based lifecycle (create, add files, dispatch, test/wait, free)
//! - Synchronous and daemon-offloaded transfer backends behind one trait
//! - Durable descriptor files for crash recovery and daemon IPC
//! - Per-file state tracking with CRC32 integrity checks
//! - Comprehensive error handling
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{BackendKind, Config, Registry, TestResult};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Bring the engine up, recovering any persisted state
//! let mut registry = Registry::init(Config::new("/scratch/.offload"))?;
//!
//! // Describe a transfer
//! let id = registry.create(BackendKind::Sync, "ckpt.42")?;
//! registry.add_file(id, "/scratch/ckpt.42/rank_0", "/pfs/ckpt.42/rank_0")?;
//!
//! // Start it and block until it settles
//! registry.dispatch(id)?;
//! match registry.wait(id)? {
//!     TestResult::Complete => println!("delivered"),
//!     other => println!("transfer ended: {:?}", other),
//! }
//!
//! registry.free(id)?;
//! registry.finalize()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (TransferHandle, FileEntry, enums)
//! - **error**: Error types and handling
//! - **fs_ops**: Low-level filesystem operations with bounded retries
//! - **checksums**: CRC32 computation and verification
//! - **descriptor**: Durable JSON descriptor documents
//! - **backend**: Transfer strategy trait and dispatcher
//! - **sync**: In-process synchronous backend
//! - **daemon**: Daemon-offloaded backend and worker loop
//! - **registry**: Handle registry and lifecycle orchestration

pub mod model;
pub mod error;
pub mod fs_ops;
pub mod checksums;
pub mod descriptor;
pub mod backend;
pub mod sync;
pub mod daemon;
pub mod registry;

// Re-export main types and functions
pub use model::{
    BackendKind, DaemonCommand, DaemonState, FileEntry, FileStatus, TestResult, TransferHandle,
    TransferStatus,
};
pub use error::{EngineError, Result};
pub use backend::{Backend, Dispatcher};
pub use sync::SyncBackend;
pub use daemon::{Daemon, DaemonBackend, DaemonTick};
pub use registry::{Config, Registry};
pub use checksums::{compute_file_crc32, verify_file_entry, Crc32};
pub use descriptor::{FlushDocument, TransferDocument, FLUSH_FILE_NAME, TRANSFER_FILE_NAME};
