//! Backend capability interface and dispatcher.
//!
//! Each `BackendKind` maps to exactly one `Backend` implementation. The
//! built-in kinds (`Sync`, `AsyncDaemon`) are wired up by the registry;
//! vendor burst-buffer kinds must be registered by the embedding
//! application through the same narrow contract. A kind with no
//! implementation is an explicit error at create time; there is no default
//! to fall through to.

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::model::{BackendKind, FileEntry, TestResult, TransferHandle};

/// The operations a transfer strategy must provide.
///
/// Vendor backends own their progress reporting but must keep the handle's
/// per-file statuses in the shared vocabulary so the registry's aggregation
/// works unmodified.
pub trait Backend: Send {
    /// Called when a handle is created for this backend.
    fn create(&mut self, _handle: &TransferHandle) -> Result<()> {
        Ok(())
    }

    /// Called when a file pair is attached to a handle.
    fn add_file(&mut self, _handle: &TransferHandle, _entry: &FileEntry) -> Result<()> {
        Ok(())
    }

    /// Begin the transfer. Synchronous backends return only once the
    /// handle is terminal; asynchronous backends return immediately with
    /// the handle in progress.
    fn start(&mut self, handle: &mut TransferHandle) -> Result<()>;

    /// Refresh and report the state of an in-progress handle.
    fn test(&mut self, handle: &mut TransferHandle) -> Result<TestResult>;

    /// Request that an in-progress transfer halt. Backends that finish
    /// within `start` have nothing to do.
    fn cancel(&mut self, _handle: &mut TransferHandle) -> Result<()> {
        Ok(())
    }
}

/// Maps a handle's backend kind to its implementation.
pub struct Dispatcher {
    backends: HashMap<BackendKind, Box<dyn Backend>>,
}

impl Dispatcher {
    /// A dispatcher with no implementations; the registry installs the
    /// built-in backends, the application may add vendor ones.
    pub fn new() -> Self {
        Dispatcher {
            backends: HashMap::new(),
        }
    }

    /// Install (or replace) the implementation for a kind.
    pub fn register(&mut self, kind: BackendKind, backend: Box<dyn Backend>) {
        self.backends.insert(kind, backend);
    }

    /// Resolve a kind to its implementation, or fail explicitly.
    pub fn resolve(&mut self, kind: BackendKind) -> Result<&mut dyn Backend> {
        match self.backends.get_mut(&kind) {
            Some(backend) => Ok(backend.as_mut()),
            None => Err(EngineError::BackendInit {
                kind,
                reason: "no implementation registered for this backend kind".to_string(),
            }),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
