//! Transfer handle registry and state machine.
//!
//! The registry owns the in-memory view of every handle, assigns ids,
//! enforces legal state transitions, and mirrors every meaningful
//! mutation to the flush descriptor so a restarted process can
//! reconstruct state without re-scanning the filesystem. It is
//! constructed at `init` and consumed by `finalize`; callers pass it
//! around explicitly rather than going through process-wide state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::backend::{Backend, Dispatcher};
use crate::checksums;
use crate::daemon::{self, DaemonBackend};
use crate::descriptor::{
    FlushDocument, HandleRecord, TransferDocument, FLUSH_FILE_NAME, TRANSFER_FILE_NAME,
};
use crate::error::{EngineError, Result};
use crate::fs_ops;
use crate::model::{
    BackendKind, FileEntry, FileStatus, TestResult, TransferHandle, TransferStatus,
};
use crate::sync::SyncBackend;

/// Engine configuration. Loading this from a file or environment is the
/// embedding application's concern.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the descriptor files
    pub control_dir: PathBuf,
    /// Chunk size for streaming copies
    pub file_buf_size: usize,
    /// Sleep between polls in `wait` and in the daemon loop
    pub poll_interval: Duration,
    /// How long `init` waits for a stale daemon to acknowledge an exit
    pub drain_timeout: Duration,
}

impl Config {
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Config {
            control_dir: control_dir.into(),
            file_buf_size: fs_ops::DEFAULT_FILE_BUF_SIZE,
            poll_interval: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Owns all transfer handles for one process.
pub struct Registry {
    config: Config,
    flush_file: PathBuf,
    transfer_file: PathBuf,
    next_id: u64,
    handles: BTreeMap<u64, TransferHandle>,
    dispatcher: Dispatcher,
}

impl Registry {
    /// Bring the engine up: load persisted handle state, reconcile and
    /// clear any transfer descriptor left over from a prior run, and wire
    /// up the built-in backends.
    pub fn init(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.control_dir).map_err(|e| {
            EngineError::Config(format!(
                "control directory {} unusable: {}",
                config.control_dir.display(),
                e
            ))
        })?;

        let flush_file = config.control_dir.join(FLUSH_FILE_NAME);
        let transfer_file = config.control_dir.join(TRANSFER_FILE_NAME);

        let flush = FlushDocument::load(&flush_file)?;
        let mut handles: BTreeMap<u64, TransferHandle> = flush
            .handles
            .into_iter()
            .map(|(id, record)| (id, record.into_handle(id)))
            .collect();
        let next_id = handles.keys().next_back().map_or(1, |max| max + 1);

        // No command file may outlive its creating process: stop any
        // still-running daemon, fold its last reports into our handles,
        // and clear the channel before issuing new work.
        if let Some(stale) = daemon::drain_stale(
            &transfer_file,
            config.drain_timeout,
            config.poll_interval,
        )? {
            for (id, entry) in &stale.entries {
                let Some(handle) = handles.get_mut(id) else {
                    continue;
                };
                for record in &entry.files {
                    if let Some(file) = handle.file_mut(&record.source) {
                        file.bytes_written = record.written;
                        file.status = match record.status {
                            // The daemon is gone; anything it left in
                            // flight did not finish.
                            FileStatus::InProgress => FileStatus::Error,
                            status => status,
                        };
                    }
                }
                handle.refresh_status();
                tracing::info!(
                    handle = id,
                    status = %handle.status,
                    "reconciled leftover transfer state"
                );
            }
        }

        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            BackendKind::Sync,
            Box::new(SyncBackend::new(config.file_buf_size)),
        );
        dispatcher.register(
            BackendKind::AsyncDaemon,
            Box::new(DaemonBackend::new(transfer_file.clone())),
        );

        let registry = Registry {
            config,
            flush_file,
            transfer_file,
            next_id,
            handles,
            dispatcher,
        };
        registry.persist()?;
        tracing::info!(
            control_dir = %registry.config.control_dir.display(),
            handles = registry.handles.len(),
            "transfer registry initialized"
        );
        Ok(registry)
    }

    /// Install an external (vendor) backend implementation.
    pub fn register_backend(&mut self, kind: BackendKind, backend: Box<dyn Backend>) {
        self.dispatcher.register(kind, backend);
    }

    /// Shut the engine down, removing the process-private descriptor.
    /// Destination files are untouched.
    pub fn finalize(self) -> Result<()> {
        fs_ops::unlink(&self.flush_file)
    }

    /// Path of the daemon-shared transfer descriptor.
    pub fn transfer_file(&self) -> &Path {
        &self.transfer_file
    }

    /// Look up a handle.
    pub fn handle(&self, id: u64) -> Option<&TransferHandle> {
        self.handles.get(&id)
    }

    /// Allocate a handle for the given backend. Ids are strictly
    /// increasing and never reused for the lifetime of the store.
    pub fn create(&mut self, backend: BackendKind, name: &str) -> Result<u64> {
        let id = self.next_id;
        let handle = TransferHandle::new(id, backend, name);
        self.dispatcher.resolve(backend)?.create(&handle)?;

        self.next_id += 1;
        self.handles.insert(id, handle);
        self.persist()?;
        tracing::debug!(handle = id, backend = %backend, name, "handle created");
        Ok(id)
    }

    /// Attach a source/destination pair to a handle. Only legal while the
    /// handle is still in its initial state; growing a dispatched
    /// transfer is not supported.
    pub fn add_file(
        &mut self,
        id: u64,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Result<()> {
        let source = source.into();
        let destination = destination.into();

        let handle = self.handles.get_mut(&id).ok_or(EngineError::HandleNotFound(id))?;
        if handle.status != TransferStatus::Source {
            return Err(EngineError::InvalidState {
                id,
                reason: "files may only be added before dispatch".to_string(),
            });
        }
        if handle.file(&source).is_some() {
            return Err(EngineError::InvalidState {
                id,
                reason: format!("source {} already attached", source.display()),
            });
        }

        let size = fs_ops::file_size(&source)?;
        let entry = FileEntry::new(source, destination, size);
        self.dispatcher.resolve(handle.backend)?.add_file(handle, &entry)?;
        handle.files.push(entry);
        self.persist()
    }

    /// Start the transfer. Checksums missing from earlier dispatches are
    /// computed eagerly, which doubles as a readability check on every
    /// source; destination parents are created up front so backends can
    /// assume they exist.
    ///
    /// Synchronous backends return with the handle terminal; asynchronous
    /// ones return immediately with the handle in progress.
    pub fn dispatch(&mut self, id: u64) -> Result<()> {
        let handle = self.handles.get_mut(&id).ok_or(EngineError::HandleNotFound(id))?;

        match handle.status {
            TransferStatus::Source => {}
            TransferStatus::Cancelled => {
                // Explicit reset: anything not delivered goes back to the
                // start; recorded checksums stay.
                for file in &mut handle.files {
                    if file.status != FileStatus::Destination {
                        file.status = FileStatus::Source;
                        file.bytes_written = 0;
                    }
                }
                handle.status = TransferStatus::Source;
            }
            status => {
                return Err(EngineError::InvalidState {
                    id,
                    reason: format!("cannot dispatch a handle in state {}", status),
                });
            }
        }

        let precheck: Result<()> = handle.files.iter_mut().try_for_each(|file| {
            if file.crc32.is_none() {
                file.crc32 = Some(checksums::compute_file_crc32(&file.source)?);
            }
            fs_ops::ensure_parent_dir_exists(&file.destination)
        });
        if let Err(e) = precheck {
            handle.refresh_status();
            self.persist()?;
            return Err(e);
        }

        handle.dispatched_at = Some(chrono::Utc::now());

        let backend = self.dispatcher.resolve(handle.backend)?;
        let started = backend.start(handle);
        self.persist()?;
        started
    }

    /// Report a dispatched handle's state. Terminal answers are
    /// idempotent and touch nothing; in-progress handles are refreshed
    /// through their backend and the result persisted.
    pub fn test(&mut self, id: u64) -> Result<TestResult> {
        let handle = self.handles.get_mut(&id).ok_or(EngineError::HandleNotFound(id))?;

        match handle.status {
            TransferStatus::Source => Err(EngineError::InvalidState {
                id,
                reason: "transfer was never dispatched".to_string(),
            }),
            TransferStatus::Destination => Ok(TestResult::Complete),
            TransferStatus::Error | TransferStatus::Cancelled => Ok(TestResult::Failed),
            TransferStatus::InProgress => {
                let backend = self.dispatcher.resolve(handle.backend)?;
                let result = backend.test(handle)?;
                self.persist()?;
                Ok(result)
            }
        }
    }

    /// Block until the handle is terminal, polling `test` with backoff.
    /// For synchronous backends this returns immediately, since dispatch
    /// already finished the work.
    pub fn wait(&mut self, id: u64) -> Result<TestResult> {
        let mut delay = Duration::from_millis(20);
        loop {
            match self.test(id)? {
                TestResult::InProgress => {
                    thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_millis(500));
                }
                result => return Ok(result),
            }
        }
    }

    /// Best-effort halt of an in-progress transfer. Terminal and
    /// never-dispatched handles are a no-op success, as is a synchronous
    /// handle (its dispatch already finished). The halt itself is
    /// observed via `test` or `wait`.
    pub fn cancel(&mut self, id: u64) -> Result<()> {
        let handle = self.handles.get_mut(&id).ok_or(EngineError::HandleNotFound(id))?;
        if handle.status != TransferStatus::InProgress {
            return Ok(());
        }
        self.dispatcher.resolve(handle.backend)?.cancel(handle)?;
        self.persist()
    }

    /// Drop a handle from the registry and both descriptors. Files
    /// already copied stay where they are.
    pub fn free(&mut self, id: u64) -> Result<()> {
        let handle = self.handles.remove(&id).ok_or(EngineError::HandleNotFound(id))?;
        if handle.backend == BackendKind::AsyncDaemon {
            daemon::remove_entry(&self.transfer_file, id)?;
        }
        self.persist()
    }

    /// Re-verify every delivered file of a handle against its recorded
    /// checksum. The first mismatch marks that file `Error`, is persisted,
    /// and is returned; it is never silently accepted.
    pub fn verify(&mut self, id: u64) -> Result<()> {
        let handle = self.handles.get_mut(&id).ok_or(EngineError::HandleNotFound(id))?;

        for idx in 0..handle.files.len() {
            if let Err(e) = checksums::verify_file_entry(&mut handle.files[idx]) {
                handle.refresh_status();
                self.persist()?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Atomically rewrite the flush descriptor from the in-memory view.
    fn persist(&self) -> Result<()> {
        let mut doc = FlushDocument::default();
        for (id, handle) in &self.handles {
            doc.set(*id, HandleRecord::from(handle));
        }
        doc.persist(&self.flush_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::Daemon;
    use crate::descriptor::TransferEntry;
    use crate::model::DaemonState;

    fn test_config(dir: &Path) -> Config {
        Config {
            poll_interval: Duration::from_millis(10),
            drain_timeout: Duration::from_millis(50),
            ..Config::new(dir.join("ctl"))
        }
    }

    fn source_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).expect("Failed to write source");
        path
    }

    #[test]
    fn test_create_ids_strictly_increase() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let mut previous = 0;
        for _ in 0..5 {
            let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn test_add_unknown_handle_leaves_store_unchanged() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(temp_dir.path());
        let flush_file = config.control_dir.join(FLUSH_FILE_NAME);
        let mut registry = Registry::init(config).expect("init");
        registry.create(BackendKind::Sync, "ckpt").expect("create");

        let before = fs::read(&flush_file).expect("read store");
        let result = registry.add_file(999, "/nope", "/nowhere");
        assert!(matches!(result, Err(EngineError::HandleNotFound(999))));
        let after = fs::read(&flush_file).expect("read store");
        assert_eq!(before, after);
    }

    #[test]
    fn test_sync_round_trip() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let src = source_file(temp_dir.path(), "ckpt.0", b"checkpoint bytes");
        let dst = temp_dir.path().join("pfs/ckpt.0");

        let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
        registry.add_file(id, &src, &dst).expect("add");
        registry.dispatch(id).expect("dispatch");

        assert_eq!(registry.test(id).expect("test"), TestResult::Complete);
        assert_eq!(fs::read(&dst).expect("read dest"), b"checkpoint bytes");

        let entry = &registry.handle(id).expect("handle").files[0];
        assert_eq!(
            entry.crc32,
            Some(checksums::compute_file_crc32(&dst).expect("crc"))
        );

        // Terminal answers are idempotent.
        assert_eq!(registry.test(id).expect("test"), TestResult::Complete);
        assert_eq!(registry.wait(id).expect("wait"), TestResult::Complete);
    }

    #[test]
    fn test_test_before_dispatch_is_caller_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");
        let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
        assert!(matches!(
            registry.test(id),
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_add_after_dispatch_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let src = source_file(temp_dir.path(), "a", b"data");
        let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
        registry
            .add_file(id, &src, temp_dir.path().join("out/a"))
            .expect("add");
        registry.dispatch(id).expect("dispatch");

        let result = registry.add_file(id, temp_dir.path().join("b"), temp_dir.path().join("out/b"));
        assert!(matches!(result, Err(EngineError::InvalidState { .. })));
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let src = source_file(temp_dir.path(), "a", b"data");
        let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
        registry.add_file(id, &src, temp_dir.path().join("out/a")).expect("add");
        let result = registry.add_file(id, &src, temp_dir.path().join("elsewhere/a"));
        assert!(matches!(result, Err(EngineError::InvalidState { .. })));
    }

    #[test]
    fn test_vendor_backend_requires_registration() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let result = registry.create(BackendKind::BurstBufferA, "ckpt");
        assert!(matches!(result, Err(EngineError::BackendInit { .. })));
        // The failed create consumed no id and created no handle.
        let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
        assert_eq!(id, 1);
    }

    #[test]
    fn test_free_removes_handle_and_keeps_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let src = source_file(temp_dir.path(), "a", b"payload");
        let dst = temp_dir.path().join("out/a");
        let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
        registry.add_file(id, &src, &dst).expect("add");
        registry.dispatch(id).expect("dispatch");

        registry.free(id).expect("free");
        assert!(registry.handle(id).is_none());
        assert!(dst.exists());
        assert!(matches!(
            registry.test(id),
            Err(EngineError::HandleNotFound(_))
        ));
    }

    #[test]
    fn test_crash_recovery_restores_state() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(temp_dir.path());

        let src = source_file(temp_dir.path(), "ckpt.1", b"persisted state");
        let dst = temp_dir.path().join("pfs/ckpt.1");

        let id;
        {
            let mut registry = Registry::init(config.clone()).expect("init");
            id = registry.create(BackendKind::Sync, "ckpt.1").expect("create");
            registry.add_file(id, &src, &dst).expect("add");
            registry.dispatch(id).expect("dispatch");
            // Dropped without finalize: simulated crash.
        }

        let mut registry = Registry::init(config).expect("re-init");
        let handle = registry.handle(id).expect("reloaded handle");
        assert_eq!(handle.status, TransferStatus::Destination);
        assert_eq!(handle.files[0].status, FileStatus::Destination);
        assert!(handle.files[0].crc32.is_some());
        assert_eq!(registry.test(id).expect("test"), TestResult::Complete);

        // New ids continue past everything ever persisted.
        let next = registry.create(BackendKind::Sync, "later").expect("create");
        assert!(next > id);
    }

    #[test]
    fn test_verify_detects_corrupted_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let src = source_file(temp_dir.path(), "a", b"original contents");
        let dst = temp_dir.path().join("out/a");
        let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
        registry.add_file(id, &src, &dst).expect("add");
        registry.dispatch(id).expect("dispatch");
        registry.verify(id).expect("clean verify");

        fs::write(&dst, b"corrupted contents").expect("corrupt dest");
        let result = registry.verify(id);
        assert!(matches!(result, Err(EngineError::ChecksumMismatch { .. })));
        let handle = registry.handle(id).expect("handle");
        assert_eq!(handle.files[0].status, FileStatus::Error);
        assert_eq!(registry.test(id).expect("test"), TestResult::Failed);
    }

    #[test]
    fn test_daemon_round_trip_through_registry() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(temp_dir.path());
        let mut registry = Registry::init(config.clone()).expect("init");

        let src = source_file(temp_dir.path(), "ckpt.2", b"daemon payload");
        let dst = temp_dir.path().join("pfs/ckpt.2");

        let id = registry.create(BackendKind::AsyncDaemon, "ckpt").expect("create");
        registry.add_file(id, &src, &dst).expect("add");
        registry.dispatch(id).expect("dispatch");

        // Dispatch returned immediately; nothing has copied yet.
        assert_eq!(registry.test(id).expect("test"), TestResult::InProgress);
        assert!(!dst.exists());

        let worker = Daemon::new(
            registry.transfer_file().to_path_buf(),
            config.file_buf_size,
            config.poll_interval,
        );
        let thread = thread::spawn(move || worker.run());

        assert_eq!(registry.wait(id).expect("wait"), TestResult::Complete);
        assert_eq!(fs::read(&dst).expect("read dest"), b"daemon payload");

        // Stop the worker via the descriptor, as init's drain would. The
        // write races the daemon's idle-state persist, so repeat it until
        // the exit is observed.
        for _ in 0..500 {
            let mut doc = TransferDocument::load(registry.transfer_file()).expect("load");
            if doc.state == DaemonState::Exited {
                break;
            }
            doc.command = Some(crate::model::DaemonCommand::Exit);
            doc.persist(registry.transfer_file()).expect("persist");
            thread::sleep(config.poll_interval);
        }
        thread.join().expect("join").expect("daemon run");
    }

    #[test]
    fn test_init_reconciles_stale_transfer_descriptor() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(temp_dir.path());

        let src = source_file(temp_dir.path(), "ckpt.3", b"interrupted");
        let dst = temp_dir.path().join("pfs/ckpt.3");

        let id;
        {
            let mut registry = Registry::init(config.clone()).expect("init");
            id = registry.create(BackendKind::AsyncDaemon, "ckpt").expect("create");
            registry.add_file(id, &src, &dst).expect("add");
            registry.dispatch(id).expect("dispatch");
            // Crash with the daemon mid-file: fake the daemon's report.
            let transfer_file = registry.transfer_file().to_path_buf();
            let mut doc = TransferDocument::load(&transfer_file).expect("load");
            doc.state = DaemonState::Running;
            if let Some(entry) = doc.entries.get_mut(&id) {
                entry.files[0].status = FileStatus::InProgress;
                entry.files[0].written = 3;
            }
            doc.persist(&transfer_file).expect("persist");
        }

        let registry = Registry::init(config.clone()).expect("re-init");
        // The transfer descriptor was drained and cleared...
        assert!(!config.control_dir.join(TRANSFER_FILE_NAME).exists());
        // ...and the interrupted file was folded in as failed.
        let handle = registry.handle(id).expect("handle");
        assert_eq!(handle.files[0].status, FileStatus::Error);
        assert_eq!(handle.status, TransferStatus::Error);
    }

    #[test]
    fn test_cancelled_daemon_handle_can_be_redispatched() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(temp_dir.path());
        let mut registry = Registry::init(config.clone()).expect("init");

        let src1 = source_file(temp_dir.path(), "one", b"first");
        let src2 = source_file(temp_dir.path(), "two", b"second");
        let dst1 = temp_dir.path().join("pfs/one");
        let dst2 = temp_dir.path().join("pfs/two");

        let id = registry.create(BackendKind::AsyncDaemon, "ckpt").expect("create");
        registry.add_file(id, &src1, &dst1).expect("add");
        registry.add_file(id, &src2, &dst2).expect("add");
        registry.dispatch(id).expect("dispatch");

        let worker = Daemon::new(
            registry.transfer_file().to_path_buf(),
            config.file_buf_size,
            config.poll_interval,
        );
        // Deliver the first file, then honor the cancel.
        worker.poll_once().expect("tick");
        registry.cancel(id).expect("cancel");
        worker.poll_once().expect("tick");

        assert_eq!(registry.wait(id).expect("wait"), TestResult::Failed);
        let handle = registry.handle(id).expect("handle");
        assert_eq!(handle.status, TransferStatus::Cancelled);
        assert!(dst1.exists());
        assert!(!dst2.exists());

        // Re-dispatch picks up where the cancel left off.
        registry.dispatch(id).expect("re-dispatch");
        worker.poll_once().expect("tick");
        worker.poll_once().expect("tick");
        assert_eq!(registry.wait(id).expect("wait"), TestResult::Complete);
        assert_eq!(fs::read(&dst2).expect("read"), b"second");
    }

    #[test]
    fn test_cancel_on_sync_handle_is_noop_success() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let src = source_file(temp_dir.path(), "a", b"data");
        let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
        registry.add_file(id, &src, temp_dir.path().join("out/a")).expect("add");
        registry.dispatch(id).expect("dispatch");

        registry.cancel(id).expect("cancel is a no-op");
        assert_eq!(registry.test(id).expect("test"), TestResult::Complete);
    }

    #[test]
    fn test_dispatch_missing_source_fails() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let src = source_file(temp_dir.path(), "a", b"data");
        let id = registry.create(BackendKind::Sync, "ckpt").expect("create");
        registry.add_file(id, &src, temp_dir.path().join("out/a")).expect("add");
        // The source vanishes between add and dispatch.
        fs::remove_file(&src).expect("remove source");

        let result = registry.dispatch(id);
        assert!(matches!(result, Err(EngineError::Io { .. })));
    }

    #[test]
    fn test_finalize_removes_flush_descriptor() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(temp_dir.path());
        let flush_file = config.control_dir.join(FLUSH_FILE_NAME);

        let registry = Registry::init(config).expect("init");
        assert!(flush_file.exists());
        registry.finalize().expect("finalize");
        assert!(!flush_file.exists());
    }

    #[test]
    fn test_empty_handle_dispatch_completes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut registry = Registry::init(test_config(temp_dir.path())).expect("init");

        let id = registry.create(BackendKind::Sync, "empty").expect("create");
        registry.dispatch(id).expect("dispatch");
        assert_eq!(registry.test(id).expect("test"), TestResult::Complete);
    }

    #[test]
    fn test_stale_entry_for_unknown_handle_ignored() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(temp_dir.path());
        fs::create_dir_all(&config.control_dir).expect("mkdir");

        let mut doc = TransferDocument::default();
        let mut handle = TransferHandle::new(42, BackendKind::AsyncDaemon, "ghost");
        handle
            .files
            .push(FileEntry::new(PathBuf::from("/a"), PathBuf::from("/b"), 1));
        doc.entries.insert(42, TransferEntry::run(&handle));
        doc.persist(&config.control_dir.join(TRANSFER_FILE_NAME))
            .expect("persist");

        let registry = Registry::init(config).expect("init");
        assert!(registry.handle(42).is_none());
    }
}
