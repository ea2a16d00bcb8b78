/*!
 * Directory transfers
 *
 * A directory transfer enumerates work items (a remote listing for
 * downloads, a filesystem walk for uploads) and dispatches them over a
 * bounded channel to `directory_concurrency` workers, each running one
 * single-object transfer. Item failures go through a [`FailurePolicy`];
 * the first error that policy propagates stops dispatch. Items already
 * running finish; only the caller's token aborts them.
 */

pub mod download;
pub mod paths;
pub mod upload;

pub use download::DownloadDirectoryInput;
pub use upload::UploadDirectoryInput;

use crate::core::download::GetObjectInput;
use crate::core::progress::{
    DirectoryCompleteEvent, DirectoryFailedEvent, DirectoryProgressListeners, DirectoryStartEvent,
    ObjectsTransferredEvent,
};
use crate::core::upload::PutObjectInput;
use crate::error::{Result, TransferError};
use hauler_core_interface::ObjectSummary;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One object to move, validated before it is dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryWorkItem {
    pub key: String,
    pub local_path: PathBuf,
}

/// Decides what happens when one item of a directory transfer fails
///
/// Returning `Ok(())` counts the item as failed and carries on. Returning an
/// error stops the transfer; that error is what the caller receives.
pub trait FailurePolicy: Send + Sync {
    fn on_item_failed(&self, item: &DirectoryWorkItem, error: &TransferError) -> Result<()>;
}

/// Stop the directory transfer at the first failed item
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminatePolicy;

impl FailurePolicy for TerminatePolicy {
    fn on_item_failed(&self, item: &DirectoryWorkItem, error: &TransferError) -> Result<()> {
        Err(TransferError::item_failed(item.key.clone(), error.clone()))
    }
}

/// Count failed items and keep going
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnorePolicy;

impl FailurePolicy for IgnorePolicy {
    fn on_item_failed(&self, item: &DirectoryWorkItem, error: &TransferError) -> Result<()> {
        warn!(key = %item.key, error = %error, "ignoring failed item");
        Ok(())
    }
}

/// Selects which listed objects a directory download fetches
pub trait ObjectFilter: Send + Sync {
    fn filter_object(&self, object: &ObjectSummary) -> bool;
}

impl<F> ObjectFilter for F
where
    F: Fn(&ObjectSummary) -> bool + Send + Sync,
{
    fn filter_object(&self, object: &ObjectSummary) -> bool {
        self(object)
    }
}

/// Selects which local files a directory upload sends
pub trait FileFilter: Send + Sync {
    fn filter_file(&self, path: &Path) -> bool;
}

impl<F> FileFilter for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn filter_file(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Adjusts each per-object download request before it is issued
pub trait GetRequestCallback: Send + Sync {
    fn update_request(&self, input: &mut GetObjectInput);
}

impl<F> GetRequestCallback for F
where
    F: Fn(&mut GetObjectInput) + Send + Sync,
{
    fn update_request(&self, input: &mut GetObjectInput) {
        self(input)
    }
}

/// Adjusts each per-object upload request before it is issued
pub trait PutRequestCallback: Send + Sync {
    fn update_request(&self, input: &mut PutObjectInput);
}

impl<F> PutRequestCallback for F
where
    F: Fn(&mut PutObjectInput) + Send + Sync,
{
    fn update_request(&self, input: &mut PutObjectInput) {
        self(input)
    }
}

/// Counts reported by a finished directory transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryTransferOutput {
    pub objects_transferred: u64,
    /// Items whose failure the policy absorbed
    pub objects_failed: u64,
    pub bytes_transferred: u64,
}

/// Counters and the first-error latch shared by one directory transfer
pub(crate) struct TransferState {
    objects_transferred: AtomicU64,
    objects_failed: AtomicU64,
    bytes_transferred: AtomicU64,
    started: AtomicBool,
    error: Mutex<Option<TransferError>>,
    listeners: DirectoryProgressListeners,
    /// The caller's token; only it aborts in-flight items
    cancel: CancellationToken,
    /// Fired when dispatch must end, by an error or by `cancel`
    stop: CancellationToken,
}

impl TransferState {
    pub(crate) fn new(listeners: DirectoryProgressListeners, cancel: CancellationToken) -> Self {
        Self {
            objects_transferred: AtomicU64::new(0),
            objects_failed: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            started: AtomicBool::new(false),
            error: Mutex::new(None),
            listeners,
            stop: cancel.child_token(),
            cancel,
        }
    }

    /// Token handed to item transfers
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// True once an error is latched or the caller cancelled
    pub(crate) fn is_stopping(&self) -> bool {
        self.stop.is_cancelled() || self.has_error()
    }

    fn has_error(&self) -> bool {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Latch `err` unless an earlier error is already latched, then stop
    /// dispatching; items already running are left to finish
    pub(crate) fn set_error(&self, err: TransferError) {
        {
            let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                debug!(error = %err, "directory transfer stopping");
                *slot = Some(err);
            }
        }
        self.stop.cancel();
    }

    pub(crate) fn start_once(&self, event: impl FnOnce() -> DirectoryStartEvent) {
        if !self.started.swap(true, Ordering::AcqRel) {
            self.listeners.emit_directory_start(&event());
        }
    }

    pub(crate) fn record_success(&self, key: &str, bytes: u64) {
        let objects = self.objects_transferred.fetch_add(1, Ordering::AcqRel) + 1;
        let total = self.bytes_transferred.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.listeners
            .emit_objects_transferred(&ObjectsTransferredEvent {
                key: key.to_string(),
                bytes,
                objects_transferred: objects,
                bytes_transferred: total,
            });
    }

    /// Route an item failure through `policy`
    ///
    /// Errors raised while the transfer is already stopping are teardown
    /// noise and are dropped.
    pub(crate) fn item_failed(
        &self,
        policy: &dyn FailurePolicy,
        item: &DirectoryWorkItem,
        err: TransferError,
    ) {
        if self.has_error() {
            return;
        }
        if self.cancel.is_cancelled() {
            self.set_error(TransferError::Aborted);
            return;
        }
        match policy.on_item_failed(item, &err) {
            Ok(()) => {
                self.objects_failed.fetch_add(1, Ordering::AcqRel);
            }
            Err(propagated) => self.set_error(propagated),
        }
    }

    fn output(&self) -> DirectoryTransferOutput {
        DirectoryTransferOutput {
            objects_transferred: self.objects_transferred.load(Ordering::Acquire),
            objects_failed: self.objects_failed.load(Ordering::Acquire),
            bytes_transferred: self.bytes_transferred.load(Ordering::Acquire),
        }
    }

    /// Emit exactly one terminal event and produce the caller's result
    pub(crate) fn finish(&self) -> Result<DirectoryTransferOutput> {
        let error = self
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let output = self.output();
        match error {
            Some(err) => {
                self.listeners.emit_directory_failed(&DirectoryFailedEvent {
                    error: err.clone(),
                    objects_transferred: output.objects_transferred,
                    objects_failed: output.objects_failed,
                    bytes_transferred: output.bytes_transferred,
                });
                Err(err)
            }
            None => {
                self.listeners
                    .emit_directory_complete(&DirectoryCompleteEvent {
                        objects_transferred: output.objects_transferred,
                        objects_failed: output.objects_failed,
                        bytes_transferred: output.bytes_transferred,
                    });
                Ok(output)
            }
        }
    }
}

/// Bounded hand-off from the enumerating task to the item workers
pub(crate) struct Dispatcher {
    tx: async_channel::Sender<DirectoryWorkItem>,
    workers: JoinSet<()>,
    state: Arc<TransferState>,
}

impl Dispatcher {
    /// Spawn `concurrency` workers, each running `handler` on one item at a time
    pub(crate) fn spawn<F, Fut>(concurrency: usize, state: Arc<TransferState>, handler: F) -> Self
    where
        F: Fn(DirectoryWorkItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let concurrency = concurrency.max(1);
        let (tx, rx) = async_channel::bounded::<DirectoryWorkItem>(concurrency);
        let handler = Arc::new(handler);
        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let rx = rx.clone();
            let handler = handler.clone();
            let state = state.clone();
            workers.spawn(async move {
                while let Ok(item) = rx.recv().await {
                    // drain without working once the transfer is stopping
                    if state.is_stopping() {
                        continue;
                    }
                    handler(item).await;
                }
            });
        }
        Self { tx, workers, state }
    }

    /// Queue one item, waiting while every worker is busy
    ///
    /// Returns false when the transfer is stopping and enumeration should end.
    pub(crate) async fn dispatch(&self, item: DirectoryWorkItem) -> bool {
        if self.state.is_stopping() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.state.stop_token().cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    /// Close the queue and wait for in-flight items to settle
    pub(crate) async fn join(mut self) {
        self.tx.close();
        while let Some(joined) = self.workers.join_next().await {
            if let Err(err) = joined {
                self.state
                    .set_error(TransferError::Io(format!("directory worker panicked: {}", err)));
            }
        }
        // cancelled by the caller with nothing in flight to report it
        if self.state.cancel_token().is_cancelled() {
            self.state.set_error(TransferError::Aborted);
        }
    }
}
