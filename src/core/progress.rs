/*!
 * Progress listeners for object and directory transfers
 *
 * Listeners are registered up front and called synchronously, in
 * registration order, from whichever task produced the event. They must not
 * block or perform I/O; hand events to a channel with [`ProgressReporter`]
 * when heavier work is needed.
 */

use crate::error::TransferError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone)]
pub struct TransferStartEvent {
    pub bucket: String,
    pub key: String,
    /// Unknown for uploads from unsized streams and part-addressed downloads
    pub total_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BytesTransferredEvent {
    pub bucket: String,
    pub key: String,
    /// Running total for this object
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TransferCompleteEvent {
    pub bucket: String,
    pub key: String,
    pub bytes_transferred: u64,
}

#[derive(Debug, Clone)]
pub struct TransferFailedEvent {
    pub bucket: String,
    pub key: String,
    pub error: TransferError,
    pub bytes_transferred: u64,
}

#[derive(Debug, Clone)]
pub struct DirectoryStartEvent {
    pub bucket: String,
    pub key_prefix: Option<String>,
    pub local_dir: PathBuf,
    pub direction: TransferDirection,
}

/// One directory item finished successfully
#[derive(Debug, Clone)]
pub struct ObjectsTransferredEvent {
    pub key: String,
    pub bytes: u64,
    pub objects_transferred: u64,
    pub bytes_transferred: u64,
}

#[derive(Debug, Clone)]
pub struct DirectoryCompleteEvent {
    pub objects_transferred: u64,
    pub objects_failed: u64,
    pub bytes_transferred: u64,
}

#[derive(Debug, Clone)]
pub struct DirectoryFailedEvent {
    pub error: TransferError,
    pub objects_transferred: u64,
    pub objects_failed: u64,
    pub bytes_transferred: u64,
}

/// Receives single-object transfer events
///
/// Every method defaults to a no-op; implement only what you need.
pub trait ObjectProgressListener: Send + Sync {
    fn on_transfer_start(&self, _event: &TransferStartEvent) {}
    fn on_bytes_transferred(&self, _event: &BytesTransferredEvent) {}
    fn on_transfer_complete(&self, _event: &TransferCompleteEvent) {}
    fn on_transfer_failed(&self, _event: &TransferFailedEvent) {}
}

/// Receives directory transfer events
pub trait DirectoryProgressListener: Send + Sync {
    fn on_directory_start(&self, _event: &DirectoryStartEvent) {}
    fn on_objects_transferred(&self, _event: &ObjectsTransferredEvent) {}
    fn on_directory_complete(&self, _event: &DirectoryCompleteEvent) {}
    fn on_directory_failed(&self, _event: &DirectoryFailedEvent) {}
}

macro_rules! closure_listener {
    ($name:ident, $listener:ident, $method:ident, $event:ty) => {
        struct $name<F>(F);

        impl<F> $listener for $name<F>
        where
            F: Fn(&$event) + Send + Sync,
        {
            fn $method(&self, event: &$event) {
                (self.0)(event)
            }
        }
    };
}

closure_listener!(OnStart, ObjectProgressListener, on_transfer_start, TransferStartEvent);
closure_listener!(OnBytes, ObjectProgressListener, on_bytes_transferred, BytesTransferredEvent);
closure_listener!(OnComplete, ObjectProgressListener, on_transfer_complete, TransferCompleteEvent);
closure_listener!(OnFailed, ObjectProgressListener, on_transfer_failed, TransferFailedEvent);
closure_listener!(OnDirStart, DirectoryProgressListener, on_directory_start, DirectoryStartEvent);
closure_listener!(OnObjects, DirectoryProgressListener, on_objects_transferred, ObjectsTransferredEvent);
closure_listener!(OnDirComplete, DirectoryProgressListener, on_directory_complete, DirectoryCompleteEvent);
closure_listener!(OnDirFailed, DirectoryProgressListener, on_directory_failed, DirectoryFailedEvent);

/// Ordered set of single-object listeners
///
/// Cloning produces an independent list: registering on the clone does not
/// affect the original.
#[derive(Clone, Default)]
pub struct ProgressListeners {
    listeners: Vec<Arc<dyn ObjectProgressListener>>,
}

impl ProgressListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn ObjectProgressListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    pub fn on_transfer_start<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&TransferStartEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(OnStart(f)))
    }

    pub fn on_bytes_transferred<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&BytesTransferredEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(OnBytes(f)))
    }

    pub fn on_transfer_complete<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&TransferCompleteEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(OnComplete(f)))
    }

    pub fn on_transfer_failed<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&TransferFailedEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(OnFailed(f)))
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn emit_transfer_start(&self, event: &TransferStartEvent) {
        for listener in &self.listeners {
            listener.on_transfer_start(event);
        }
    }

    pub fn emit_bytes_transferred(&self, event: &BytesTransferredEvent) {
        for listener in &self.listeners {
            listener.on_bytes_transferred(event);
        }
    }

    pub fn emit_transfer_complete(&self, event: &TransferCompleteEvent) {
        for listener in &self.listeners {
            listener.on_transfer_complete(event);
        }
    }

    pub fn emit_transfer_failed(&self, event: &TransferFailedEvent) {
        for listener in &self.listeners {
            listener.on_transfer_failed(event);
        }
    }
}

impl fmt::Debug for ProgressListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressListeners")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Ordered set of directory listeners
#[derive(Clone, Default)]
pub struct DirectoryProgressListeners {
    listeners: Vec<Arc<dyn DirectoryProgressListener>>,
}

impl DirectoryProgressListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn DirectoryProgressListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    pub fn on_directory_start<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&DirectoryStartEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(OnDirStart(f)))
    }

    pub fn on_objects_transferred<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&ObjectsTransferredEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(OnObjects(f)))
    }

    pub fn on_directory_complete<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&DirectoryCompleteEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(OnDirComplete(f)))
    }

    pub fn on_directory_failed<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&DirectoryFailedEvent) + Send + Sync + 'static,
    {
        self.register(Arc::new(OnDirFailed(f)))
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn emit_directory_start(&self, event: &DirectoryStartEvent) {
        for listener in &self.listeners {
            listener.on_directory_start(event);
        }
    }

    pub fn emit_objects_transferred(&self, event: &ObjectsTransferredEvent) {
        for listener in &self.listeners {
            listener.on_objects_transferred(event);
        }
    }

    pub fn emit_directory_complete(&self, event: &DirectoryCompleteEvent) {
        for listener in &self.listeners {
            listener.on_directory_complete(event);
        }
    }

    pub fn emit_directory_failed(&self, event: &DirectoryFailedEvent) {
        for listener in &self.listeners {
            listener.on_directory_failed(event);
        }
    }
}

impl fmt::Debug for DirectoryProgressListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryProgressListeners")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Owned, serializable form of every event, as delivered by [`ProgressReporter`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TransferStarted {
        bucket: String,
        key: String,
        total_bytes: Option<u64>,
    },
    BytesTransferred {
        key: String,
        bytes_transferred: u64,
        total_bytes: Option<u64>,
    },
    TransferCompleted {
        key: String,
        bytes_transferred: u64,
    },
    TransferFailed {
        key: String,
        error: String,
        bytes_transferred: u64,
    },
    DirectoryStarted {
        bucket: String,
        key_prefix: Option<String>,
        local_dir: PathBuf,
        direction: TransferDirection,
    },
    ObjectTransferred {
        key: String,
        bytes: u64,
        objects_transferred: u64,
        bytes_transferred: u64,
    },
    DirectoryCompleted {
        objects_transferred: u64,
        objects_failed: u64,
        bytes_transferred: u64,
    },
    DirectoryFailed {
        error: String,
        objects_transferred: u64,
        objects_failed: u64,
        bytes_transferred: u64,
    },
}

/// Listener that forwards every event to an unbounded channel
///
/// Send errors are ignored so a dropped receiver never disturbs a transfer.
#[derive(Clone)]
pub struct ProgressReporter {
    sender: UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

impl ObjectProgressListener for ProgressReporter {
    fn on_transfer_start(&self, event: &TransferStartEvent) {
        self.send(ProgressEvent::TransferStarted {
            bucket: event.bucket.clone(),
            key: event.key.clone(),
            total_bytes: event.total_bytes,
        });
    }

    fn on_bytes_transferred(&self, event: &BytesTransferredEvent) {
        self.send(ProgressEvent::BytesTransferred {
            key: event.key.clone(),
            bytes_transferred: event.bytes_transferred,
            total_bytes: event.total_bytes,
        });
    }

    fn on_transfer_complete(&self, event: &TransferCompleteEvent) {
        self.send(ProgressEvent::TransferCompleted {
            key: event.key.clone(),
            bytes_transferred: event.bytes_transferred,
        });
    }

    fn on_transfer_failed(&self, event: &TransferFailedEvent) {
        self.send(ProgressEvent::TransferFailed {
            key: event.key.clone(),
            error: event.error.to_string(),
            bytes_transferred: event.bytes_transferred,
        });
    }
}

impl DirectoryProgressListener for ProgressReporter {
    fn on_directory_start(&self, event: &DirectoryStartEvent) {
        self.send(ProgressEvent::DirectoryStarted {
            bucket: event.bucket.clone(),
            key_prefix: event.key_prefix.clone(),
            local_dir: event.local_dir.clone(),
            direction: event.direction,
        });
    }

    fn on_objects_transferred(&self, event: &ObjectsTransferredEvent) {
        self.send(ProgressEvent::ObjectTransferred {
            key: event.key.clone(),
            bytes: event.bytes,
            objects_transferred: event.objects_transferred,
            bytes_transferred: event.bytes_transferred,
        });
    }

    fn on_directory_complete(&self, event: &DirectoryCompleteEvent) {
        self.send(ProgressEvent::DirectoryCompleted {
            objects_transferred: event.objects_transferred,
            objects_failed: event.objects_failed,
            bytes_transferred: event.bytes_transferred,
        });
    }

    fn on_directory_failed(&self, event: &DirectoryFailedEvent) {
        self.send(ProgressEvent::DirectoryFailed {
            error: event.error.to_string(),
            objects_transferred: event.objects_transferred,
            objects_failed: event.objects_failed,
            bytes_transferred: event.bytes_transferred,
        });
    }
}
