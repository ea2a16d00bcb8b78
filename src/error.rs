/*!
 * Error types for Hauler transfers
 */

use hauler_core_interface::{FsError, StoreError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Process exit codes used by the CLI
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INTEGRITY: i32 = 3;

/// Errors surfaced by single-object and directory transfers
///
/// Every variant is cloneable so one terminal error can be latched by the
/// reader, handed to progress listeners and returned to the caller.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    /// Invalid configuration or request
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("part size must be at least {min} bytes, got {size}")]
    PartSizeTooSmall { size: u64, min: u64 },

    #[error("invalid input range, must be between 0 and {max}")]
    InvalidRange { max: u64 },

    /// Object was replaced between the metadata probe and a chunk fetch
    #[error("object {key} changed during download: expected etag {expected}, got {actual}")]
    ObjectChanged {
        key: String,
        expected: String,
        actual: String,
    },

    /// A chunk kept failing after every retry was spent
    #[error("part {part} failed after {attempts} attempts: {cause}")]
    ChunkRetriesExhausted {
        part: u32,
        attempts: u32,
        cause: StoreError,
    },

    /// Non-retryable store failure
    #[error("transfer failed: {cause}")]
    TransferFailed { cause: StoreError },

    #[error("resolved local path {path} is outside of destination {destination}")]
    PathEscapesDestination { path: PathBuf, destination: PathBuf },

    #[error("traversed duplicate path {0}")]
    DuplicatePath(PathBuf),

    #[error("file name {name} contains the key delimiter {delimiter}")]
    DelimiterInName { name: String, delimiter: String },

    /// Transfer was cancelled
    #[error("transfer aborted")]
    Aborted,

    /// The failure policy rejected a failed item
    #[error("failed to transfer {item}: {source}")]
    ItemFailed {
        item: String,
        #[source]
        source: Box<TransferError>,
    },

    /// Every producer went away before all parts arrived
    #[error("download ended after {received} of {expected} parts")]
    IncompleteDownload { received: u32, expected: u32 },

    #[error("filesystem error at {path}: {message}")]
    Filesystem { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("buffer pool is closed")]
    BufferPoolClosed,
}

impl TransferError {
    /// Wrap an item failure so callers can see which key or path caused it
    pub fn item_failed(item: impl Into<String>, source: TransferError) -> Self {
        TransferError::ItemFailed {
            item: item.into(),
            source: Box::new(source),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, err: FsError) -> Self {
        TransferError::Filesystem {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Check if error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            TransferError::Config(_)
            | TransferError::PartSizeTooSmall { .. }
            | TransferError::InvalidRange { .. }
            | TransferError::ObjectChanged { .. }
            | TransferError::PathEscapesDestination { .. }
            | TransferError::DuplicatePath(_)
            | TransferError::DelimiterInName { .. }
            | TransferError::ChunkRetriesExhausted { .. }
            | TransferError::Aborted
            | TransferError::BufferPoolClosed => true,

            TransferError::TransferFailed { cause } => !cause.is_retryable(),
            TransferError::ItemFailed { source, .. } => source.is_fatal(),

            TransferError::IncompleteDownload { .. }
            | TransferError::Filesystem { .. }
            | TransferError::Io(_) => false,
        }
    }

    /// Check if error is a store-level failure that may succeed on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::TransferFailed { cause } => cause.is_retryable(),
            TransferError::ItemFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Get error category for logging and listener routing
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::Config(_)
            | TransferError::PartSizeTooSmall { .. }
            | TransferError::InvalidRange { .. }
            | TransferError::DelimiterInName { .. } => ErrorCategory::Configuration,
            TransferError::ChunkRetriesExhausted { .. } => ErrorCategory::TransientChunk,
            TransferError::ObjectChanged { .. } => ErrorCategory::ObjectChanged,
            TransferError::PathEscapesDestination { .. } | TransferError::DuplicatePath(_) => {
                ErrorCategory::PathSafety
            }
            TransferError::Aborted => ErrorCategory::Aborted,
            TransferError::ItemFailed { .. } => ErrorCategory::ItemFailurePolicy,
            TransferError::TransferFailed { .. } | TransferError::IncompleteDownload { .. } => {
                ErrorCategory::Transport
            }
            TransferError::Filesystem { .. }
            | TransferError::Io(_)
            | TransferError::BufferPoolClosed => ErrorCategory::Filesystem,
        }
    }

    /// Exit code the CLI reports for this error
    pub fn exit_code(&self) -> i32 {
        match self.root_cause() {
            TransferError::Config(_)
            | TransferError::PartSizeTooSmall { .. }
            | TransferError::InvalidRange { .. }
            | TransferError::PathEscapesDestination { .. }
            | TransferError::DuplicatePath(_)
            | TransferError::DelimiterInName { .. }
            | TransferError::Filesystem { .. } => EXIT_FATAL,
            TransferError::ObjectChanged { .. } => EXIT_INTEGRITY,
            TransferError::TransferFailed { cause } if !cause.is_retryable() => EXIT_FATAL,
            _ => EXIT_PARTIAL,
        }
    }

    /// Strip `ItemFailed` wrappers down to the failure that started it
    pub fn root_cause(&self) -> &TransferError {
        match self {
            TransferError::ItemFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before any network call
    Configuration,
    /// Chunk failures that exhausted local retries
    TransientChunk,
    /// Object replaced mid-download
    ObjectChanged,
    /// Local path escapes the destination or loops back on itself
    PathSafety,
    /// Cancellation
    Aborted,
    /// Failure policy aborted a directory transfer
    ItemFailurePolicy,
    /// Store and network failures
    Transport,
    /// Local filesystem and buffer failures
    Filesystem,
}

impl From<StoreError> for TransferError {
    fn from(cause: StoreError) -> Self {
        TransferError::TransferFailed { cause }
    }
}

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        // A reader error that already carries a transfer error is unwrapped as-is
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<TransferError>())
        {
            if let Some(inner) = err.into_inner() {
                if let Ok(transfer) = inner.downcast::<TransferError>() {
                    return *transfer;
                }
            }
            return TransferError::Io("unreadable transfer error".to_string());
        }
        TransferError::Io(err.to_string())
    }
}

impl From<FsError> for TransferError {
    fn from(err: FsError) -> Self {
        let path = match &err {
            FsError::NotFound(path) | FsError::PermissionDenied(path) => path.clone(),
            _ => PathBuf::new(),
        };
        TransferError::Filesystem {
            path,
            message: err.to_string(),
        }
    }
}

impl From<TransferError> for io::Error {
    fn from(err: TransferError) -> Self {
        let kind = match err {
            TransferError::Aborted => io::ErrorKind::Interrupted,
            TransferError::IncompleteDownload { .. } => io::ErrorKind::UnexpectedEof,
            TransferError::InvalidRange { .. } | TransferError::PartSizeTooSmall { .. } => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransferError::PartSizeTooSmall {
            size: 1024,
            min: 5 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "part size must be at least 5242880 bytes, got 1024"
        );

        let err = TransferError::DuplicatePath(PathBuf::from("/data/loop"));
        assert_eq!(err.to_string(), "traversed duplicate path /data/loop");

        let err = TransferError::InvalidRange { max: 99 };
        assert_eq!(err.to_string(), "invalid input range, must be between 0 and 99");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(TransferError::Aborted.is_fatal());
        assert!(TransferError::DuplicatePath(PathBuf::from("/x")).is_fatal());
        assert!(!TransferError::TransferFailed {
            cause: StoreError::Network("reset".into())
        }
        .is_fatal());
        assert!(TransferError::TransferFailed {
            cause: StoreError::AccessDenied("denied".into())
        }
        .is_fatal());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            TransferError::Config("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            TransferError::PathEscapesDestination {
                path: PathBuf::from("/etc/passwd"),
                destination: PathBuf::from("/tmp/out"),
            }
            .category(),
            ErrorCategory::PathSafety
        );
        assert_eq!(
            TransferError::item_failed("a.txt", TransferError::Aborted).category(),
            ErrorCategory::ItemFailurePolicy
        );
    }

    #[test]
    fn test_io_round_trip_keeps_variant() {
        let original = TransferError::ObjectChanged {
            key: "k".into(),
            expected: "\"a\"".into(),
            actual: "\"b\"".into(),
        };
        let io_err: io::Error = original.into();
        let back = TransferError::from(io_err);
        assert!(matches!(back, TransferError::ObjectChanged { .. }));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TransferError::Config("x".into()).exit_code(), EXIT_FATAL);
        assert_eq!(
            TransferError::ObjectChanged {
                key: "k".into(),
                expected: "a".into(),
                actual: "b".into(),
            }
            .exit_code(),
            EXIT_INTEGRITY
        );
        assert_eq!(
            TransferError::ChunkRetriesExhausted {
                part: 2,
                attempts: 4,
                cause: StoreError::Timeout("slow".into()),
            }
            .exit_code(),
            EXIT_PARTIAL
        );
        assert_eq!(
            TransferError::item_failed("a", TransferError::DuplicatePath(PathBuf::from("/x")))
                .exit_code(),
            EXIT_FATAL
        );
    }

    #[test]
    fn test_root_cause() {
        let err = TransferError::item_failed(
            "photos/cat.jpg",
            TransferError::TransferFailed {
                cause: StoreError::AccessDenied("denied".into()),
            },
        );
        assert!(matches!(
            err.root_cause(),
            TransferError::TransferFailed { .. }
        ));
        assert!(!err.is_retryable());
    }
}
