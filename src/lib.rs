/*!
 * Hauler - parallel object storage transfers
 *
 * A transfer engine for S3-style object stores with:
 * - Concurrent ranged or part-numbered downloads exposed as an ordered reader
 * - Multipart uploads from sized or unsized streams
 * - Bounded memory through a shared buffer pool and a read-ahead window
 * - Directory downloads and uploads with pluggable failure policies
 * - Progress listeners registered up front on the client options
 *
 * The store and the local filesystem sit behind the traits in
 * `hauler-core-interface`; [`MemoryStore`] and [`LocalFileSystem`] are
 * provided, and an S3 store is available with the `s3-native` feature.
 */

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod system;

#[cfg(feature = "s3-native")]
pub mod protocol;

// Re-export commonly used types
pub use client::{Client, Options};
pub use config::{GetObjectType, LogLevel, TransferConfig};
pub use core::buffer_pool::{BufferPool, PooledBuffer};
pub use core::chunked_reader::ChunkedReader;
pub use core::directory::{
    DirectoryTransferOutput, DirectoryWorkItem, DownloadDirectoryInput, FailurePolicy, FileFilter,
    GetRequestCallback, IgnorePolicy, ObjectFilter, PutRequestCallback, TerminatePolicy,
    UploadDirectoryInput,
};
pub use core::download::{DownloadObjectOutput, GetObjectInput, GetObjectOutput};
pub use core::progress::{
    DirectoryProgressListener, DirectoryProgressListeners, ObjectProgressListener,
    ProgressEvent, ProgressListeners, ProgressReporter, TransferDirection,
};
pub use core::retry::{DefaultRetryDecider, NoRetry, ShouldRetry};
pub use core::upload::{PutObjectInput, PutObjectOutput};
pub use error::{ErrorCategory, Result, TransferError};
pub use system::{LocalFileSystem, MemoryStore};

pub use hauler_core_interface::{FileSystem, ObjectStore, StoreError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
