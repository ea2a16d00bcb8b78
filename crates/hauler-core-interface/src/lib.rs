//! Hauler Core Interface: collaborator boundaries for the transfer engine
//!
//! The transfer engine never talks to a network client or the disk directly.
//! It goes through two traits defined here:
//!
//! 1. [`ObjectStore`]: the remote blob store (single-shot and multipart
//!    RPCs plus paginated listing)
//! 2. [`FileSystem`]: the local tree used by directory transfers
//!
//! # Example
//!
//! ```rust,no_run
//! use hauler_core_interface::{HeadObjectRequest, ObjectStore};
//!
//! async fn object_size<S: ObjectStore>(store: &S) -> Result<u64, Box<dyn std::error::Error>> {
//!     let head = store
//!         .head_object(HeadObjectRequest::new("my-bucket", "data/large.bin"))
//!         .await?;
//!     Ok(head.content_length)
//! }
//! ```
//!
//! Implementations must be `Send + Sync + 'static` so a single handle can be
//! shared by every worker task of a transfer.

mod fs;
mod store;

pub use fs::{FileMetadata, FileSystem, FileSystemExt, FsError, FsResult};
pub use store::{
    is_retryable_code, AbortMultipartUploadRequest, ByteStream, CompleteMultipartUploadRequest,
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadRequest,
    CreateMultipartUploadResponse, GetObjectRequest, GetObjectResponse, HeadObjectRequest,
    HeadObjectResponse, ListObjectsRequest, ListObjectsResponse, ObjectStore, ObjectSummary,
    PutObjectRequest, PutObjectResponse, StoreError, StoreResult, UploadPartRequest,
    UploadPartResponse,
};
