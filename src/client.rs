/*!
 * Transfer client: entry point for object and directory transfers
 */

use crate::config::TransferConfig;
use crate::core::buffer_pool::BufferPool;
use crate::core::directory::{
    download::download_directory, upload::upload_directory, DirectoryTransferOutput,
    DownloadDirectoryInput, UploadDirectoryInput,
};
use crate::core::download::{self, DownloadObjectOutput, GetObjectInput, GetObjectOutput};
use crate::core::progress::{DirectoryProgressListeners, ProgressListeners};
use crate::core::retry::{default_decider, Backoff, ShouldRetry};
use crate::core::upload::{self, PutObjectInput, PutObjectOutput};
use crate::error::Result;
use crate::system::LocalFileSystem;
use hauler_core_interface::{FileSystem, ObjectStore};
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Settings and hooks shared by every transfer a [`Client`] starts
///
/// Cloning copies the listener lists, so a clone can be reconfigured without
/// touching the original.
#[derive(Clone)]
pub struct Options {
    pub config: TransferConfig,
    pub progress: ProgressListeners,
    pub directory_progress: DirectoryProgressListeners,
    /// Decides which failed part requests are retried
    pub retry_decider: Arc<dyn ShouldRetry>,
    /// Pool shared across transfers; each transfer sizes its own when unset
    pub buffer_pool: Option<BufferPool>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}

impl Options {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            progress: ProgressListeners::new(),
            directory_progress: DirectoryProgressListeners::new(),
            retry_decider: default_decider(),
            buffer_pool: None,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.config.retry_initial_delay(),
            self.config.retry_max_delay(),
        )
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("config", &self.config)
            .field("progress", &self.progress)
            .field("directory_progress", &self.directory_progress)
            .field("buffer_pool", &self.buffer_pool)
            .finish_non_exhaustive()
    }
}

/// High-level transfer manager over an [`ObjectStore`]
///
/// # Example
///
/// ```no_run
/// use hauler::{Client, GetObjectInput, MemoryStore};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> hauler::Result<()> {
/// let client = Client::new(MemoryStore::new());
/// let mut out = Vec::new();
/// client
///     .download_object(
///         GetObjectInput::new("bucket", "data/large.bin"),
///         &mut out,
///         &CancellationToken::new(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn ObjectStore>,
    fs: Arc<dyn FileSystem>,
    options: Options,
}

impl Client {
    /// Client over `store` with default options and the local filesystem
    pub fn new<S: ObjectStore>(store: S) -> Self {
        Self::from_parts(Arc::new(store), Arc::new(LocalFileSystem), Options::default())
    }

    pub fn from_parts(
        store: Arc<dyn ObjectStore>,
        fs: Arc<dyn FileSystem>,
        options: Options,
    ) -> Self {
        Self { store, fs, options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Copy this client with adjusted options; `self` is left untouched
    pub fn with_options(&self, configure: impl FnOnce(&mut Options)) -> Client {
        let mut options = self.options.clone();
        configure(&mut options);
        Client {
            store: self.store.clone(),
            fs: self.fs.clone(),
            options,
        }
    }

    /// Start a download and return a reader over the object's bytes
    ///
    /// Parts are fetched in the background while the returned body is read.
    pub async fn get_object(
        &self,
        input: GetObjectInput,
        cancel: &CancellationToken,
    ) -> Result<GetObjectOutput> {
        download::get_object(self.store.clone(), &self.options, input, cancel).await
    }

    /// Download an object into `writer`
    pub async fn download_object<W>(
        &self,
        input: GetObjectInput,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<DownloadObjectOutput>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        download::download_object(self.store.clone(), &self.options, input, writer, cancel).await
    }

    /// Upload a body, switching to multipart above the configured threshold
    pub async fn put_object(
        &self,
        input: PutObjectInput,
        cancel: &CancellationToken,
    ) -> Result<PutObjectOutput> {
        upload::put_object(self.store.clone(), &self.options, input, cancel).await
    }

    /// Download every object under a prefix into a local directory
    pub async fn download_directory(
        &self,
        input: DownloadDirectoryInput,
        cancel: &CancellationToken,
    ) -> Result<DirectoryTransferOutput> {
        download_directory(self, input, cancel).await
    }

    /// Upload a local directory under a key prefix
    pub async fn upload_directory(
        &self,
        input: UploadDirectoryInput,
        cancel: &CancellationToken,
    ) -> Result<DirectoryTransferOutput> {
        upload_directory(self, input, cancel).await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
