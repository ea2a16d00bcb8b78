//! Upload a local directory tree under a key prefix
//!
//! The walk is depth-first over name-sorted entries. Every path it resolves
//! is recorded in a visited set; reaching one twice, through a symbolic link
//! cycle or two links to the same target, is a fatal `DuplicatePath` error.

use super::paths::{absolute, check_delimiter, clean, upload_key};
use super::{
    Dispatcher, DirectoryTransferOutput, DirectoryWorkItem, FailurePolicy, FileFilter,
    PutRequestCallback, TerminatePolicy, TransferState,
};
use crate::client::Client;
use crate::core::progress::{DirectoryStartEvent, TransferDirection};
use crate::core::upload::PutObjectInput;
use crate::error::{Result, TransferError};
use hauler_core_interface::{FileMetadata, FileSystem};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Request to upload a directory
#[derive(Clone)]
pub struct UploadDirectoryInput {
    pub bucket: String,
    pub source: PathBuf,
    /// Prepended to every key, joined with `delimiter`
    pub key_prefix: Option<String>,
    /// Descend into subdirectories; otherwise only top-level files are sent
    pub recursive: bool,
    pub follow_symbolic_links: bool,
    /// Joins path segments into keys; a delimiter other than `/` must not
    /// appear in any file or directory name
    pub delimiter: String,
    pub filter: Option<Arc<dyn FileFilter>>,
    pub callback: Option<Arc<dyn PutRequestCallback>>,
    pub failure_policy: Arc<dyn FailurePolicy>,
}

impl UploadDirectoryInput {
    pub fn new(bucket: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            source: source.into(),
            key_prefix: None,
            recursive: false,
            follow_symbolic_links: false,
            delimiter: "/".to_string(),
            filter: None,
            callback: None,
            failure_policy: Arc::new(TerminatePolicy),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn follow_symbolic_links(mut self, follow: bool) -> Self {
        self.follow_symbolic_links = follow;
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn with_filter(mut self, filter: impl FileFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_callback(mut self, callback: impl PutRequestCallback + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_failure_policy(mut self, policy: impl FailurePolicy + 'static) -> Self {
        self.failure_policy = Arc::new(policy);
        self
    }
}

impl fmt::Debug for UploadDirectoryInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadDirectoryInput")
            .field("bucket", &self.bucket)
            .field("source", &self.source)
            .field("key_prefix", &self.key_prefix)
            .field("recursive", &self.recursive)
            .field("follow_symbolic_links", &self.follow_symbolic_links)
            .field("delimiter", &self.delimiter)
            .finish_non_exhaustive()
    }
}

struct ItemUploader {
    client: Client,
    bucket: String,
    callback: Option<Arc<dyn PutRequestCallback>>,
    policy: Arc<dyn FailurePolicy>,
    state: Arc<TransferState>,
}

impl ItemUploader {
    async fn run(&self, item: DirectoryWorkItem) {
        match self.upload(&item).await {
            Ok(bytes) => {
                debug!(key = %item.key, bytes, "file uploaded");
                self.state.record_success(&item.key, bytes);
            }
            Err(err) => self.state.item_failed(self.policy.as_ref(), &item, err),
        }
    }

    async fn upload(&self, item: &DirectoryWorkItem) -> Result<u64> {
        let fs = self.client.filesystem();
        let meta = fs
            .metadata(&item.local_path)
            .await
            .map_err(|e| TransferError::filesystem(&item.local_path, e))?;
        let reader = fs
            .reader(&item.local_path)
            .await
            .map_err(|e| TransferError::filesystem(&item.local_path, e))?;

        let mut input = PutObjectInput {
            bucket: self.bucket.clone(),
            key: item.key.clone(),
            body: reader,
            content_length: Some(meta.len),
            content_type: None,
            metadata: Default::default(),
        };
        if let Some(callback) = &self.callback {
            callback.update_request(&mut input);
        }

        let output = self
            .client
            .put_object(input, self.state.cancel_token())
            .await?;
        Ok(output.bytes_transferred)
    }
}

/// Upload the files under `input.source`
pub async fn upload_directory(
    client: &Client,
    input: UploadDirectoryInput,
    cancel: &CancellationToken,
) -> Result<DirectoryTransferOutput> {
    let options = client.options();
    options.config.validate()?;
    if input.delimiter.is_empty() {
        return Err(TransferError::Config("key delimiter must not be empty".to_string()));
    }

    let source_meta = client
        .filesystem()
        .metadata(&input.source)
        .await
        .map_err(|e| TransferError::filesystem(&input.source, e))?;
    if !source_meta.is_dir {
        return Err(TransferError::Config(format!(
            "source {} is not a directory",
            input.source.display()
        )));
    }

    info!(
        bucket = %input.bucket,
        source = %input.source.display(),
        recursive = input.recursive,
        follow_symbolic_links = input.follow_symbolic_links,
        "starting directory upload"
    );

    let state = Arc::new(TransferState::new(
        options.directory_progress.clone(),
        cancel.child_token(),
    ));
    let worker = Arc::new(ItemUploader {
        client: client.clone(),
        bucket: input.bucket.clone(),
        callback: input.callback.clone(),
        policy: input.failure_policy.clone(),
        state: state.clone(),
    });
    let dispatcher = Dispatcher::spawn(
        options.config.directory_concurrency,
        state.clone(),
        move |item| {
            let worker = worker.clone();
            async move { worker.run(item).await }
        },
    );

    let walker = Walker {
        fs: client.filesystem().as_ref(),
        input: &input,
        visited: HashSet::new(),
    };
    if let Err(err) = walker.walk(&state, &dispatcher).await {
        state.set_error(err);
    }
    dispatcher.join().await;

    let result = state.finish();
    match &result {
        Ok(output) => info!(
            objects = output.objects_transferred,
            failed = output.objects_failed,
            bytes = output.bytes_transferred,
            "directory upload complete"
        ),
        Err(err) => warn!(error = %err, "directory upload failed"),
    }
    result
}

/// Depth-first traversal state; lives for one directory upload
struct Walker<'a> {
    fs: &'a dyn FileSystem,
    input: &'a UploadDirectoryInput,
    /// Resolved absolute paths already reached
    visited: HashSet<PathBuf>,
}

/// A directory still to be listed, with the key segments leading to it
struct PendingDir {
    path: PathBuf,
    segments: Vec<String>,
}

impl Walker<'_> {
    async fn walk(mut self, state: &TransferState, dispatcher: &Dispatcher) -> Result<()> {
        let root = absolute(&self.input.source)?;
        self.visited.insert(root.clone());

        let mut stack = vec![PendingDir {
            path: root,
            segments: Vec::new(),
        }];

        while let Some(dir) = stack.pop() {
            if state.is_stopping() {
                return Ok(());
            }

            let entries = self
                .fs
                .read_dir(&dir.path)
                .await
                .map_err(|e| TransferError::filesystem(&dir.path, e))?;

            let mut subdirs = Vec::new();
            for entry in entries {
                let Some(resolved) = self.resolve(&entry).await? else {
                    trace!(path = %entry.path.display(), "skipping symbolic link");
                    continue;
                };
                let name = entry.name();
                check_delimiter(&name, &self.input.delimiter)?;

                let mut segments = dir.segments.clone();
                segments.push(name);

                if resolved.is_dir {
                    if self.input.recursive {
                        subdirs.push(PendingDir {
                            path: resolved.path,
                            segments,
                        });
                    }
                    continue;
                }

                if let Some(filter) = &self.input.filter {
                    if !filter.filter_file(&entry.path) {
                        continue;
                    }
                }

                state.start_once(|| DirectoryStartEvent {
                    bucket: self.input.bucket.clone(),
                    key_prefix: self.input.key_prefix.clone(),
                    local_dir: self.input.source.clone(),
                    direction: TransferDirection::Upload,
                });
                let item = DirectoryWorkItem {
                    key: upload_key(
                        self.input.key_prefix.as_deref(),
                        &segments,
                        &self.input.delimiter,
                    ),
                    local_path: resolved.path,
                };
                if !dispatcher.dispatch(item).await {
                    return Ok(());
                }
            }

            // reversed so the stack pops them in name order
            stack.extend(subdirs.into_iter().rev());
        }
        Ok(())
    }

    /// Resolve an entry to the file or directory it stands for
    ///
    /// Returns `None` for symbolic links when links are not followed.
    async fn resolve(&mut self, entry: &FileMetadata) -> Result<Option<FileMetadata>> {
        let resolved = if entry.is_symlink {
            if !self.input.follow_symbolic_links {
                return Ok(None);
            }
            self.follow_link(&entry.path).await?
        } else {
            entry.clone()
        };

        let path = clean(&resolved.path);
        if !self.visited.insert(path.clone()) {
            return Err(TransferError::DuplicatePath(path));
        }
        Ok(Some(FileMetadata { path, ..resolved }))
    }

    /// Follow a chain of links to its final target
    async fn follow_link(&mut self, link: &Path) -> Result<FileMetadata> {
        let mut current = link.to_path_buf();
        loop {
            let target = self
                .fs
                .read_link(&current)
                .await
                .map_err(|e| TransferError::filesystem(&current, e))?;
            let next = match current.parent() {
                Some(parent) if target.is_relative() => clean(&parent.join(&target)),
                _ => clean(&target),
            };
            if self.visited.contains(&next) {
                return Err(TransferError::DuplicatePath(next));
            }

            let meta = self
                .fs
                .symlink_metadata(&next)
                .await
                .map_err(|e| TransferError::filesystem(&next, e))?;
            if !meta.is_symlink {
                return Ok(meta);
            }
            // intermediate links count as visited so a loop of links ends
            self.visited.insert(next.clone());
            current = next;
        }
    }
}
