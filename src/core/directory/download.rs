//! Download every object under a key prefix into a local directory

use super::paths::resolve_download_path;
use super::{
    Dispatcher, DirectoryTransferOutput, DirectoryWorkItem, FailurePolicy, GetRequestCallback,
    ObjectFilter, TerminatePolicy, TransferState,
};
use crate::client::Client;
use crate::core::download::GetObjectInput;
use crate::core::progress::{DirectoryStartEvent, TransferDirection};
use crate::error::{Result, TransferError};
use hauler_core_interface::{FsError, ListObjectsRequest};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Request to download a prefix into a directory
#[derive(Clone)]
pub struct DownloadDirectoryInput {
    pub bucket: String,
    /// Created if missing; must not be an existing file
    pub destination: PathBuf,
    /// Only keys under this prefix are listed; it is stripped from local paths
    pub key_prefix: Option<String>,
    pub filter: Option<Arc<dyn ObjectFilter>>,
    pub callback: Option<Arc<dyn GetRequestCallback>>,
    pub failure_policy: Arc<dyn FailurePolicy>,
}

impl DownloadDirectoryInput {
    pub fn new(bucket: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            destination: destination.into(),
            key_prefix: None,
            filter: None,
            callback: None,
            failure_policy: Arc::new(TerminatePolicy),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_filter(mut self, filter: impl ObjectFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_callback(mut self, callback: impl GetRequestCallback + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_failure_policy(mut self, policy: impl FailurePolicy + 'static) -> Self {
        self.failure_policy = Arc::new(policy);
        self
    }
}

impl fmt::Debug for DownloadDirectoryInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadDirectoryInput")
            .field("bucket", &self.bucket)
            .field("destination", &self.destination)
            .field("key_prefix", &self.key_prefix)
            .field("filter", &self.filter.is_some())
            .field("callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

struct ItemDownloader {
    client: Client,
    bucket: String,
    callback: Option<Arc<dyn GetRequestCallback>>,
    policy: Arc<dyn FailurePolicy>,
    state: Arc<TransferState>,
}

impl ItemDownloader {
    async fn run(&self, item: DirectoryWorkItem) {
        match self.download(&item).await {
            Ok(bytes) => {
                debug!(key = %item.key, bytes, "object downloaded");
                self.state.record_success(&item.key, bytes);
            }
            Err(err) => {
                // never leave a partial file behind
                match self.client.filesystem().remove_file(&item.local_path).await {
                    Ok(()) | Err(FsError::NotFound(_)) => {}
                    Err(remove_err) => warn!(
                        path = %item.local_path.display(),
                        error = %remove_err,
                        "failed to remove partial file"
                    ),
                }
                self.state.item_failed(self.policy.as_ref(), &item, err);
            }
        }
    }

    async fn download(&self, item: &DirectoryWorkItem) -> Result<u64> {
        let mut input = GetObjectInput::new(self.bucket.clone(), item.key.clone());
        if let Some(callback) = &self.callback {
            callback.update_request(&mut input);
        }

        let cancel = self.state.cancel_token();
        let mut output = self.client.get_object(input, cancel).await?;

        let fs = self.client.filesystem();
        let mut writer = fs
            .writer(&item.local_path)
            .await
            .map_err(|e| TransferError::filesystem(&item.local_path, e))?;
        let written = tokio::io::copy(&mut output.body, &mut writer).await?;
        writer.shutdown().await?;
        Ok(written)
    }
}

/// Download every object under `input.key_prefix` into `input.destination`
pub async fn download_directory(
    client: &Client,
    input: DownloadDirectoryInput,
    cancel: &CancellationToken,
) -> Result<DirectoryTransferOutput> {
    let options = client.options();
    options.config.validate()?;

    match client.filesystem().metadata(&input.destination).await {
        Ok(meta) if !meta.is_dir => {
            return Err(TransferError::Config(format!(
                "destination {} is not a directory",
                input.destination.display()
            )));
        }
        Ok(_) | Err(FsError::NotFound(_)) => {}
        Err(err) => return Err(TransferError::filesystem(&input.destination, err)),
    }

    info!(
        bucket = %input.bucket,
        prefix = input.key_prefix.as_deref().unwrap_or(""),
        destination = %input.destination.display(),
        "starting directory download"
    );

    let state = Arc::new(TransferState::new(
        options.directory_progress.clone(),
        cancel.child_token(),
    ));
    let worker = Arc::new(ItemDownloader {
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

    enumerate(client, &input, &state, &dispatcher).await;
    dispatcher.join().await;

    let result = state.finish();
    match &result {
        Ok(output) => info!(
            objects = output.objects_transferred,
            failed = output.objects_failed,
            bytes = output.bytes_transferred,
            "directory download complete"
        ),
        Err(err) => warn!(error = %err, "directory download failed"),
    }
    result
}

/// Page through the listing and dispatch each accepted object
async fn enumerate(
    client: &Client,
    input: &DownloadDirectoryInput,
    state: &TransferState,
    dispatcher: &Dispatcher,
) {
    let mut continuation_token: Option<String> = None;
    loop {
        if state.is_stopping() {
            return;
        }

        let mut request = ListObjectsRequest::new(input.bucket.clone());
        request.prefix = input.key_prefix.clone();
        request.continuation_token = continuation_token.take();

        let page = tokio::select! {
            biased;
            _ = state.stop_token().cancelled() => return,
            page = client.store().list_objects(request) => page,
        };
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                state.set_error(err.into());
                return;
            }
        };

        for object in &page.objects {
            if object.key.ends_with('/') {
                continue;
            }
            if let Some(filter) = &input.filter {
                if !filter.filter_object(object) {
                    continue;
                }
            }

            let local_path = match resolve_download_path(
                &input.destination,
                input.key_prefix.as_deref(),
                &object.key,
            ) {
                Ok(path) => path,
                Err(err) => {
                    state.set_error(err);
                    return;
                }
            };

            state.start_once(|| DirectoryStartEvent {
                bucket: input.bucket.clone(),
                key_prefix: input.key_prefix.clone(),
                local_dir: input.destination.clone(),
                direction: TransferDirection::Download,
            });
            let item = DirectoryWorkItem {
                key: object.key.clone(),
                local_path,
            };
            if !dispatcher.dispatch(item).await {
                return;
            }
        }

        match page.next_continuation_token {
            Some(token) if page.is_truncated => continuation_token = Some(token),
            _ => return,
        }
    }
}
