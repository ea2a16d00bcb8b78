//! `ObjectStore` over the AWS SDK S3 client

use super::config::S3StoreConfig;
use super::error::from_sdk;
use crate::error::Result;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{ChecksumMode, CompletedMultipartUpload, CompletedPart as AwsCompletedPart};
use aws_sdk_s3::Client as AwsS3Client;
use hauler_core_interface::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CompleteMultipartUploadResponse,
    CreateMultipartUploadRequest, CreateMultipartUploadResponse, GetObjectRequest,
    GetObjectResponse, HeadObjectRequest, HeadObjectResponse, ListObjectsRequest,
    ListObjectsResponse, ObjectStore, ObjectSummary, PutObjectRequest, PutObjectResponse,
    StoreError, StoreResult, UploadPartRequest, UploadPartResponse,
};
use std::fmt;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

/// S3 or S3-compatible object store
#[derive(Clone)]
pub struct S3Store {
    client: AwsS3Client,
    config: S3StoreConfig,
}

impl S3Store {
    /// Connect using `config`, falling back to the default AWS provider chains
    pub async fn new(config: S3StoreConfig) -> Result<Self> {
        config.validate()?;
        let client = Self::build_aws_client(&config).await;
        debug!(
            region = config.region.as_deref().unwrap_or("<default>"),
            endpoint = config.endpoint.as_deref().unwrap_or("<aws>"),
            "S3 store ready"
        );
        Ok(Self { client, config })
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: AwsS3Client) -> Self {
        Self {
            client,
            config: S3StoreConfig::default(),
        }
    }

    async fn build_aws_client(config: &S3StoreConfig) -> AwsS3Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region_provider = match &config.region {
            Some(region) => RegionProviderChain::first_try(Region::new(region.clone())),
            None => RegionProviderChain::default_provider(),
        };
        loader = loader.region(region_provider);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                config.session_token.clone(),
                None,
                "hauler-explicit",
            );
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        // required for MinIO, LocalStack
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let timeouts = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_seconds))
            .build();
        builder = builder.timeout_config(timeouts);

        AwsS3Client::from_conf(builder.build())
    }

    pub fn config(&self) -> &S3StoreConfig {
        &self.config
    }

    pub fn aws_client(&self) -> &AwsS3Client {
        &self.client
    }
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("region", &self.config.region)
            .field("endpoint", &self.config.endpoint)
            .finish_non_exhaustive()
    }
}

fn to_system_time(time: Option<&DateTime>) -> Option<SystemTime> {
    time.and_then(|t| SystemTime::try_from(*t).ok())
}

fn to_u64(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}

fn to_u32(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn to_i32(part_number: u32, what: &str) -> StoreResult<i32> {
    i32::try_from(part_number)
        .map_err(|_| StoreError::Other(format!("{} {} out of range", what, part_number)))
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get_object(&self, request: GetObjectRequest) -> StoreResult<GetObjectResponse> {
        trace!(bucket = %request.bucket, key = %request.key, range = ?request.range, part = ?request.part_number, "GetObject");
        let part_number = request
            .part_number
            .map(|n| to_i32(n, "part number"))
            .transpose()?;

        let mut call = self
            .client
            .get_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .set_range(request.range.clone())
            .set_part_number(part_number)
            .set_version_id(request.version_id.clone())
            .set_if_match(request.if_match.clone());
        if request.checksum_enabled {
            call = call.checksum_mode(ChecksumMode::Enabled);
        }

        let output = call
            .send()
            .await
            .map_err(|e| from_sdk(e, &request.bucket, &request.key))?;

        let content_length = to_u64(output.content_length());
        let content_range = output.content_range().map(str::to_string);
        let content_type = output.content_type().map(str::to_string);
        let etag = output.e_tag().map(str::to_string);
        let version_id = output.version_id().map(str::to_string);
        let parts_count = to_u32(output.parts_count());
        let last_modified = to_system_time(output.last_modified());

        Ok(GetObjectResponse {
            body: Box::new(Box::pin(output.body.into_async_read())),
            content_length,
            content_range,
            content_type,
            etag,
            version_id,
            parts_count,
            last_modified,
        })
    }

    async fn head_object(&self, request: HeadObjectRequest) -> StoreResult<HeadObjectResponse> {
        trace!(bucket = %request.bucket, key = %request.key, part = ?request.part_number, "HeadObject");
        let part_number = request
            .part_number
            .map(|n| to_i32(n, "part number"))
            .transpose()?;

        let output = self
            .client
            .head_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .set_part_number(part_number)
            .set_version_id(request.version_id.clone())
            .send()
            .await
            .map_err(|e| from_sdk(e, &request.bucket, &request.key))?;

        Ok(HeadObjectResponse {
            content_length: to_u64(output.content_length()),
            content_type: output.content_type().map(str::to_string),
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
            parts_count: to_u32(output.parts_count()),
            last_modified: to_system_time(output.last_modified()),
        })
    }

    async fn put_object(&self, request: PutObjectRequest) -> StoreResult<PutObjectResponse> {
        trace!(bucket = %request.bucket, key = %request.key, len = request.body.len(), "PutObject");
        let metadata = (!request.metadata.is_empty()).then(|| request.metadata.clone());

        let output = self
            .client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .body(ByteStream::from(request.body))
            .set_content_type(request.content_type)
            .set_metadata(metadata)
            .send()
            .await
            .map_err(|e| from_sdk(e, &request.bucket, &request.key))?;

        Ok(PutObjectResponse {
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn create_multipart_upload(
        &self,
        request: CreateMultipartUploadRequest,
    ) -> StoreResult<CreateMultipartUploadResponse> {
        let metadata = (!request.metadata.is_empty()).then(|| request.metadata.clone());

        let output = self
            .client
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .set_content_type(request.content_type)
            .set_metadata(metadata)
            .send()
            .await
            .map_err(|e| from_sdk(e, &request.bucket, &request.key))?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| StoreError::Other("No upload ID returned".to_string()))?
            .to_string();
        debug!(key = %request.key, upload_id = %upload_id, "multipart upload created");
        Ok(CreateMultipartUploadResponse { upload_id })
    }

    async fn upload_part(&self, request: UploadPartRequest) -> StoreResult<UploadPartResponse> {
        trace!(key = %request.key, part = request.part_number, len = request.body.len(), "UploadPart");
        let output = self
            .client
            .upload_part()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .part_number(to_i32(request.part_number, "part number")?)
            .body(ByteStream::from(request.body))
            .send()
            .await
            .map_err(|e| from_sdk(e, &request.bucket, &request.key))?;

        Ok(UploadPartResponse {
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn complete_multipart_upload(
        &self,
        request: CompleteMultipartUploadRequest,
    ) -> StoreResult<CompleteMultipartUploadResponse> {
        let mut parts = Vec::with_capacity(request.parts.len());
        for part in &request.parts {
            parts.push(
                AwsCompletedPart::builder()
                    .part_number(to_i32(part.part_number, "part number")?)
                    .set_e_tag(part.etag.clone())
                    .build(),
            );
        }

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| from_sdk(e, &request.bucket, &request.key))?;

        Ok(CompleteMultipartUploadResponse {
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .send()
            .await
            .map_err(|e| from_sdk(e, &request.bucket, &request.key))?;
        debug!(key = %request.key, upload_id = %request.upload_id, "multipart upload aborted");
        Ok(())
    }

    async fn list_objects(&self, request: ListObjectsRequest) -> StoreResult<ListObjectsResponse> {
        let max_keys = request
            .max_keys
            .map(|n| to_i32(n, "max keys"))
            .transpose()?;
        let prefix = request.prefix.clone().unwrap_or_default();

        let output = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .set_prefix(request.prefix)
            .set_continuation_token(request.continuation_token)
            .set_max_keys(max_keys)
            .send()
            .await
            .map_err(|e| from_sdk(e, &request.bucket, &prefix))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    size: to_u64(object.size()),
                    etag: object.e_tag().map(str::to_string),
                    last_modified: to_system_time(object.last_modified()),
                })
            })
            .collect();

        Ok(ListObjectsResponse {
            objects,
            next_continuation_token: output.next_continuation_token().map(str::to_string),
            is_truncated: output.is_truncated().unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(to_u64(Some(42)), 42);
        assert_eq!(to_u64(Some(-1)), 0);
        assert_eq!(to_u64(None), 0);
        assert_eq!(to_u32(Some(3)), Some(3));
        assert_eq!(to_u32(Some(-3)), None);
        assert!(to_i32(u32::MAX, "part number").is_err());
        assert_eq!(to_i32(10_000, "part number").unwrap(), 10_000);
    }

    #[test]
    fn test_system_time_conversion() {
        let time = DateTime::from_secs(1_700_000_000);
        let converted = to_system_time(Some(&time)).unwrap();
        assert_eq!(
            converted
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap()
                .as_secs(),
            1_700_000_000
        );
        assert!(to_system_time(None).is_none());
    }
}
