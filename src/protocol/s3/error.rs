//! Mapping of AWS SDK failures onto `StoreError`

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use hauler_core_interface::StoreError;

/// Convert an SDK failure for `bucket`/`key` into the store error the engine retries on
pub(crate) fn from_sdk<E>(error: SdkError<E, HttpResponse>, bucket: &str, key: &str) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &error {
        SdkError::TimeoutError(_) => StoreError::Timeout(DisplayErrorContext(&error).to_string()),
        SdkError::DispatchFailure(_) => {
            StoreError::Network(format!("dispatch failure: {}", DisplayErrorContext(&error)))
        }
        SdkError::ResponseError(_) => {
            StoreError::Network(format!("response error: {}", DisplayErrorContext(&error)))
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = service.err().code().unwrap_or_default().to_string();
            let message = service
                .err()
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&error).to_string());
            from_service(status, code, message, bucket, key)
        }
        _ => StoreError::Other(DisplayErrorContext(&error).to_string()),
    }
}

/// Classify a service response by error code, falling back to the HTTP status
///
/// HEAD responses carry no body, so a missing object only shows up as a 404.
fn from_service(status: u16, code: String, message: String, bucket: &str, key: &str) -> StoreError {
    match (code.as_str(), status) {
        ("NoSuchKey" | "NotFound", _) | ("", 404) => StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        ("NoSuchUpload", _) => StoreError::NoSuchUpload(message),
        ("InvalidRange", _) | ("", 416) => StoreError::InvalidRange(message),
        ("AccessDenied" | "Forbidden", _) | ("", 403) => StoreError::AccessDenied(message),
        ("", 500..=599) => StoreError::Service {
            code: match status {
                503 => "ServiceUnavailable".to_string(),
                _ => "InternalError".to_string(),
            },
            message,
        },
        ("", _) => StoreError::Service {
            code: format!("Http{}", status),
            message,
        },
        _ => StoreError::Service { code, message },
    }
}
