//! Connection settings for the S3 backend

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};

/// How [`super::S3Store`] reaches the service
///
/// Buckets are named per request, so nothing here is bucket specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3StoreConfig {
    /// AWS region (e.g., "us-east-1"); the provider chain decides when unset
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible services like MinIO)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// AWS access key ID (optional - uses credential chain if not provided)
    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,

    /// Session token (for temporary credentials)
    #[serde(default)]
    pub session_token: Option<String>,

    /// Path-style addressing (required for some S3-compatible services)
    #[serde(default)]
    pub force_path_style: bool,

    /// Per-operation timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    300
}

impl Default for S3StoreConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            force_path_style: false,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl S3StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(TransferError::Config(
                "Both access_key and secret_key must be provided together".to_string(),
            ));
        }
        if self.session_token.is_some() && self.access_key.is_none() {
            return Err(TransferError::Config(
                "session_token requires access_key and secret_key".to_string(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(TransferError::Config(
                "timeout_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if using explicit credentials
    pub fn has_explicit_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = S3StoreConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.has_explicit_credentials());
        assert_eq!(config.timeout_seconds, 300);
    }

    #[test]
    fn test_credentials_must_pair() {
        let config = S3StoreConfig {
            access_key: Some("AKIA".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TransferError::Config(_))));

        let config = S3StoreConfig {
            session_token: Some("token".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: S3StoreConfig =
            toml::from_str("endpoint = \"http://localhost:9000\"\nforce_path_style = true").unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.force_path_style);
        assert_eq!(config.timeout_seconds, 300);
    }
}
