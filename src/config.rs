/*!
 * Configuration types for Hauler
 */

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest part size the store accepts for multipart transfers (5 MiB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Upper bound on parts in one multipart upload
pub const MAX_UPLOAD_PARTS: u32 = 10_000;

pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;
pub const DEFAULT_GET_BUFFER_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_PART_BODY_MAX_RETRIES: u32 = 3;

/// How a multi-part download addresses the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GetObjectType {
    /// Byte ranges of `part_size_bytes` each
    #[default]
    Ranges,

    /// The object's own upload parts, addressed by part number
    Parts,
}

/// Transfer engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Workers per single-object transfer
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Objects transferred at once by a directory transfer
    #[serde(default = "default_concurrency")]
    pub directory_concurrency: usize,

    /// Size of each part or range in bytes
    #[serde(default = "default_part_size")]
    pub part_size_bytes: u64,

    /// Uploads at least this large use multipart
    #[serde(default = "default_multipart_threshold")]
    pub multipart_upload_threshold: u64,

    /// Extra attempts per part after a failed fetch or upload
    #[serde(default = "default_part_body_max_retries")]
    pub part_body_max_retries: u32,

    /// Memory a download may hold ahead of the reader, in bytes
    #[serde(default = "default_get_buffer_size")]
    pub get_buffer_size: u64,

    #[serde(default)]
    pub get_object_type: GetObjectType,

    /// Skip response checksum validation on downloads
    #[serde(default)]
    pub disable_checksum_validation: bool,

    /// First retry delay in milliseconds, doubled per attempt
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            directory_concurrency: DEFAULT_CONCURRENCY,
            part_size_bytes: DEFAULT_PART_SIZE,
            multipart_upload_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_body_max_retries: DEFAULT_PART_BODY_MAX_RETRIES,
            get_buffer_size: DEFAULT_GET_BUFFER_SIZE,
            get_object_type: GetObjectType::Ranges,
            disable_checksum_validation: false,
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            log_level: LogLevel::Info,
            log_file: None,
        }
    }
}

impl TransferConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TransferError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: TransferConfig = toml::from_str(&contents)
            .map_err(|e| TransferError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TransferError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            TransferError::Config(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Validate the configuration
    ///
    /// Runs before any request is issued so a bad setting never costs a
    /// network round trip.
    pub fn validate(&self) -> Result<()> {
        if self.part_size_bytes < MIN_PART_SIZE {
            return Err(TransferError::PartSizeTooSmall {
                size: self.part_size_bytes,
                min: MIN_PART_SIZE,
            });
        }

        if self.concurrency == 0 {
            return Err(TransferError::Config(
                "Concurrency must be at least 1".to_string(),
            ));
        }

        if self.directory_concurrency == 0 {
            return Err(TransferError::Config(
                "Directory concurrency must be at least 1".to_string(),
            ));
        }

        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(TransferError::Config(format!(
                "Initial retry delay {}ms exceeds maximum {}ms",
                self.retry_initial_delay_ms, self.retry_max_delay_ms
            )));
        }

        Ok(())
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Number of parts a download may hold ahead of the reader
    pub fn window_parts(&self, part_size: u64) -> u32 {
        let parts = self.get_buffer_size / part_size.max(1);
        u32::try_from(parts).unwrap_or(u32::MAX).max(1)
    }
}

/// Builder for TransferConfig
#[derive(Debug, Default)]
pub struct TransferConfigBuilder {
    config: TransferConfig,
}

impl TransferConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn directory_concurrency(mut self, concurrency: usize) -> Self {
        self.config.directory_concurrency = concurrency;
        self
    }

    pub fn part_size(mut self, bytes: u64) -> Self {
        self.config.part_size_bytes = bytes;
        self
    }

    pub fn multipart_threshold(mut self, bytes: u64) -> Self {
        self.config.multipart_upload_threshold = bytes;
        self
    }

    pub fn part_body_max_retries(mut self, retries: u32) -> Self {
        self.config.part_body_max_retries = retries;
        self
    }

    pub fn get_buffer_size(mut self, bytes: u64) -> Self {
        self.config.get_buffer_size = bytes;
        self
    }

    pub fn get_object_type(mut self, kind: GetObjectType) -> Self {
        self.config.get_object_type = kind;
        self
    }

    pub fn disable_checksum_validation(mut self, disable: bool) -> Self {
        self.config.disable_checksum_validation = disable;
        self
    }

    pub fn retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.config.retry_initial_delay_ms = initial.as_millis() as u64;
        self.config.retry_max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn log_file(mut self, path: PathBuf) -> Self {
        self.config.log_file = Some(path);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<TransferConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_multipart_threshold() -> u64 {
    DEFAULT_MULTIPART_THRESHOLD
}

fn default_part_body_max_retries() -> u32 {
    DEFAULT_PART_BODY_MAX_RETRIES
}

fn default_get_buffer_size() -> u64 {
    DEFAULT_GET_BUFFER_SIZE
}

fn default_retry_initial_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    20_000
}
