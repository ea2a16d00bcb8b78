//! Native S3 backend
//!
//! [`S3Store`] implements the engine's `ObjectStore` boundary on top of the
//! official AWS SDK. It works against AWS and S3-compatible services such as
//! MinIO or LocalStack when an endpoint and path-style addressing are set.
//!
//! # Example
//!
//! ```ignore
//! use hauler::protocol::s3::{S3Store, S3StoreConfig};
//! use hauler::{Client, GetObjectInput};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = S3StoreConfig {
//!         endpoint: Some("http://localhost:9000".to_string()),
//!         region: Some("us-east-1".to_string()),
//!         force_path_style: true,
//!         ..Default::default()
//!     };
//!     let client = Client::new(S3Store::new(config).await?);
//!
//!     let mut out = tokio::fs::File::create("large.bin").await?;
//!     client
//!         .download_object(
//!             GetObjectInput::new("my-bucket", "data/large.bin"),
//!             &mut out,
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod store;

pub use config::S3StoreConfig;
pub use store::S3Store;
