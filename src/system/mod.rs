//! Implementations of the store and filesystem boundaries
//!
//! - `LocalFileSystem`: direct filesystem access through `tokio::fs`
//! - `MemoryStore`: in-memory object store for tests and dry runs

mod local;
pub mod memory;

pub use local::LocalFileSystem;
pub use memory::{Fault, MemoryStore, Operation};
