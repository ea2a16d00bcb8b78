/*!
 * Transfer engine
 *
 * Single-object downloads and uploads are planned in [`plan`], run by
 * [`download`] and [`upload`], and share buffers from [`buffer_pool`].
 * [`directory`] fans single-object transfers out over a tree or a prefix.
 */

pub mod buffer_pool;
pub mod chunked_reader;
pub mod directory;
pub mod download;
pub mod plan;
pub mod progress;
pub mod retry;
pub mod upload;
