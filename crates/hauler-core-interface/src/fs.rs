//! Local filesystem boundary used by directory transfers

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Error, Debug)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System error: {0}")]
    System(String),
}

impl FsError {
    /// Map an `io::Error` for `path`, keeping not-found and permission errors distinct
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_path_buf()),
            _ => FsError::Io(err),
        }
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Metadata for a file, directory or symbolic link
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Full path to the entry
    pub path: PathBuf,

    /// Size in bytes (0 for directories and links)
    pub len: u64,

    pub is_dir: bool,

    /// Only ever true for metadata obtained without following links
    pub is_symlink: bool,

    pub modified: SystemTime,
}

impl FileMetadata {
    pub fn file(path: impl Into<PathBuf>, len: u64, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            len,
            is_dir: false,
            is_symlink: false,
            modified,
        }
    }

    pub fn directory(path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            len: 0,
            is_dir: true,
            is_symlink: false,
            modified,
        }
    }

    pub fn symlink(path: impl Into<PathBuf>, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            len: 0,
            is_dir: false,
            is_symlink: true,
            modified,
        }
    }

    /// Final path component as a string, lossy for non UTF-8 names
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Filesystem operations needed to walk, read and write local trees
#[async_trait]
pub trait FileSystem: Send + Sync + 'static {
    /// Stat a path, following symbolic links
    ///
    /// # Errors
    ///
    /// Returns `FsError::NotFound` if the path doesn't exist.
    async fn metadata(&self, path: &Path) -> FsResult<FileMetadata>;

    /// Stat a path without following a final symbolic link
    async fn symlink_metadata(&self, path: &Path) -> FsResult<FileMetadata>;

    /// List the direct children of a directory
    ///
    /// Entries are reported without following links and sorted by name so
    /// walks are deterministic.
    async fn read_dir(&self, path: &Path) -> FsResult<Vec<FileMetadata>>;

    /// Read the target of a symbolic link, exactly as stored
    async fn read_link(&self, path: &Path) -> FsResult<PathBuf>;

    /// Open a file for streaming reads
    async fn reader(&self, path: &Path) -> FsResult<Box<dyn AsyncRead + Unpin + Send>>;

    /// Open a file for writing
    ///
    /// Creates missing parent directories and truncates an existing file.
    async fn writer(&self, path: &Path) -> FsResult<Box<dyn AsyncWrite + Unpin + Send>>;

    async fn remove_file(&self, path: &Path) -> FsResult<()>;
}

/// Convenience methods derived from [`FileSystem`]
#[async_trait]
pub trait FileSystemExt: FileSystem {
    /// Check whether a path exists (following links)
    async fn exists(&self, path: &Path) -> bool {
        self.metadata(path).await.is_ok()
    }

    /// Read entire file contents into memory
    ///
    /// **Warning**: This loads the entire file into RAM. Prefer `reader()`
    /// for large files.
    async fn read_all(&self, path: &Path) -> FsResult<Vec<u8>> {
        use tokio::io::AsyncReadExt;
        let mut reader = self.reader(path).await?;
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    async fn write_all(&self, path: &Path, data: &[u8]) -> FsResult<()> {
        use tokio::io::AsyncWriteExt;
        let mut writer = self.writer(path).await?;
        writer.write_all(data).await?;
        writer.shutdown().await?;
        Ok(())
    }
}

impl<T: FileSystem + ?Sized> FileSystemExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_mapping() {
        let path = Path::new("/data/missing.bin");
        let err = FsError::from_io(path, std::io::ErrorKind::NotFound.into());
        assert!(matches!(err, FsError::NotFound(p) if p == path));

        let err = FsError::from_io(path, std::io::ErrorKind::PermissionDenied.into());
        assert!(matches!(err, FsError::PermissionDenied(_)));

        let err = FsError::from_io(path, std::io::ErrorKind::Interrupted.into());
        assert!(matches!(err, FsError::Io(_)));
    }

    #[test]
    fn test_metadata_name() {
        let meta = FileMetadata::file("/data/photos/cat.jpg", 10, SystemTime::now());
        assert_eq!(meta.name(), "cat.jpg");
    }
}
