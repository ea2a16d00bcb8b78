//! Local filesystem implementation of [`FileSystem`]
//!
//! This is the default provider for directory transfers, wrapping `tokio::fs`
//! operations.

use hauler_core_interface::{FileMetadata, FileSystem, FsError, FsResult};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};

/// Local filesystem backed by `tokio::fs`
///
/// # Example
///
/// ```rust,no_run
/// use hauler::LocalFileSystem;
/// use hauler_core_interface::FileSystemExt;
/// use std::path::Path;
///
/// #[tokio::main]
/// async fn main() {
///     let fs = LocalFileSystem;
///     let exists = fs.exists(Path::new("/tmp/test.txt")).await;
///     println!("File exists: {}", exists);
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn to_metadata(path: PathBuf, meta: &Metadata) -> FileMetadata {
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    if meta.file_type().is_symlink() {
        FileMetadata::symlink(path, modified)
    } else if meta.is_dir() {
        FileMetadata::directory(path, modified)
    } else {
        FileMetadata::file(path, meta.len(), modified)
    }
}

#[async_trait::async_trait]
impl FileSystem for LocalFileSystem {
    async fn metadata(&self, path: &Path) -> FsResult<FileMetadata> {
        let meta = fs::metadata(path)
            .await
            .map_err(|e| FsError::from_io(path, e))?;
        Ok(to_metadata(path.to_path_buf(), &meta))
    }

    async fn symlink_metadata(&self, path: &Path) -> FsResult<FileMetadata> {
        let meta = fs::symlink_metadata(path)
            .await
            .map_err(|e| FsError::from_io(path, e))?;
        Ok(to_metadata(path.to_path_buf(), &meta))
    }

    async fn read_dir(&self, path: &Path) -> FsResult<Vec<FileMetadata>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(path)
            .await
            .map_err(|e| FsError::from_io(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(FsError::Io)? {
            let entry_path = entry.path();
            // DirEntry::metadata does not follow links
            let meta = entry
                .metadata()
                .await
                .map_err(|e| FsError::from_io(&entry_path, e))?;
            entries.push(to_metadata(entry_path, &meta));
        }

        entries.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
        Ok(entries)
    }

    async fn read_link(&self, path: &Path) -> FsResult<PathBuf> {
        fs::read_link(path)
            .await
            .map_err(|e| FsError::from_io(path, e))
    }

    async fn reader(&self, path: &Path) -> FsResult<Box<dyn AsyncRead + Unpin + Send>> {
        let file = fs::File::open(path)
            .await
            .map_err(|e| FsError::from_io(path, e))?;
        Ok(Box::new(file))
    }

    async fn writer(&self, path: &Path) -> FsResult<Box<dyn AsyncWrite + Unpin + Send>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FsError::from_io(parent, e))?;
        }

        let file = fs::File::create(path)
            .await
            .map_err(|e| FsError::from_io(path, e))?;
        Ok(Box::new(file))
    }

    async fn remove_file(&self, path: &Path) -> FsResult<()> {
        fs::remove_file(path)
            .await
            .map_err(|e| FsError::from_io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hauler_core_interface::FileSystemExt;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_exists() {
        let system = LocalFileSystem;

        let temp = NamedTempFile::new().unwrap();
        assert!(system.exists(temp.path()).await);

        assert!(!system.exists(Path::new("/nonexistent/file.txt")).await);
    }

    #[tokio::test]
    async fn test_metadata() {
        let system = LocalFileSystem;

        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"Hello, World!").unwrap();
        temp.flush().unwrap();

        let meta = system.metadata(temp.path()).await.unwrap();
        assert_eq!(meta.len, 13);
        assert!(!meta.is_dir);
        assert!(!meta.is_symlink);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = LocalFileSystem
            .reader(Path::new("/nonexistent/file.txt"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_writer_creates_parents() {
        let system = LocalFileSystem;
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("a/b/test.txt");

        system.write_all(&file_path, b"nested").await.unwrap();
        assert_eq!(system.read_all(&file_path).await.unwrap(), b"nested");

        system.remove_file(&file_path).await.unwrap();
        assert!(!system.exists(&file_path).await);
    }

    #[tokio::test]
    async fn test_read_dir_sorted() {
        let system = LocalFileSystem;

        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("file2.txt"), b"test2").unwrap();
        std::fs::write(temp_dir.path().join("file1.txt"), b"test1").unwrap();
        std::fs::create_dir(temp_dir.path().join("subdir")).unwrap();

        let entries = system.read_dir(temp_dir.path()).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["file1.txt", "file2.txt", "subdir"]);
        assert!(entries[2].is_dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_not_followed_in_listing() {
        let system = LocalFileSystem;
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("target.txt"), b"data").unwrap();
        std::os::unix::fs::symlink(
            temp_dir.path().join("target.txt"),
            temp_dir.path().join("link.txt"),
        )
        .unwrap();

        let entries = system.read_dir(temp_dir.path()).await.unwrap();
        let link = entries.iter().find(|e| e.name() == "link.txt").unwrap();
        assert!(link.is_symlink);

        let followed = system.metadata(&link.path).await.unwrap();
        assert_eq!(followed.len, 4);
        assert_eq!(
            system.read_link(&link.path).await.unwrap(),
            temp_dir.path().join("target.txt")
        );
    }
}
