//! Local filesystem backend.
//!
//! Maps logical absolute paths onto a host directory: the logical path
//! is resolved lexically first and then joined under `root`, so `..`
//! segments can never climb out of the backend. Symlink targets are
//! still checked against the root when followed.

use async_trait::async_trait;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{VfsError, VfsResult};
use crate::ops::VfsOps;
use crate::paths;
use crate::types::{DirEntry, FileAttr, FileType};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/store`, then `read("/out/in.txt")` reads
/// `/srv/store/out/in.txt`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a new local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only local filesystem.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        let mut backend = Self::new(root);
        backend.read_only = true;
        backend
    }

    /// Set whether this filesystem is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path onto the host filesystem.
    ///
    /// The logical path is canonicalized lexically before joining, so
    /// the result is always at or under `root`.
    fn host_path(&self, path: &Path) -> PathBuf {
        let canonical = paths::canonicalize(path);
        match canonical.strip_prefix("/") {
            Ok(rel) if rel.as_os_str().is_empty() => self.root.clone(),
            Ok(rel) => self.root.join(rel),
            Err(_) => self.root.clone(),
        }
    }

    /// Canonicalize a host path with the OS (following symlinks) and
    /// verify it did not escape the root.
    fn checked_real(&self, full: &Path) -> VfsResult<PathBuf> {
        let real = dunce::canonicalize(full).map_err(VfsError::from)?;
        if !real.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                real.display(),
                self.root.display()
            )));
        }
        Ok(real)
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Convert std::fs::Metadata to FileAttr.
    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        };

        FileAttr {
            size: meta.len(),
            kind,
            perm: meta.permissions().mode(),
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            atime: meta.accessed().ok(),
            ctime: meta.created().ok(),
            nlink: meta.nlink() as u32,
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
        }
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn stat(&self, path: &Path, follow: bool) -> VfsResult<FileAttr> {
        let full = self.host_path(path);
        let meta = if follow {
            let real = self.checked_real(&full)?;
            fs::metadata(&real).await.map_err(VfsError::from)?
        } else {
            fs::symlink_metadata(&full).await.map_err(VfsError::from)?
        };
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let full = self.host_path(path);
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full).await.map_err(VfsError::from)?;

        while let Some(entry) = dir.next_entry().await.map_err(VfsError::from)? {
            let file_type = entry.file_type().await.map_err(VfsError::from)?;
            let kind = if file_type.is_dir() {
                FileType::Directory
            } else if file_type.is_symlink() {
                FileType::Symlink
            } else {
                FileType::File
            };

            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let real = self.checked_real(&self.host_path(path))?;
        let mut file = fs::File::open(&real).await.map_err(VfsError::from)?;

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(VfsError::from)?;

        let mut buffer = vec![0u8; size as usize];
        let bytes_read = file.read(&mut buffer).await.map_err(VfsError::from)?;
        buffer.truncate(bytes_read);

        Ok(buffer)
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let full = self.host_path(path);
        fs::read_link(&full).await.map_err(VfsError::from)
    }

    async fn get_xattr(&self, path: &Path, name: &str) -> VfsResult<Option<Vec<u8>>> {
        #[cfg(unix)]
        {
            use rustix::io::Errno;

            let real = self.checked_real(&self.host_path(path))?;
            let size = match rustix::fs::getxattr(&real, name, &mut []) {
                Ok(size) => size,
                Err(e) if e == Errno::NODATA => return Ok(None),
                Err(e) => return Err(VfsError::from(std::io::Error::from(e))),
            };

            let mut buffer = vec![0u8; size];
            match rustix::fs::getxattr(&real, name, &mut buffer) {
                Ok(len) => {
                    buffer.truncate(len);
                    Ok(Some(buffer))
                }
                Err(e) if e == Errno::NODATA => Ok(None),
                Err(e) => Err(VfsError::from(std::io::Error::from(e))),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (path, name);
            Ok(None)
        }
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        use tokio::io::{AsyncSeekExt, AsyncWriteExt};

        self.check_writable()?;
        let real = self.checked_real(&self.host_path(path))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&real)
            .await
            .map_err(VfsError::from)?;

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(VfsError::from)?;

        file.write_all(data).await.map_err(VfsError::from)?;

        Ok(data.len() as u32)
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        use std::os::unix::fs::OpenOptionsExt;

        self.check_writable()?;
        let full = self.host_path(path);

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(VfsError::from)?;
        }

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&full)
            .map_err(VfsError::from)?;

        let meta = file.metadata().map_err(VfsError::from)?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        self.check_writable()?;
        let real = self.checked_real(&self.host_path(path))?;

        let file = fs::OpenOptions::new()
            .write(true)
            .open(&real)
            .await
            .map_err(VfsError::from)?;

        file.set_len(size).await.map_err(VfsError::from)
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        use std::os::unix::fs::DirBuilderExt;

        self.check_writable()?;
        let full = self.host_path(path);

        std::fs::DirBuilder::new()
            .mode(mode)
            .recursive(true)
            .create(&full)
            .map_err(VfsError::from)?;

        let meta = fs::metadata(&full).await.map_err(VfsError::from)?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.host_path(path);
        fs::remove_file(&full).await.map_err(VfsError::from)
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.host_path(path);
        fs::remove_dir(&full).await.map_err(VfsError::from)
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let from_full = self.host_path(from);
        let to_full = self.host_path(to);

        if let Some(parent) = to_full.parent() {
            fs::create_dir_all(parent).await.map_err(VfsError::from)?;
        }

        fs::rename(&from_full, &to_full)
            .await
            .map_err(VfsError::from)
    }

    async fn symlink(&self, link: &Path, target: &Path) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full = self.host_path(link);

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(VfsError::from)?;
        }

        // Target stored verbatim: dangling and cross-mount targets are legal
        std::os::unix::fs::symlink(target, &full).map_err(VfsError::from)?;

        self.stat(link, false).await
    }

    fn supports_modifications(&self, _path: &Path) -> bool {
        !self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        (backend, dir)
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let (backend, _dir) = setup();

        backend.create(Path::new("/test.txt"), 0o644).await.unwrap();
        backend
            .write(Path::new("/test.txt"), 0, b"hello world")
            .await
            .unwrap();

        let data = backend.read(Path::new("/test.txt"), 0, 100).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_partial_read() {
        let (backend, _dir) = setup();

        backend.create(Path::new("/test.txt"), 0o644).await.unwrap();
        backend
            .write(Path::new("/test.txt"), 0, b"hello world")
            .await
            .unwrap();

        let data = backend.read(Path::new("/test.txt"), 6, 5).await.unwrap();
        assert_eq!(data, b"world");
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let (backend, _dir) = setup();

        backend.mkdir(Path::new("/subdir"), 0o755).await.unwrap();
        backend
            .create(Path::new("/subdir/file.txt"), 0o644)
            .await
            .unwrap();
        backend.create(Path::new("/root.txt"), 0o644).await.unwrap();

        let entries = backend.readdir(Path::new("/")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| &e.name).collect();
        assert!(names.contains(&&"subdir".to_string()));
        assert!(names.contains(&&"root.txt".to_string()));
    }

    #[tokio::test]
    async fn test_read_only_denies_mutation() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::read_only(dir.path());

        assert!(!backend.supports_modifications(Path::new("/test.txt")));
        let result = backend.create(Path::new("/test.txt"), 0o644).await;
        assert!(matches!(result, Err(VfsError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_parent_refs_cannot_escape_root() {
        let (backend, _dir) = setup();

        // Lexical resolution anchors ".." at the backend root, so this
        // names <root>/etc/passwd, which does not exist.
        let result = backend
            .read(Path::new("/../../../etc/passwd"), 0, 100)
            .await;
        assert!(matches!(result, Err(VfsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_absolute_symlink_escape_blocked_on_follow() {
        let (backend, dir) = setup();

        std::os::unix::fs::symlink("/etc", dir.path().join("sneaky")).unwrap();

        let lstat = backend.stat(Path::new("/sneaky"), false).await.unwrap();
        assert!(lstat.is_symlink());

        let result = backend.stat(Path::new("/sneaky"), true).await;
        assert!(matches!(result, Err(VfsError::PathEscapesRoot(_))));
    }

    #[tokio::test]
    async fn test_symlink_follow_and_nofollow() {
        let (backend, _dir) = setup();

        backend.create(Path::new("/target.txt"), 0o644).await.unwrap();
        backend
            .write(Path::new("/target.txt"), 0, b"content")
            .await
            .unwrap();

        backend
            .symlink(Path::new("/link.txt"), Path::new("target.txt"))
            .await
            .unwrap();

        let target = backend.readlink(Path::new("/link.txt")).await.unwrap();
        assert_eq!(target, Path::new("target.txt"));

        assert!(backend
            .stat(Path::new("/link.txt"), false)
            .await
            .unwrap()
            .is_symlink());
        assert!(backend
            .stat(Path::new("/link.txt"), true)
            .await
            .unwrap()
            .is_file());
    }

    #[tokio::test]
    async fn test_dangling_symlink_follow_is_not_found() {
        let (backend, _dir) = setup();

        backend
            .symlink(Path::new("/dangling"), Path::new("nowhere.txt"))
            .await
            .unwrap();

        let result = backend.stat(Path::new("/dangling"), true).await;
        assert!(matches!(result, Err(VfsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rename() {
        let (backend, _dir) = setup();

        backend.create(Path::new("/old.txt"), 0o644).await.unwrap();
        backend
            .write(Path::new("/old.txt"), 0, b"content")
            .await
            .unwrap();

        backend
            .rename(Path::new("/old.txt"), Path::new("/new.txt"))
            .await
            .unwrap();

        assert!(backend.stat(Path::new("/old.txt"), false).await.is_err());
        let data = backend.read(Path::new("/new.txt"), 0, 100).await.unwrap();
        assert_eq!(data, b"content");
    }

    #[tokio::test]
    async fn test_truncate() {
        let (backend, _dir) = setup();

        backend.create(Path::new("/test.txt"), 0o644).await.unwrap();
        backend
            .write(Path::new("/test.txt"), 0, b"hello world")
            .await
            .unwrap();

        backend.truncate(Path::new("/test.txt"), 5).await.unwrap();

        let data = backend.read(Path::new("/test.txt"), 0, 100).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_xattr_absent_is_none() {
        let (backend, _dir) = setup();
        backend.create(Path::new("/plain.txt"), 0o644).await.unwrap();

        let value = backend
            .get_xattr(Path::new("/plain.txt"), "user.missing")
            .await
            .unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_xattr_missing_file_is_not_found() {
        let (backend, _dir) = setup();

        let result = backend.get_xattr(Path::new("/absent.txt"), "user.key").await;
        assert!(matches!(result, Err(VfsError::NotFound(_))));
    }
}
