//! Backend capability trait.
//!
//! Every storage backend behind the union — and the union itself —
//! implements [`VfsOps`]. Operations are path-based: a backend receives
//! the full logical absolute path and interprets it against its own
//! virtual root. The union layer never rewrites paths, which is what
//! makes a symlink target written on one backend meaningful on another.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::VfsResult;
use crate::types::{DirEntry, FileAttr};

/// Hop limit for symlink resolution, shared by backends and the union
/// resolver. Exceeding it (or looping) reports `TooManySymlinks`.
pub const MAX_SYMLINK_HOPS: usize = 32;

/// Core VFS operations trait.
///
/// All operations take logical absolute paths. Content I/O is expressed
/// as offset reads/writes with `read_all`/`write_all` conveniences on
/// top, so a backend needs no open-handle state.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    ///
    /// With `follow` set, symbolic links are resolved within this
    /// backend's own namespace before returning attributes; a target the
    /// backend cannot satisfy reports not-found.
    async fn stat(&self, path: &Path, follow: bool) -> VfsResult<FileAttr>;

    /// Read directory entries.
    ///
    /// Returns all entries of the directory: names without duplicates,
    /// no ordering guarantee beyond being stable for a given state.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read file contents.
    ///
    /// Reads up to `size` bytes starting at `offset`. Returns fewer
    /// bytes if EOF is reached.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Read the raw symbolic link target, without interpretation.
    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf>;

    /// Look up an extended attribute by key.
    ///
    /// Returns `None` when the attribute is absent; errors are reserved
    /// for the path itself being unreachable.
    async fn get_xattr(&self, path: &Path, name: &str) -> VfsResult<Option<Vec<u8>>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write data to an existing file at `offset`, extending it as
    /// needed. Returns the number of bytes written.
    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32>;

    /// Create a new empty file.
    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr>;

    /// Truncate (or extend) a file to `size` bytes.
    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()>;

    /// Create a directory.
    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr>;

    /// Remove a file or symlink.
    async fn unlink(&self, path: &Path) -> VfsResult<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &Path) -> VfsResult<()>;

    /// Rename a file or directory within this backend.
    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Create a symbolic link at `link` pointing to `target`.
    ///
    /// The target is stored verbatim; no existence check is performed.
    async fn symlink(&self, link: &Path, target: &Path) -> VfsResult<FileAttr>;

    // ========================================================================
    // Capabilities
    // ========================================================================

    /// Whether mutating calls are permitted for `path`.
    fn supports_modifications(&self, path: &Path) -> bool;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists (without following a trailing symlink).
    async fn exists(&self, path: &Path) -> bool {
        self.stat(path, false).await.is_ok()
    }

    /// Read entire file contents, following symlinks.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let attr = self.stat(path, true).await?;
        self.read(path, 0, attr.size as u32).await
    }

    /// Write entire file contents, creating or truncating as needed.
    async fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        if self.exists(path).await {
            self.truncate(path, 0).await?;
        } else {
            self.create(path, 0o644).await?;
        }
        self.write(path, 0, data).await?;
        Ok(())
    }
}
