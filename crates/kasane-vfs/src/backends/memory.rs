//! In-memory filesystem backend.
//!
//! Backs throwaway namespaces and tests. All data is ephemeral. The
//! timestamp source and the modification policy are injected per
//! instance, so capability variation is plain data rather than a
//! subclass.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::{VfsError, VfsResult};
use crate::ops::{VfsOps, MAX_SYMLINK_HOPS};
use crate::types::{DirEntry, FileAttr, FileType};

/// Per-path predicate deciding whether mutation is allowed.
pub type WritePolicy = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
enum NodeKind {
    File { data: Vec<u8> },
    Directory,
    Symlink { target: PathBuf },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    attr: FileAttr,
    xattrs: HashMap<String, Vec<u8>>,
}

impl Node {
    fn new(kind: NodeKind, attr: FileAttr) -> Self {
        Self {
            kind,
            attr,
            xattrs: HashMap::new(),
        }
    }

    fn file_type(&self) -> FileType {
        match self.kind {
            NodeKind::File { .. } => FileType::File,
            NodeKind::Directory => FileType::Directory,
            NodeKind::Symlink { .. } => FileType::Symlink,
        }
    }
}

/// In-memory filesystem backend.
///
/// Thread-safe via an internal `RwLock`; entries are keyed by the
/// normalized path so every spelling of a location hits the same node.
pub struct MemoryBackend {
    entries: RwLock<HashMap<PathBuf, Node>>,
    clock: Arc<dyn Clock>,
    write_policy: Option<WritePolicy>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new empty in-memory filesystem with an explicit clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(
            PathBuf::from(""),
            Node::new(NodeKind::Directory, FileAttr::directory(0o755, clock.now())),
        );
        Self {
            entries: RwLock::new(entries),
            clock,
            write_policy: None,
        }
    }

    /// Install a per-path modification policy.
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = Some(policy);
        self
    }

    /// A filesystem that rejects every mutation.
    pub fn read_only() -> Self {
        Self::new().with_write_policy(Arc::new(|_| false))
    }

    /// Attach an extended attribute to an existing entry.
    pub fn set_xattr(
        &self,
        path: &Path,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.entries.write();
        let node = entries
            .get_mut(&normalized)
            .ok_or_else(|| VfsError::not_found(Self::path_str(&normalized)))?;
        node.xattrs.insert(name.into(), value.into());
        Ok(())
    }

    /// Normalize a path: remove the leading `/`, resolve `.` and `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                std::path::Component::RootDir => {}
                std::path::Component::CurDir => {}
                std::path::Component::ParentDir => {
                    result.pop();
                }
                std::path::Component::Normal(s) => {
                    result.push(s);
                }
                std::path::Component::Prefix(_) => {}
            }
        }
        result
    }

    fn path_str(path: &Path) -> String {
        path.display().to_string()
    }

    fn check_writable(&self, path: &Path) -> VfsResult<()> {
        match &self.write_policy {
            Some(policy) if !policy(path) => Err(VfsError::ReadOnly),
            _ => Ok(()),
        }
    }

    /// Ensure all parent directories of `path` exist.
    fn ensure_parents(entries: &mut HashMap<PathBuf, Node>, path: &Path, now: std::time::SystemTime) {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            if let std::path::Component::Normal(s) = component {
                current.push(s);
                entries.entry(current.clone()).or_insert_with(|| {
                    Node::new(NodeKind::Directory, FileAttr::directory(0o755, now))
                });
            }
        }
    }

    /// Follow symlinks starting at `start`, entirely within this
    /// backend's namespace. The final node must exist; a target this
    /// backend never materialized reports not-found, which is exactly
    /// the failure mode for naive single-backend follows across a
    /// mount boundary.
    fn resolve_path(entries: &HashMap<PathBuf, Node>, start: PathBuf) -> VfsResult<PathBuf> {
        let mut current = start;
        for _ in 0..MAX_SYMLINK_HOPS {
            let node = entries
                .get(&current)
                .ok_or_else(|| VfsError::not_found(Self::path_str(&current)))?;
            match &node.kind {
                NodeKind::Symlink { target } => {
                    let base = current.parent().map(Path::to_path_buf).unwrap_or_default();
                    current = Self::normalize(&base.join(target));
                }
                _ => return Ok(current),
            }
        }
        Err(VfsError::TooManySymlinks)
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn stat(&self, path: &Path, follow: bool) -> VfsResult<FileAttr> {
        let normalized = Self::normalize(path);
        let entries = self.entries.read();

        let resolved = if follow {
            Self::resolve_path(&entries, normalized)?
        } else {
            normalized
        };

        entries
            .get(&resolved)
            .map(|node| node.attr.clone())
            .ok_or_else(|| VfsError::not_found(Self::path_str(&resolved)))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let normalized = Self::normalize(path);
        let entries = self.entries.read();
        let resolved = Self::resolve_path(&entries, normalized)?;

        match entries.get(&resolved).map(|n| &n.kind) {
            Some(NodeKind::Directory) => {}
            Some(_) => return Err(VfsError::not_a_directory(Self::path_str(&resolved))),
            None => return Err(VfsError::not_found(Self::path_str(&resolved))),
        }

        let mut result = Vec::new();
        for (entry_path, node) in entries.iter() {
            if entry_path.parent() == Some(resolved.as_path()) && entry_path != &resolved {
                if let Some(name) = entry_path.file_name() {
                    result.push(DirEntry {
                        name: name.to_string_lossy().into_owned(),
                        kind: node.file_type(),
                    });
                }
            }
        }

        // Stable ordering for callers and tests
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let normalized = Self::normalize(path);
        let entries = self.entries.read();
        let resolved = Self::resolve_path(&entries, normalized)?;

        match entries.get(&resolved).map(|n| &n.kind) {
            Some(NodeKind::File { data }) => {
                let start = (offset as usize).min(data.len());
                let end = (start + size as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(NodeKind::Directory) => Err(VfsError::is_a_directory(Self::path_str(&resolved))),
            Some(NodeKind::Symlink { .. }) => unreachable!("resolve_path returned a symlink"),
            None => Err(VfsError::not_found(Self::path_str(&resolved))),
        }
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let normalized = Self::normalize(path);
        let entries = self.entries.read();

        match entries.get(&normalized).map(|n| &n.kind) {
            Some(NodeKind::Symlink { target }) => Ok(target.clone()),
            Some(_) => Err(VfsError::NotASymlink(Self::path_str(&normalized))),
            None => Err(VfsError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn get_xattr(&self, path: &Path, name: &str) -> VfsResult<Option<Vec<u8>>> {
        let normalized = Self::normalize(path);
        let entries = self.entries.read();
        let resolved = Self::resolve_path(&entries, normalized)?;

        entries
            .get(&resolved)
            .map(|node| node.xattrs.get(name).cloned())
            .ok_or_else(|| VfsError::not_found(Self::path_str(&resolved)))
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        self.check_writable(path)?;
        let normalized = Self::normalize(path);
        let mut entries = self.entries.write();
        let resolved = Self::resolve_path(&entries, normalized)?;

        match entries.get_mut(&resolved) {
            Some(Node {
                kind: NodeKind::File { data: file_data },
                attr,
                ..
            }) => {
                let offset = offset as usize;
                if offset + data.len() > file_data.len() {
                    file_data.resize(offset + data.len(), 0);
                }
                file_data[offset..offset + data.len()].copy_from_slice(data);
                attr.size = file_data.len() as u64;
                attr.mtime = self.clock.now();
                Ok(data.len() as u32)
            }
            Some(Node {
                kind: NodeKind::Directory,
                ..
            }) => Err(VfsError::is_a_directory(Self::path_str(&resolved))),
            _ => Err(VfsError::not_found(Self::path_str(&resolved))),
        }
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        self.check_writable(path)?;
        let normalized = Self::normalize(path);
        let now = self.clock.now();
        let mut entries = self.entries.write();

        Self::ensure_parents(&mut entries, &normalized, now);

        if entries.contains_key(&normalized) {
            return Err(VfsError::already_exists(Self::path_str(&normalized)));
        }

        let attr = FileAttr::file(0, mode, now);
        entries.insert(
            normalized,
            Node::new(NodeKind::File { data: Vec::new() }, attr.clone()),
        );
        Ok(attr)
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        self.check_writable(path)?;
        let normalized = Self::normalize(path);
        let mut entries = self.entries.write();
        let resolved = Self::resolve_path(&entries, normalized)?;

        match entries.get_mut(&resolved) {
            Some(Node {
                kind: NodeKind::File { data },
                attr,
                ..
            }) => {
                data.resize(size as usize, 0);
                attr.size = size;
                attr.mtime = self.clock.now();
                Ok(())
            }
            Some(Node {
                kind: NodeKind::Directory,
                ..
            }) => Err(VfsError::is_a_directory(Self::path_str(&resolved))),
            _ => Err(VfsError::not_found(Self::path_str(&resolved))),
        }
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        self.check_writable(path)?;
        let normalized = Self::normalize(path);
        let now = self.clock.now();
        let mut entries = self.entries.write();

        Self::ensure_parents(&mut entries, &normalized, now);

        if let Some(existing) = entries.get(&normalized) {
            return match &existing.kind {
                NodeKind::Directory => Ok(existing.attr.clone()),
                _ => Err(VfsError::already_exists(Self::path_str(&normalized))),
            };
        }

        let attr = FileAttr::directory(mode, now);
        entries.insert(normalized, Node::new(NodeKind::Directory, attr.clone()));
        Ok(attr)
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        self.check_writable(path)?;
        let normalized = Self::normalize(path);

        if normalized.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.entries.write();
        match entries.get(&normalized).map(|n| &n.kind) {
            Some(NodeKind::Directory) => Err(VfsError::is_a_directory(Self::path_str(&normalized))),
            Some(_) => {
                entries.remove(&normalized);
                Ok(())
            }
            None => Err(VfsError::not_found(Self::path_str(&normalized))),
        }
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        self.check_writable(path)?;
        let normalized = Self::normalize(path);

        if normalized.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot remove root"));
        }

        let mut entries = self.entries.write();
        match entries.get(&normalized).map(|n| &n.kind) {
            Some(NodeKind::Directory) => {}
            Some(_) => return Err(VfsError::not_a_directory(Self::path_str(&normalized))),
            None => return Err(VfsError::not_found(Self::path_str(&normalized))),
        }

        let has_children = entries
            .keys()
            .any(|k| k.parent() == Some(normalized.as_path()) && k != &normalized);
        if has_children {
            return Err(VfsError::directory_not_empty(Self::path_str(&normalized)));
        }

        entries.remove(&normalized);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.check_writable(from)?;
        self.check_writable(to)?;
        let from_normalized = Self::normalize(from);
        let to_normalized = Self::normalize(to);

        if from_normalized.as_os_str().is_empty() {
            return Err(VfsError::permission_denied("cannot rename root"));
        }

        let now = self.clock.now();
        let mut entries = self.entries.write();
        Self::ensure_parents(&mut entries, &to_normalized, now);

        let node = entries
            .remove(&from_normalized)
            .ok_or_else(|| VfsError::not_found(Self::path_str(&from_normalized)))?;

        // Directories take their subtree with them
        if matches!(node.kind, NodeKind::Directory) {
            let children: Vec<_> = entries
                .keys()
                .filter(|k| k.starts_with(&from_normalized))
                .cloned()
                .collect();

            for child in children {
                if let Some(child_node) = entries.remove(&child) {
                    let relative = child.strip_prefix(&from_normalized).unwrap();
                    entries.insert(to_normalized.join(relative), child_node);
                }
            }
        }

        entries.insert(to_normalized, node);
        Ok(())
    }

    async fn symlink(&self, link: &Path, target: &Path) -> VfsResult<FileAttr> {
        self.check_writable(link)?;
        let normalized = Self::normalize(link);
        let now = self.clock.now();
        let mut entries = self.entries.write();

        Self::ensure_parents(&mut entries, &normalized, now);

        if entries.contains_key(&normalized) {
            return Err(VfsError::already_exists(Self::path_str(&normalized)));
        }

        let target_len = target.to_string_lossy().len() as u64;
        let attr = FileAttr::symlink(target_len, now);
        entries.insert(
            normalized,
            Node::new(
                NodeKind::Symlink {
                    target: target.to_path_buf(),
                },
                attr.clone(),
            ),
        );
        Ok(attr)
    }

    fn supports_modifications(&self, path: &Path) -> bool {
        match &self.write_policy {
            Some(policy) => policy(path),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[tokio::test]
    async fn test_create_and_read() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("test.txt"), 0o644).await.unwrap();
        fs.write(Path::new("test.txt"), 0, b"hello world")
            .await
            .unwrap();

        let data = fs.read(Path::new("test.txt"), 0, 100).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_partial_read() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("test.txt"), 0o644).await.unwrap();
        fs.write(Path::new("test.txt"), 0, b"hello world")
            .await
            .unwrap();

        let data = fs.read(Path::new("test.txt"), 6, 5).await.unwrap();
        assert_eq!(data, b"world");
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let fs = MemoryBackend::new();
        fs.mkdir(Path::new("subdir"), 0o755).await.unwrap();
        fs.create(Path::new("subdir/file.txt"), 0o644).await.unwrap();
        fs.create(Path::new("root.txt"), 0o644).await.unwrap();

        let entries = fs.readdir(Path::new("")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| &e.name).collect();
        assert!(names.contains(&&"subdir".to_string()));
        assert!(names.contains(&&"root.txt".to_string()));

        let subentries = fs.readdir(Path::new("subdir")).await.unwrap();
        assert_eq!(subentries.len(), 1);
        assert_eq!(subentries[0].name, "file.txt");
    }

    #[tokio::test]
    async fn test_unlink() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("test.txt"), 0o644).await.unwrap();
        assert!(fs.stat(Path::new("test.txt"), false).await.is_ok());

        fs.unlink(Path::new("test.txt")).await.unwrap();
        assert!(fs.stat(Path::new("test.txt"), false).await.is_err());
    }

    #[tokio::test]
    async fn test_rmdir_empty_only() {
        let fs = MemoryBackend::new();
        fs.mkdir(Path::new("empty"), 0o755).await.unwrap();
        fs.rmdir(Path::new("empty")).await.unwrap();
        assert!(fs.stat(Path::new("empty"), false).await.is_err());

        fs.mkdir(Path::new("nonempty"), 0o755).await.unwrap();
        fs.create(Path::new("nonempty/file.txt"), 0o644).await.unwrap();
        let result = fs.rmdir(Path::new("nonempty")).await;
        assert!(matches!(result, Err(VfsError::DirectoryNotEmpty(_))));
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("dir/inner/file.txt"), 0o644).await.unwrap();
        fs.write(Path::new("dir/inner/file.txt"), 0, b"content")
            .await
            .unwrap();

        fs.rename(Path::new("dir"), Path::new("moved")).await.unwrap();

        assert!(fs.stat(Path::new("dir"), false).await.is_err());
        let data = fs.read(Path::new("moved/inner/file.txt"), 0, 100).await.unwrap();
        assert_eq!(data, b"content");
    }

    #[tokio::test]
    async fn test_symlink_lstat_and_follow() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("target.txt"), 0o644).await.unwrap();
        fs.write(Path::new("target.txt"), 0, b"payload").await.unwrap();
        fs.symlink(Path::new("link"), Path::new("target.txt"))
            .await
            .unwrap();

        let lstat = fs.stat(Path::new("link"), false).await.unwrap();
        assert!(lstat.is_symlink());

        let followed = fs.stat(Path::new("link"), true).await.unwrap();
        assert!(followed.is_file());
        assert_eq!(followed.size, 7);

        let target = fs.readlink(Path::new("link")).await.unwrap();
        assert_eq!(target, Path::new("target.txt"));
    }

    #[tokio::test]
    async fn test_follow_dangling_symlink_is_not_found() {
        let fs = MemoryBackend::new();
        fs.symlink(Path::new("out/foo"), Path::new("../in/bar.txt"))
            .await
            .unwrap();

        assert!(fs.stat(Path::new("out/foo"), false).await.unwrap().is_symlink());
        let result = fs.stat(Path::new("out/foo"), true).await;
        assert!(matches!(result, Err(VfsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_symlink_loop_detected() {
        let fs = MemoryBackend::new();
        fs.symlink(Path::new("a"), Path::new("b")).await.unwrap();
        fs.symlink(Path::new("b"), Path::new("a")).await.unwrap();

        let result = fs.stat(Path::new("a"), true).await;
        assert!(matches!(result, Err(VfsError::TooManySymlinks)));
    }

    #[tokio::test]
    async fn test_read_through_symlink() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("dir/real.txt"), 0o644).await.unwrap();
        fs.write(Path::new("dir/real.txt"), 0, b"via link").await.unwrap();
        fs.symlink(Path::new("dir/alias"), Path::new("real.txt"))
            .await
            .unwrap();

        let data = fs.read_all(Path::new("dir/alias")).await.unwrap();
        assert_eq!(data, b"via link");
    }

    #[tokio::test]
    async fn test_auto_create_parents() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("a/b/c/file.txt"), 0o644).await.unwrap();

        assert!(fs.stat(Path::new("a"), false).await.unwrap().is_dir());
        assert!(fs.stat(Path::new("a/b"), false).await.unwrap().is_dir());
        assert!(fs.stat(Path::new("a/b/c"), false).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_path_normalization() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("/a/b/c.txt"), 0o644).await.unwrap();

        assert!(fs.stat(Path::new("a/b/c.txt"), false).await.is_ok());
        assert!(fs.stat(Path::new("/a/b/c.txt"), false).await.is_ok());
        assert!(fs.stat(Path::new("a/./b/c.txt"), false).await.is_ok());
        assert!(fs.stat(Path::new("a/b/../b/c.txt"), false).await.is_ok());
    }

    #[tokio::test]
    async fn test_fixed_clock_timestamps() {
        let clock = FixedClock::at_epoch_plus(42);
        let fs = MemoryBackend::with_clock(Arc::new(clock));

        let attr = fs.create(Path::new("stamped.txt"), 0o644).await.unwrap();
        assert_eq!(attr.mtime, clock.now());

        fs.write(Path::new("stamped.txt"), 0, b"x").await.unwrap();
        let attr = fs.stat(Path::new("stamped.txt"), false).await.unwrap();
        assert_eq!(attr.mtime, clock.now());
    }

    #[tokio::test]
    async fn test_write_policy_denies_mutation() {
        let fs = MemoryBackend::read_only();
        assert!(!fs.supports_modifications(Path::new("anything")));

        let result = fs.create(Path::new("test.txt"), 0o644).await;
        assert!(matches!(result, Err(VfsError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_write_policy_is_per_path() {
        let fs = MemoryBackend::new().with_write_policy(Arc::new(|path: &Path| {
            !path.to_string_lossy().contains("frozen")
        }));

        assert!(fs.supports_modifications(Path::new("live/file.txt")));
        assert!(!fs.supports_modifications(Path::new("frozen/file.txt")));

        fs.create(Path::new("live/file.txt"), 0o644).await.unwrap();
        let result = fs.create(Path::new("frozen/file.txt"), 0o644).await;
        assert!(matches!(result, Err(VfsError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_xattr_lookup() {
        let fs = MemoryBackend::new();
        fs.create(Path::new("tagged.txt"), 0o644).await.unwrap();
        fs.set_xattr(Path::new("tagged.txt"), "user.origin", b"synthesized".to_vec())
            .unwrap();

        let value = fs
            .get_xattr(Path::new("tagged.txt"), "user.origin")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some(b"synthesized".as_slice()));

        let missing = fs.get_xattr(Path::new("tagged.txt"), "not_key").await.unwrap();
        assert!(missing.is_none());

        let result = fs.get_xattr(Path::new("absent.txt"), "user.origin").await;
        assert!(matches!(result, Err(VfsError::NotFound(_))));
    }
}
