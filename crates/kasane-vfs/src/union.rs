//! Union filesystem: longest-prefix mount routing over pluggable backends.
//!
//! A [`UnionFs`] presents several independently-backed hierarchies as one
//! path namespace. Every operation canonicalizes its path lexically, walks
//! the mount table from the path upward to find the owning backend, and
//! dispatches with the path unchanged — each backend interprets the full
//! logical path against its own virtual root.
//!
//! The mount table and the mandatory default backend are frozen at
//! construction, so routing is a pure function of the canonical path and
//! concurrent use needs no synchronization here.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::error::{VfsError, VfsResult};
use crate::ops::{VfsOps, MAX_SYMLINK_HOPS};
use crate::paths;
use crate::types::{DirEntry, FileAttr};

/// Builder for [`UnionFs`].
///
/// Mount prefixes are canonicalized at registration, so `/out/` and
/// `/out` name the same binding. Construction fails if no default
/// backend was supplied or if a prefix was registered twice.
#[derive(Default)]
pub struct UnionFsBuilder {
    mounts: BTreeMap<PathBuf, Arc<dyn VfsOps>>,
    duplicates: Vec<PathBuf>,
    default_fs: Option<Arc<dyn VfsOps>>,
}

impl UnionFsBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a backend to an absolute path prefix.
    pub fn mount(self, prefix: impl AsRef<Path>, fs: impl VfsOps + 'static) -> Self {
        self.mount_arc(prefix, Arc::new(fs))
    }

    /// Bind an already-shared backend to an absolute path prefix.
    pub fn mount_arc(mut self, prefix: impl AsRef<Path>, fs: Arc<dyn VfsOps>) -> Self {
        let prefix = paths::canonicalize(prefix.as_ref());
        if self.mounts.insert(prefix.clone(), fs).is_some() {
            self.duplicates.push(prefix);
        }
        self
    }

    /// Set the mandatory default backend, owning every path no mount
    /// prefix matches.
    pub fn default_fs(self, fs: impl VfsOps + 'static) -> Self {
        self.default_fs_arc(Arc::new(fs))
    }

    /// Set the default backend from an already-shared handle.
    pub fn default_fs_arc(mut self, fs: Arc<dyn VfsOps>) -> Self {
        self.default_fs = Some(fs);
        self
    }

    /// Freeze the table and construct the union.
    pub fn build(self) -> VfsResult<UnionFs> {
        if let Some(dup) = self.duplicates.first() {
            return Err(VfsError::configuration(format!(
                "prefix registered twice: {}",
                dup.display()
            )));
        }
        let default_fs = self
            .default_fs
            .ok_or_else(|| VfsError::configuration("a default backend is required"))?;

        for prefix in self.mounts.keys() {
            debug!(prefix = %prefix.display(), "mounting backend");
        }

        Ok(UnionFs {
            mounts: self.mounts,
            default_fs,
        })
    }
}

/// Routes filesystem operations to mounted backends.
///
/// Mount points are matched by longest prefix. For example, if `/foo` and
/// `/foo/bar` are both mounted, a path like `/foo/bar/x` routes to the
/// `/foo/bar` mount while `/foo/x` routes to `/foo`.
pub struct UnionFs {
    /// Mount points, keyed by canonical prefix. Frozen at construction.
    mounts: BTreeMap<PathBuf, Arc<dyn VfsOps>>,
    default_fs: Arc<dyn VfsOps>,
}

impl std::fmt::Debug for UnionFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionFs")
            .field("mounts", &self.mounts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl UnionFs {
    /// Start building a union filesystem.
    pub fn builder() -> UnionFsBuilder {
        UnionFsBuilder::new()
    }

    /// Registered mount prefixes, in order.
    pub fn mount_points(&self) -> Vec<PathBuf> {
        self.mounts.keys().cloned().collect()
    }

    /// The backend owning `canonical`: the binding for the path itself,
    /// else the nearest bound ancestor, else the default backend. The
    /// upward walk is what gives longest-prefix-match its guarantee.
    fn delegate(&self, canonical: &Path) -> &Arc<dyn VfsOps> {
        let mut probe = Some(canonical);
        while let Some(p) = probe {
            if let Some(fs) = self.mounts.get(p) {
                return fs;
            }
            probe = p.parent();
        }
        &self.default_fs
    }

    /// Route a logical path to its owning backend.
    pub fn route(&self, path: &Path) -> Arc<dyn VfsOps> {
        self.resolve_route(path).0
    }

    /// Route a logical path, also returning the effective path the
    /// backend will receive: the canonical path, unrewritten. Plain path
    /// fragments carry no backend provenance, so no further adjustment
    /// exists to apply.
    pub fn resolve_route(&self, path: &Path) -> (Arc<dyn VfsOps>, PathBuf) {
        let canonical = paths::canonicalize(path);
        let fs = Arc::clone(self.delegate(&canonical));
        (fs, canonical)
    }

    /// Whether `canonical` is a location the union must keep visible even
    /// when its routed backend has never materialized it: the root, a
    /// mount prefix, or an ancestor of one.
    fn materializes(&self, canonical: &Path) -> bool {
        canonical == Path::new("/") || self.mounts.keys().any(|m| m.starts_with(canonical))
    }

    fn check_gate(fs: &Arc<dyn VfsOps>, path: &Path) -> VfsResult<()> {
        if fs.supports_modifications(path) {
            Ok(())
        } else {
            Err(VfsError::permission_denied(format!(
                "modifications not supported: {}",
                path.display()
            )))
        }
    }

    /// Resolve symbolic links hop by hop until a non-link is reached.
    ///
    /// Each hop re-routes: a link stored on one backend may name a
    /// target served by another, and that explicit cross-backend
    /// reference is honored here. Relative targets resolve against the
    /// link's containing directory.
    pub async fn resolve_symlinks(&self, path: &Path) -> VfsResult<PathBuf> {
        let mut current = paths::canonicalize(path);
        for _ in 0..MAX_SYMLINK_HOPS {
            let attr = self.stat(&current, false).await?;
            if !attr.is_symlink() {
                return Ok(current);
            }
            let target = self.delegate(&current).readlink(&current).await?;
            current = if target.is_absolute() {
                paths::canonicalize(&target)
            } else {
                let base = current.parent().unwrap_or(Path::new("/"));
                paths::canonicalize(&base.join(target))
            };
        }
        warn!(path = %path.display(), "symlink resolution exceeded hop limit");
        Err(VfsError::TooManySymlinks)
    }

    /// Create a directory and every missing ancestor.
    ///
    /// Each level is routed individually, so a chain that crosses a
    /// mount boundary creates the boundary directory in the parent's
    /// namespace and the deeper levels inside the mount.
    pub async fn create_dir_all(&self, path: &Path) -> VfsResult<()> {
        let path = paths::canonicalize(path);
        let mut prefix = PathBuf::from("/");
        for component in path.components() {
            if let Component::Normal(seg) = component {
                prefix.push(seg);
                match self.mkdir(&prefix, 0o777).await {
                    Ok(_) => {}
                    Err(VfsError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VfsOps for UnionFs {
    async fn stat(&self, path: &Path, follow: bool) -> VfsResult<FileAttr> {
        let path = paths::canonicalize(path);
        match self.delegate(&path).stat(&path, follow).await {
            // Mount boundaries are visible as directories even before
            // anything is written behind them
            Err(VfsError::NotFound(_)) if self.materializes(&path) => {
                Ok(FileAttr::directory(0o755, SystemTime::UNIX_EPOCH))
            }
            other => other,
        }
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let path = paths::canonicalize(path);
        let fs = self.delegate(&path);

        let mut entries = match fs.readdir(&path).await {
            Ok(entries) => entries,
            Err(VfsError::NotFound(_)) if self.materializes(&path) => Vec::new(),
            Err(e) => return Err(e),
        };

        // A mount is an entry of its parent's namespace whether or not
        // the parent's backend knows the name; for deeper mounts the
        // next path component materializes as a boundary directory
        let mut seen: HashSet<String> = entries.iter().map(|e| e.name.clone()).collect();
        for prefix in self.mounts.keys() {
            if let Ok(rest) = prefix.strip_prefix(&path) {
                if let Some(Component::Normal(seg)) = rest.components().next() {
                    let name = seg.to_string_lossy().into_owned();
                    if seen.insert(name.clone()) {
                        entries.push(DirEntry::directory(name));
                    }
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let (fs, path) = self.resolve_route(path);
        fs.read(&path, offset, size).await
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let (fs, path) = self.resolve_route(path);
        fs.readlink(&path).await
    }

    async fn get_xattr(&self, path: &Path, name: &str) -> VfsResult<Option<Vec<u8>>> {
        let (fs, path) = self.resolve_route(path);
        fs.get_xattr(&path, name).await
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let (fs, path) = self.resolve_route(path);
        Self::check_gate(&fs, &path)?;
        fs.write(&path, offset, data).await
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        let (fs, path) = self.resolve_route(path);
        Self::check_gate(&fs, &path)?;
        fs.create(&path, mode).await
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let (fs, path) = self.resolve_route(path);
        Self::check_gate(&fs, &path)?;
        fs.truncate(&path, size).await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        let path = paths::canonicalize(path);
        // A mount root is an entry of its parent's namespace: creating
        // it is serviced by the parent's backend, and the mount's own
        // backend is never asked to create its own root.
        let fs = match (self.mounts.contains_key(&path), path.parent()) {
            (true, Some(parent)) => self.delegate(parent),
            _ => self.delegate(&path),
        };
        Self::check_gate(fs, &path)?;
        fs.mkdir(&path, mode).await
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        let (fs, path) = self.resolve_route(path);
        Self::check_gate(&fs, &path)?;
        fs.unlink(&path).await
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        let path = paths::canonicalize(path);
        // Symmetric with mkdir: removing a mount root operates on the
        // parent's namespace
        let fs = match (self.mounts.contains_key(&path), path.parent()) {
            (true, Some(parent)) => self.delegate(parent),
            _ => self.delegate(&path),
        };
        Self::check_gate(fs, &path)?;
        fs.rmdir(&path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let (from_fs, from) = self.resolve_route(from);
        let (to_fs, to) = self.resolve_route(to);

        if !Arc::ptr_eq(&from_fs, &to_fs) {
            return Err(VfsError::CrossDeviceLink);
        }

        Self::check_gate(&from_fs, &from)?;
        Self::check_gate(&from_fs, &to)?;
        from_fs.rename(&from, &to).await
    }

    async fn symlink(&self, link: &Path, target: &Path) -> VfsResult<FileAttr> {
        let (fs, link) = self.resolve_route(link);
        Self::check_gate(&fs, &link)?;
        // The target is stored verbatim; only the link location routes
        fs.symlink(&link, target).await
    }

    fn supports_modifications(&self, path: &Path) -> bool {
        let (fs, path) = self.resolve_route(path);
        fs.supports_modifications(&path)
    }
}
