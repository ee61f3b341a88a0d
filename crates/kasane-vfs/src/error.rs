//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
///
/// The union layer manufactures only `Configuration` itself; everything
/// else is raised by a backend and passed through unchanged, so callers
/// can distinguish failure causes by variant rather than message text.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Invalid mount table at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Filesystem is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Path escapes a backend root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// Rename or link across different mounts.
    #[error("cross-device link")]
    CrossDeviceLink,

    /// Symlink resolution exceeded the hop limit.
    #[error("too many symbolic links")]
    TooManySymlinks,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a Configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<io::Error> for VfsError {
    fn from(err: io::Error) -> Self {
        use io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => VfsError::NotFound(err.to_string()),
            ErrorKind::AlreadyExists => VfsError::AlreadyExists(err.to_string()),
            ErrorKind::PermissionDenied => VfsError::PermissionDenied(err.to_string()),
            ErrorKind::NotADirectory => VfsError::NotADirectory(err.to_string()),
            ErrorKind::IsADirectory => VfsError::IsADirectory(err.to_string()),
            ErrorKind::DirectoryNotEmpty => VfsError::DirectoryNotEmpty(err.to_string()),
            ErrorKind::ReadOnlyFilesystem => VfsError::ReadOnly,
            _ => VfsError::Io(err.to_string()),
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::Configuration(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::ReadOnly => {
                io::Error::new(io::ErrorKind::PermissionDenied, "filesystem is read-only")
            }
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::PathEscapesRoot(msg) => io::Error::new(io::ErrorKind::PermissionDenied, msg),
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::NotASymlink(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::CrossDeviceLink => io::Error::other("cross-device link"),
            VfsError::TooManySymlinks => io::Error::other("too many symbolic links"),
            VfsError::Io(msg) => io::Error::other(msg),
            VfsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert!(matches!(VfsError::from(not_found), VfsError::NotFound(_)));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "no access");
        assert!(matches!(VfsError::from(denied), VfsError::PermissionDenied(_)));

        let exists = io::Error::new(io::ErrorKind::AlreadyExists, "there");
        assert!(matches!(VfsError::from(exists), VfsError::AlreadyExists(_)));
    }

    #[test]
    fn test_round_trip_preserves_kind() {
        let io_err: io::Error = VfsError::not_found("/x").into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);

        let io_err: io::Error = VfsError::ReadOnly.into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
    }
}
