//! # kasane-vfs
//!
//! Union filesystem: several independently-backed storage hierarchies
//! presented as one coherent path namespace. Key components:
//!
//! - [`VfsOps`] - Capability trait every backend implements
//! - [`UnionFs`] - Longest-prefix mount routing over those backends
//! - [`MemoryBackend`] - In-memory filesystem (scratch space, testing)
//! - [`LocalBackend`] - Host filesystem access (with root containment)
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: Operations take logical absolute paths.
//! - **Paths route, they don't rewrite**: A backend receives the full
//!   logical path and interprets it against its own virtual root, so a
//!   symlink target written on one backend names the same location when
//!   another backend serves it.
//! - **Lexical canonicalization first**: `.` and `..` resolve before
//!   routing; two spellings of one location always hit one backend.
//! - **Frozen mount table**: Bindings and the mandatory default backend
//!   are fixed when [`UnionFs`] is built; routing is a pure function.

pub mod backends;
pub mod clock;
pub mod error;
pub mod ops;
pub mod paths;
pub mod types;
pub mod union;

pub use backends::{LocalBackend, MemoryBackend, WritePolicy};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{VfsError, VfsResult};
pub use ops::{VfsOps, MAX_SYMLINK_HOPS};
pub use paths::canonicalize;
pub use types::{DirEntry, FileAttr, FileType};
pub use union::{UnionFs, UnionFsBuilder};
