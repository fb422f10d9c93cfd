//! gitpane-kernel: the core of gitpane.
//!
//! This crate provides:
//!
//! - **vfs**: one POSIX-like [`Filesystem`](vfs::Filesystem) contract over a
//!   capability-handle directory tree or the persistent virtual store
//! - **registry**: which backend and root each repository name uses
//! - **git**: the plumbing seam, the per-repository status cache and the
//!   [`GitStateEngine`](git::GitStateEngine) for status, commit and diff
//! - **session**: repository-name addressed operations for callers
//!
//! ```text
//! caller ─▶ Session ─▶ RepositoryRegistry ─▶ FilesystemAdapter ─▶ backend
//!              └─────▶ GitStateEngine ─▶ GitPlumbing ──┘
//! ```

pub mod config;
pub mod error;
pub mod git;
pub mod path;
pub mod paths;
pub mod registry;
pub mod session;
pub mod tree;
pub mod vfs;

pub use config::Config;
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use registry::{repo_name_from_url, RepositoryRecord, RepositoryRegistry};
pub use session::Session;
