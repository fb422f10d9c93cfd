//! Capability handles: typed directory/file references with no path access.
//!
//! A directory handle can only look up children by name and kind, list
//! child names, and remove children. There is no stat-by-name, no rename
//! and no symlink primitive. [`NativeHandleStore`](super::NativeHandleStore)
//! builds a path-addressed filesystem on top of this.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

/// What `get_file()` reports about a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub last_modified_millis: u64,
}

/// A granted directory.
///
/// Lookups of a missing child fail with `io::ErrorKind::NotFound` unless
/// `create` is set; looking up a child of the other kind fails with
/// `NotADirectory` / `IsADirectory`.
#[async_trait]
pub trait DirectoryHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn get_directory_handle(
        &self,
        name: &str,
        create: bool,
    ) -> io::Result<Arc<dyn DirectoryHandle>>;

    async fn get_file_handle(&self, name: &str, create: bool) -> io::Result<Arc<dyn FileHandle>>;

    /// Child names in enumeration order.
    async fn entries(&self) -> io::Result<Vec<String>>;

    /// Remove a child. Without `recursive`, a non-empty directory is refused.
    async fn remove_entry(&self, name: &str, recursive: bool) -> io::Result<()>;

    /// Host location, when the handle is backed by a real directory.
    fn real_path(&self) -> Option<PathBuf> {
        None
    }
}

/// A granted file.
#[async_trait]
pub trait FileHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn get_file(&self) -> io::Result<FileInfo>;

    async fn read(&self) -> io::Result<Vec<u8>>;

    /// Open a stream whose writes replace the file content on `close`.
    async fn create_writable(&self) -> io::Result<Box<dyn WritableFileStream>>;
}

/// Pending write to a file. Nothing is visible until `close` succeeds.
#[async_trait]
pub trait WritableFileStream: Send {
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    async fn close(self: Box<Self>) -> io::Result<()>;
}

/// Result of resolving a path: either kind of handle.
#[derive(Debug, Clone)]
pub enum Handle {
    Directory(Arc<dyn DirectoryHandle>),
    File(Arc<dyn FileHandle>),
}
