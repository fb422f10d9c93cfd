//! Path-addressed filesystem over a granted directory handle.
//!
//! The handle API has no stat-by-name, so existence is discovered by typed
//! lookup: each segment is tried as a directory first, and only the final
//! segment falls back to a file lookup. Directory stats are synthetic
//! (zero size, current time) because directories carry no metadata.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::handle::{DirectoryHandle, Handle};
use super::traits::{now_millis, Contents, Encoding, FileStat, Filesystem, MkdirOptions};
use crate::error::{Error, Result, ResultExt};
use crate::path;

/// Filesystem backed by a capability handle to a directory tree.
#[derive(Debug, Clone)]
pub struct NativeHandleStore {
    root: Arc<dyn DirectoryHandle>,
}

/// Map a failed typed lookup: a missing or wrong-kind entry means the path
/// does not exist; anything else (revoked permission, host I/O) is real.
fn lookup_error(operation: &'static str, path: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory | io::ErrorKind::IsADirectory => {
            Error::not_found(path)
        }
        _ => Error::io(operation, path, err),
    }
}

impl NativeHandleStore {
    pub fn new(root: Arc<dyn DirectoryHandle>) -> Self {
        Self { root }
    }

    /// Name of the granted root directory.
    pub fn root_name(&self) -> &str {
        self.root.name()
    }

    /// Walk from the root to the handle named by `path`.
    pub async fn resolve_handle(&self, path: &str) -> Result<Handle> {
        let segments = path::segments(path);
        let mut current = self.root.clone();

        for (i, part) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            match current.get_directory_handle(part, false).await {
                Ok(dir) => current = dir,
                Err(dir_err) if is_last => {
                    return match current.get_file_handle(part, false).await {
                        Ok(file) => Ok(Handle::File(file)),
                        Err(file_err) if file_err.kind() == io::ErrorKind::NotFound => {
                            Err(lookup_error("resolve", path, dir_err))
                        }
                        Err(file_err) => Err(lookup_error("resolve", path, file_err)),
                    };
                }
                Err(err) => return Err(lookup_error("resolve", path, err)),
            }
        }
        Ok(Handle::Directory(current))
    }

    /// Walk directory segments, optionally creating each missing one.
    async fn resolve_dir(
        &self,
        operation: &'static str,
        path: &str,
        create: bool,
    ) -> Result<Arc<dyn DirectoryHandle>> {
        let mut current = self.root.clone();
        for part in path::segments(path) {
            current = current
                .get_directory_handle(part, create)
                .await
                .map_err(|e| lookup_error(operation, path, e))?;
        }
        Ok(current)
    }

    /// Parent directory handle plus final name, for the removal primitives.
    async fn parent_of(&self, operation: &'static str, path: &str) -> Result<(Arc<dyn DirectoryHandle>, String)> {
        let (parent, name) = path::split_parent(path).ok_or_else(|| {
            Error::io(
                operation,
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "the root cannot be removed"),
            )
        })?;
        let dir = self.resolve_dir(operation, &parent, false).await?;
        Ok((dir, name))
    }
}

#[async_trait]
impl Filesystem for NativeHandleStore {
    async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        match self.resolve_handle(path).await? {
            Handle::Directory(dir) => dir
                .entries()
                .await
                .map_err(|e| Error::io("readdir", path, e)),
            Handle::File(_) => Err(Error::io(
                "readdir",
                path,
                io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
            )),
        }
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        match self.resolve_handle(path).await? {
            Handle::File(file) => {
                let info = file.get_file().await.map_err(|e| Error::io("stat", path, e))?;
                Ok(FileStat::file(info.size, info.last_modified_millis))
            }
            Handle::Directory(_) => Ok(FileStat::directory(now_millis())),
        }
    }

    async fn read_file(&self, path: Option<&str>, encoding: Encoding) -> Result<Option<Contents>> {
        let Some(path) = path else {
            debug!("read_file called without a path (capability probe)");
            return Ok(None);
        };
        let file = match self.resolve_handle(path).await? {
            Handle::File(file) => file,
            Handle::Directory(_) => {
                return Err(Error::io(
                    "readFile",
                    path,
                    io::Error::new(io::ErrorKind::IsADirectory, "path is not a file"),
                ));
            }
        };
        let data = file.read().await.map_err(|e| Error::io("readFile", path, e))?;
        debug!(path, len = data.len(), ?encoding, "read_file");
        Ok(Some(Contents::decode(data, encoding)))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let (parent, name) = path::split_parent(path).ok_or_else(|| {
            Error::io(
                "writeFile",
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "cannot write to the root directory"),
            )
        })?;
        let dir = self.resolve_dir("writeFile", &parent, true).await?;
        let file = dir
            .get_file_handle(&name, true)
            .await
            .map_err(|e| Error::io("writeFile", path, e))?;

        // open, write and close must all succeed; the handle discards a
        // stream that is never closed.
        let mut stream = file
            .create_writable()
            .await
            .map_err(|e| Error::io("writeFile", path, e))?;
        stream
            .write(data)
            .await
            .map_err(|e| Error::io("writeFile", path, e))?;
        stream
            .close()
            .await
            .map_err(|e| Error::io("writeFile", path, e))?;
        debug!(path, len = data.len(), "write_file");
        Ok(())
    }

    async fn mkdir(&self, path: &str, options: MkdirOptions) -> Result<()> {
        let segments = path::segments(path);
        let mut current = self.root.clone();
        for (i, part) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            current = match current.get_directory_handle(part, false).await {
                Ok(dir) => dir,
                Err(e) if e.kind() == io::ErrorKind::NotFound && (options.recursive || is_last) => {
                    current
                        .get_directory_handle(part, true)
                        .await
                        .map_err(|e| Error::io("mkdir", path, e))?
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(Error::not_found(path::join(segments[..=i].iter())));
                }
                Err(e) => return Err(Error::io("mkdir", path, e)),
            };
        }
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let (dir, name) = self.parent_of("rmdir", path).await?;
        dir.remove_entry(&name, true)
            .await
            .map_err(|e| lookup_error("rmdir", path, e))
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        let (dir, name) = self.parent_of("unlink", path).await?;
        dir.remove_entry(&name, false).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::not_found(path),
            _ => Error::io("unlink", path, e),
        })
    }

    /// Emulated move: read → write → unlink. Not atomic.
    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let data = self
            .read(from)
            .await
            .with_context(|| format!("rename {from} -> {to}: reading source"))?;
        self.write_file(to, &data)
            .await
            .with_context(|| format!("rename {from} -> {to}: writing destination"))?;
        if let Err(e) = self.unlink(from).await {
            // Both paths now exist; report whether the source survived.
            let source_left = self.stat(from).await.is_ok();
            warn!(from, to, source_left, error = %e, "rename interrupted after writing destination");
            return Err(e.context(format!(
                "rename {from} -> {to}: removing source (destination written, source still present: {source_left})"
            )));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "native"
    }

    fn real_path(&self, path: &str) -> Option<PathBuf> {
        let root = self.root.real_path()?;
        let relative = path::normalize(path);
        Some(if relative.is_empty() {
            root
        } else {
            root.join(relative)
        })
    }
}
