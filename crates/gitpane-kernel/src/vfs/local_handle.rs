//! Capability handles over a host directory.
//!
//! The native-process equivalent of a user-granted directory: every handle
//! is confined to names under the granted root, and writes become visible
//! atomically when the stream is closed (swap file + rename).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;

use super::handle::{DirectoryHandle, FileHandle, FileInfo, WritableFileStream};
use super::traits::millis;

/// Directory handle rooted at a host path.
#[derive(Debug, Clone)]
pub struct LocalDirectoryHandle {
    name: String,
    path: PathBuf,
}

impl LocalDirectoryHandle {
    /// Grant access to an existing host directory.
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Arc<Self>> {
        let path = fs::canonicalize(path.into()).await?;
        let meta = fs::metadata(&path).await?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {}", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        Ok(Arc::new(Self { name, path }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Host path of a direct child. Names can never walk out of the grant.
    fn child(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid entry name: {name:?}"),
            ));
        }
        Ok(self.path.join(name))
    }
}

#[async_trait]
impl DirectoryHandle for LocalDirectoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_directory_handle(
        &self,
        name: &str,
        create: bool,
    ) -> io::Result<Arc<dyn DirectoryHandle>> {
        let path = self.child(name)?;
        match fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("not a directory: {name}"),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && create => {
                fs::create_dir(&path).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(Arc::new(Self {
            name: name.to_string(),
            path,
        }))
    }

    async fn get_file_handle(&self, name: &str, create: bool) -> io::Result<Arc<dyn FileHandle>> {
        let path = self.child(name)?;
        match fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    format!("is a directory: {name}"),
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && create => {
                fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)
                    .await?;
            }
            Err(e) => return Err(e),
        }
        Ok(Arc::new(LocalFileHandle {
            name: name.to_string(),
            path,
        }))
    }

    async fn entries(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.path).await?;
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        // Host order is arbitrary; sort for stable traversal output.
        names.sort();
        Ok(names)
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> io::Result<()> {
        let path = self.child(name)?;
        let meta = fs::symlink_metadata(&path).await?;
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_dir(&path).await
            }
        } else {
            fs::remove_file(&path).await
        }
    }

    fn real_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

/// File handle for a host file under a granted directory.
#[derive(Debug, Clone)]
pub struct LocalFileHandle {
    name: String,
    path: PathBuf,
}

#[async_trait]
impl FileHandle for LocalFileHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_file(&self) -> io::Result<FileInfo> {
        let meta = fs::metadata(&self.path).await?;
        Ok(FileInfo {
            size: meta.len(),
            last_modified_millis: meta.modified().map(millis).unwrap_or(0),
        })
    }

    async fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path).await
    }

    async fn create_writable(&self) -> io::Result<Box<dyn WritableFileStream>> {
        Ok(Box::new(LocalWritable {
            path: self.path.clone(),
            swap: self.path.with_file_name(format!(".{}.gitpane-swap", self.name)),
            buffer: Vec::new(),
        }))
    }
}

struct LocalWritable {
    path: PathBuf,
    swap: PathBuf,
    buffer: Vec<u8>,
}

#[async_trait]
impl WritableFileStream for LocalWritable {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn close(self: Box<Self>) -> io::Result<()> {
        fs::write(&self.swap, &self.buffer).await?;
        if let Err(e) = fs::rename(&self.swap, &self.path).await {
            // Explicitly ignored: the swap file is garbage either way
            let _ = fs::remove_file(&self.swap).await;
            return Err(e);
        }
        Ok(())
    }
}
