//! In-memory capability handles.
//!
//! Used for the sandboxed backend in tests and for callers without host
//! storage. All data is lost when the last handle is dropped.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::handle::{DirectoryHandle, FileHandle, FileInfo, WritableFileStream};
use super::traits::now_millis;

#[derive(Debug, Clone)]
enum Node {
    Directory(Arc<MemoryDirectoryHandle>),
    File(Arc<MemoryFileHandle>),
}

/// Directory node of an in-memory handle tree.
///
/// Children keep insertion order, which is the enumeration order
/// `entries()` reports.
#[derive(Debug)]
pub struct MemoryDirectoryHandle {
    name: String,
    children: RwLock<Vec<(String, Node)>>,
}

impl MemoryDirectoryHandle {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            children: RwLock::new(Vec::new()),
        })
    }

    fn position(children: &[(String, Node)], name: &str) -> Option<usize> {
        children.iter().position(|(n, _)| n == name)
    }
}

fn check_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid entry name: {name:?}"),
        ));
    }
    Ok(())
}

#[async_trait]
impl DirectoryHandle for MemoryDirectoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_directory_handle(
        &self,
        name: &str,
        create: bool,
    ) -> io::Result<Arc<dyn DirectoryHandle>> {
        check_name(name)?;
        let mut children = self.children.write().await;
        let existing = Self::position(&children, name).map(|i| children[i].1.clone());
        match existing {
            Some(Node::Directory(dir)) => Ok(dir),
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {name}"),
            )),
            None if create => {
                let dir = MemoryDirectoryHandle::new(name);
                children.push((name.to_string(), Node::Directory(dir.clone())));
                Ok(dir)
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {name}"),
            )),
        }
    }

    async fn get_file_handle(&self, name: &str, create: bool) -> io::Result<Arc<dyn FileHandle>> {
        check_name(name)?;
        let mut children = self.children.write().await;
        let existing = Self::position(&children, name).map(|i| children[i].1.clone());
        match existing {
            Some(Node::File(file)) => Ok(file),
            Some(Node::Directory(_)) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {name}"),
            )),
            None if create => {
                let file = Arc::new(MemoryFileHandle::new(name));
                children.push((name.to_string(), Node::File(file.clone())));
                Ok(file)
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {name}"),
            )),
        }
    }

    async fn entries(&self) -> io::Result<Vec<String>> {
        let children = self.children.read().await;
        Ok(children.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> io::Result<()> {
        let mut children = self.children.write().await;
        let index = Self::position(&children, name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("not found: {name}"))
        })?;
        if let Node::Directory(dir) = &children[index].1
            && !recursive
            && !dir.children.read().await.is_empty()
        {
            return Err(io::Error::new(
                io::ErrorKind::DirectoryNotEmpty,
                format!("directory not empty: {name}"),
            ));
        }
        children.remove(index);
        Ok(())
    }
}

#[derive(Debug)]
struct FileState {
    data: Vec<u8>,
    modified: u64,
}

/// File node of an in-memory handle tree.
#[derive(Debug)]
pub struct MemoryFileHandle {
    name: String,
    state: Arc<RwLock<FileState>>,
}

impl MemoryFileHandle {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(FileState {
                data: Vec::new(),
                modified: now_millis(),
            })),
        }
    }
}

#[async_trait]
impl FileHandle for MemoryFileHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_file(&self) -> io::Result<FileInfo> {
        let state = self.state.read().await;
        Ok(FileInfo {
            size: state.data.len() as u64,
            last_modified_millis: state.modified,
        })
    }

    async fn read(&self) -> io::Result<Vec<u8>> {
        Ok(self.state.read().await.data.clone())
    }

    async fn create_writable(&self) -> io::Result<Box<dyn WritableFileStream>> {
        Ok(Box::new(MemoryWritable {
            target: self.state.clone(),
            buffer: Vec::new(),
        }))
    }
}

struct MemoryWritable {
    target: Arc<RwLock<FileState>>,
    buffer: Vec<u8>,
}

#[async_trait]
impl WritableFileStream for MemoryWritable {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn close(self: Box<Self>) -> io::Result<()> {
        let mut state = self.target.write().await;
        state.data = self.buffer;
        // Strictly increasing so back-to-back writes never share an mtime.
        state.modified = now_millis().max(state.modified + 1);
        Ok(())
    }
}

/// Build a handle tree from `(path, content)` pairs; handy for fixtures.
pub async fn populate<I, P, C>(root: &Arc<MemoryDirectoryHandle>, files: I) -> io::Result<()>
where
    I: IntoIterator<Item = (P, C)>,
    P: AsRef<str>,
    C: AsRef<[u8]>,
{
    let mut cache: BTreeMap<String, Arc<dyn DirectoryHandle>> = BTreeMap::new();
    for (path, content) in files {
        let segments = crate::path::segments(path.as_ref());
        let Some((file_name, dirs)) = segments.split_last() else {
            continue;
        };
        let mut current: Arc<dyn DirectoryHandle> = root.clone();
        let mut prefix = String::new();
        for dir in dirs {
            prefix.push_str(dir);
            prefix.push('/');
            current = match cache.get(&prefix) {
                Some(handle) => handle.clone(),
                None => {
                    let handle = current.get_directory_handle(dir, true).await?;
                    cache.insert(prefix.clone(), handle.clone());
                    handle
                }
            };
        }
        let file = current.get_file_handle(file_name, true).await?;
        let mut stream = file.create_writable().await?;
        stream.write(content.as_ref()).await?;
        stream.close().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn typed_lookup_distinguishes_kinds() {
        let root = MemoryDirectoryHandle::new("root");
        root.get_directory_handle("dir", true).await.unwrap();
        root.get_file_handle("file", true).await.unwrap();

        let err = root.get_file_handle("dir", false).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::IsADirectory);
        let err = root.get_directory_handle("file", false).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotADirectory);
        let err = root.get_file_handle("missing", false).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn writes_land_only_on_close() {
        let root = MemoryDirectoryHandle::new("root");
        let file = root.get_file_handle("a.txt", true).await.unwrap();

        let mut stream = file.create_writable().await.unwrap();
        stream.write(b"pending").await.unwrap();
        assert!(file.read().await.unwrap().is_empty());
        stream.close().await.unwrap();
        assert_eq!(file.read().await.unwrap(), b"pending");

        let mut dropped = file.create_writable().await.unwrap();
        dropped.write(b"lost").await.unwrap();
        drop(dropped);
        assert_eq!(file.read().await.unwrap(), b"pending");
    }

    #[tokio::test]
    async fn entries_keep_insertion_order() {
        let root = MemoryDirectoryHandle::new("root");
        populate(&root, [("z.txt", "z"), ("a.txt", "a"), ("m/n.txt", "n")])
            .await
            .unwrap();
        assert_eq!(root.entries().await.unwrap(), vec!["z.txt", "a.txt", "m"]);
    }

    #[tokio::test]
    async fn remove_non_empty_requires_recursive() {
        let root = MemoryDirectoryHandle::new("root");
        populate(&root, [("dir/file.txt", "data")]).await.unwrap();

        let err = root.remove_entry("dir", false).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::DirectoryNotEmpty);
        root.remove_entry("dir", true).await.unwrap();
        assert!(root.entries().await.unwrap().is_empty());
    }
}
