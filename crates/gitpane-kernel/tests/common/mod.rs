//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use gitpane_kernel::path;
use gitpane_kernel::vfs::{
    Filesystem, MemoryDirectoryHandle, MkdirOptions, NativeHandleStore, PersistentStore,
};

/// Which storage backend a test runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Persistent,
    Native,
}

impl Backend {
    /// A fresh empty store of this kind.
    pub fn store(self) -> Arc<dyn Filesystem> {
        match self {
            Self::Persistent => Arc::new(PersistentStore::in_memory()),
            Self::Native => Arc::new(NativeHandleStore::new(MemoryDirectoryHandle::new("root"))),
        }
    }

    /// Where a repository lives inside the store.
    pub fn repo_dir(self) -> &'static str {
        match self {
            Self::Persistent => "/demo",
            Self::Native => ".",
        }
    }
}

/// Write `content` to `file` under `dir`, creating parent directories.
pub async fn put(fs: &dyn Filesystem, dir: &str, file: &str, content: impl AsRef<[u8]>) {
    let full = path::join([dir, file]);
    if let Some((parent, _)) = path::split_parent(&full) {
        if !path::is_root(&parent) {
            fs.mkdir(&parent, MkdirOptions::recursive()).await.unwrap();
        }
    }
    fs.write_file(&full, content.as_ref()).await.unwrap();
}

pub async fn delete(fs: &dyn Filesystem, dir: &str, file: &str) {
    fs.unlink(&path::join([dir, file])).await.unwrap();
}
