//! One filesystem contract over either storage backend.
//!
//! A [`FilesystemAdapter`] is created per repository with its backend kind
//! fixed. The backend itself is built lazily on first use and then reused
//! for the adapter's lifetime: `Unopened → Initializing → Ready`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::handle::DirectoryHandle;
use super::native::NativeHandleStore;
use super::persistent::PersistentStore;
use super::traits::{Contents, Encoding, FileStat, Filesystem, MkdirOptions};
use crate::error::{Error, Result};
use crate::path;

/// Which storage model backs a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The application-private virtual filesystem.
    #[serde(alias = "browser")]
    Persistent,
    /// A user-granted directory handle.
    #[serde(alias = "local")]
    Native,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistent => f.write_str("persistent"),
            Self::Native => f.write_str("native"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "persistent" | "browser" => Ok(Self::Persistent),
            "native" | "local" => Ok(Self::Native),
            other => Err(Error::Config(format!("unknown filesystem type: {other}"))),
        }
    }
}

/// Lifecycle of an adapter's backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unopened,
    Ready,
}

/// Outcome of probing a native directory grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ConnectionStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            error: None,
            suggestion: None,
        }
    }

    pub fn failed(error: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            connected: false,
            error: Some(error.into()),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Lazily-initialized storage backend for one repository.
pub struct FilesystemAdapter {
    kind: BackendKind,
    handle: Option<Arc<dyn DirectoryHandle>>,
    store: Option<Arc<PersistentStore>>,
    backend: OnceCell<Arc<dyn Filesystem>>,
}

impl fmt::Debug for FilesystemAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemAdapter")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl FilesystemAdapter {
    /// Adapter over the shared persistent store.
    pub fn persistent(store: Arc<PersistentStore>) -> Self {
        Self {
            kind: BackendKind::Persistent,
            handle: None,
            store: Some(store),
            backend: OnceCell::new(),
        }
    }

    /// Adapter over a granted directory handle.
    pub fn native(handle: Arc<dyn DirectoryHandle>) -> Self {
        Self::with_parts(BackendKind::Native, Some(handle), None)
    }

    /// Adapter from loose parts; missing required parts surface as a
    /// `Config` error on first use, not here.
    pub fn with_parts(
        kind: BackendKind,
        handle: Option<Arc<dyn DirectoryHandle>>,
        store: Option<Arc<PersistentStore>>,
    ) -> Self {
        Self {
            kind,
            handle,
            store,
            backend: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn state(&self) -> AdapterState {
        if self.backend.initialized() {
            AdapterState::Ready
        } else {
            AdapterState::Unopened
        }
    }

    /// Build the backend on first call; later calls return the same one.
    pub async fn ensure_initialized(&self) -> Result<&Arc<dyn Filesystem>> {
        self.backend
            .get_or_try_init(|| async { self.initialize() })
            .await
    }

    fn initialize(&self) -> Result<Arc<dyn Filesystem>> {
        let backend: Arc<dyn Filesystem> = match self.kind {
            BackendKind::Persistent => match &self.store {
                Some(store) => store.clone(),
                None => {
                    warn!("no persistent store supplied, using a transient in-memory store");
                    Arc::new(PersistentStore::in_memory())
                }
            },
            BackendKind::Native => {
                let handle = self.handle.clone().ok_or_else(|| {
                    Error::Config("a directory handle is required for the native backend".into())
                })?;
                info!(root = handle.name(), "initializing native handle backend");
                Arc::new(NativeHandleStore::new(handle))
            }
        };
        Ok(backend)
    }

    /// Whether `path` exists. Never fails: any error means "no".
    pub async fn exists(&self, path: &str) -> bool {
        match self.stat(path).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                warn!(path, error = %e, "existence check failed");
                false
            }
        }
    }

    /// Whether `path` holds a `.git` directory or worktree pointer file.
    pub async fn is_git_repository(&self, path: &str) -> bool {
        let git_path = path::join([path, ".git"]);
        match self.stat(&git_path).await {
            Ok(stat) => stat.is_directory || stat.is_file,
            Err(e) => {
                debug!(path = %git_path, error = %e, "not a git repository");
                false
            }
        }
    }

    /// Check that a native grant is still usable by listing its root.
    pub async fn test_connection(&self) -> ConnectionStatus {
        if self.kind != BackendKind::Native {
            return ConnectionStatus::connected();
        }
        match self.readdir(".").await {
            Ok(_) => ConnectionStatus::connected(),
            Err(e) => ConnectionStatus::failed(
                e.to_string(),
                "Directory access may have been revoked. Please select the directory again.",
            ),
        }
    }
}

#[async_trait]
impl Filesystem for FilesystemAdapter {
    async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_initialized().await?.readdir(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        self.ensure_initialized().await?.stat(path).await
    }

    async fn lstat(&self, path: &str) -> Result<FileStat> {
        self.ensure_initialized().await?.lstat(path).await
    }

    async fn read_file(&self, path: Option<&str>, encoding: Encoding) -> Result<Option<Contents>> {
        self.ensure_initialized().await?.read_file(path, encoding).await
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_initialized().await?.write_file(path, data).await
    }

    async fn mkdir(&self, path: &str, options: MkdirOptions) -> Result<()> {
        self.ensure_initialized().await?.mkdir(path, options).await
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.ensure_initialized().await?.rmdir(path).await
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        self.ensure_initialized().await?.unlink(path).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.ensure_initialized().await?.rename(from, to).await
    }

    async fn readlink(&self, path: &str) -> Result<String> {
        self.ensure_initialized().await?.readlink(path).await
    }

    async fn symlink(&self, target: &str, path: &str) -> Result<()> {
        self.ensure_initialized().await?.symlink(target, path).await
    }

    async fn back_file(&self, path: &str) -> Result<Option<FileStat>> {
        self.ensure_initialized().await?.back_file(path).await
    }

    async fn du(&self, path: &str) -> u64 {
        match self.ensure_initialized().await {
            Ok(backend) => backend.du(path).await,
            Err(_) => 0,
        }
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_initialized().await?.flush().await
    }

    fn backend_name(&self) -> &'static str {
        match self.kind {
            BackendKind::Persistent => "persistent",
            BackendKind::Native => "native",
        }
    }

    fn real_path(&self, path: &str) -> Option<PathBuf> {
        self.backend.get().and_then(|backend| backend.real_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::vfs::memory_handle::{populate, MemoryDirectoryHandle};

    #[tokio::test]
    async fn native_without_handle_is_config_error() {
        let adapter = FilesystemAdapter::with_parts(BackendKind::Native, None, None);
        let Err(err) = adapter.ensure_initialized().await else {
            panic!("native adapter initialized without a handle");
        };
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(adapter.state(), AdapterState::Unopened);
        // Existence checks swallow even configuration failures.
        assert!(!adapter.exists("anything").await);
    }

    #[tokio::test]
    async fn initialization_is_lazy_and_idempotent() {
        let adapter = FilesystemAdapter::persistent(Arc::new(PersistentStore::in_memory()));
        assert_eq!(adapter.state(), AdapterState::Unopened);

        let first = adapter.ensure_initialized().await.unwrap().clone();
        let second = adapter.ensure_initialized().await.unwrap().clone();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(adapter.state(), AdapterState::Ready);
    }

    #[test]
    fn backend_kind_parsing() {
        assert_eq!("local".parse::<BackendKind>().unwrap(), BackendKind::Native);
        assert_eq!("browser".parse::<BackendKind>().unwrap(), BackendKind::Persistent);
        let err = "ftp".parse::<BackendKind>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn git_repository_probe_accepts_dir_or_file() {
        let root = MemoryDirectoryHandle::new("work");
        populate(&root, [(".git/HEAD", "ref: refs/heads/main\n")]).await.unwrap();
        let adapter = FilesystemAdapter::native(root);
        assert!(adapter.is_git_repository(".").await);
        assert!(adapter.is_git_repository("").await);

        let worktree = MemoryDirectoryHandle::new("linked");
        populate(&worktree, [(".git", "gitdir: /elsewhere/.git/worktrees/linked\n")])
            .await
            .unwrap();
        assert!(FilesystemAdapter::native(worktree).is_git_repository(".").await);

        let plain = MemoryDirectoryHandle::new("plain");
        populate(&plain, [("README", "hi")]).await.unwrap();
        assert!(!FilesystemAdapter::native(plain).is_git_repository(".").await);
    }

    #[tokio::test]
    async fn connection_probe_reports_native_failures() {
        let adapter = FilesystemAdapter::with_parts(BackendKind::Native, None, None);
        let status = adapter.test_connection().await;
        assert!(!status.connected);
        assert!(status.suggestion.is_some());

        let ok = FilesystemAdapter::native(MemoryDirectoryHandle::new("r"));
        assert_eq!(ok.test_connection().await, ConnectionStatus::connected());
    }
}
