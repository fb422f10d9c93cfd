//! Repository registry: which backend and root a repository name uses.
//!
//! Persistent repositories live in the shared [`PersistentStore`] at
//! `/<name>` and are rediscovered by scanning the store. Native repositories
//! exist only in memory for the life of the process, each with its own
//! adapter over the granted handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::vfs::{
    BackendKind, ConnectionStatus, DirectoryHandle, FilesystemAdapter, Filesystem, PersistentStore,
};

/// Metadata the registry keeps about one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub display_name: String,
    pub backend: BackendKind,
    /// Directory the plumbing engine is pointed at, within the backend.
    pub root_path: String,
    /// `None` when the repository was found in the store without a record.
    pub cloned_at: Option<DateTime<Utc>>,
    pub remote_url: Option<String>,
    pub branch: Option<String>,
}

impl RepositoryRecord {
    fn discovered(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: format!("[browser] {name}"),
            backend: BackendKind::Persistent,
            root_path: format!("/{name}"),
            cloned_at: None,
            remote_url: None,
            branch: None,
        }
    }
}

struct Registered {
    record: RepositoryRecord,
    adapter: Arc<FilesystemAdapter>,
}

/// Repository name derived from a clone URL: the last path segment without
/// a `.git` suffix, or `"repository"` when nothing usable remains.
pub fn repo_name_from_url(url: &str) -> String {
    let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "repository".to_string()
    } else {
        name.to_string()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::Config(format!("invalid repository name: {name:?}")));
    }
    Ok(())
}

/// In-memory map from repository name to backend, root and metadata.
pub struct RepositoryRegistry {
    persistent: Arc<FilesystemAdapter>,
    records: RwLock<BTreeMap<String, Registered>>,
}

impl RepositoryRegistry {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            persistent: Arc::new(FilesystemAdapter::persistent(store)),
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// The adapter shared by every persistent repository.
    pub fn persistent_adapter(&self) -> &Arc<FilesystemAdapter> {
        &self.persistent
    }

    /// Record a repository living in the persistent store at `/<name>`.
    pub async fn register_persistent(
        &self,
        name: &str,
        remote_url: Option<String>,
    ) -> Result<RepositoryRecord> {
        validate_name(name)?;
        let record = RepositoryRecord {
            name: name.to_string(),
            display_name: format!("[browser] {name}"),
            backend: BackendKind::Persistent,
            root_path: format!("/{name}"),
            cloned_at: Some(Utc::now()),
            remote_url,
            branch: Some("main".to_string()),
        };
        info!(repo = name, "registered persistent repository");
        self.records.write().await.insert(
            name.to_string(),
            Registered {
                record: record.clone(),
                adapter: self.persistent.clone(),
            },
        );
        Ok(record)
    }

    /// Register a granted directory as `local-<name>`; it must hold a `.git`.
    pub async fn open_local(&self, handle: Arc<dyn DirectoryHandle>) -> Result<RepositoryRecord> {
        let handle_name = handle.name().to_string();
        let adapter = Arc::new(FilesystemAdapter::native(handle));
        adapter.ensure_initialized().await?;

        if !adapter.is_git_repository(".").await {
            return Err(Error::Config(format!(
                "selected directory is not a git repository: {handle_name}"
            )));
        }

        let name = format!("local-{handle_name}");
        let record = RepositoryRecord {
            name: name.clone(),
            display_name: format!("[local] {handle_name}"),
            backend: BackendKind::Native,
            root_path: ".".to_string(),
            cloned_at: Some(Utc::now()),
            remote_url: None,
            branch: None,
        };
        info!(repo = %name, "opened local repository");
        let previous = self.records.write().await.insert(
            name,
            Registered {
                record: record.clone(),
                adapter,
            },
        );
        if previous.is_some() {
            debug!(repo = %record.name, "replaced existing local repository grant");
        }
        Ok(record)
    }

    /// Metadata for `name`. Unrecorded repositories present in the
    /// persistent store are reported with unknown metadata.
    pub async fn get(&self, name: &str) -> Result<RepositoryRecord> {
        if let Some(entry) = self.records.read().await.get(name) {
            return Ok(entry.record.clone());
        }
        validate_name(name)?;
        if self.persistent.is_git_repository(&format!("/{name}")).await {
            return Ok(RepositoryRecord::discovered(name));
        }
        Err(Error::UnknownRepository(name.to_string()))
    }

    /// Adapter for `name`; the same instance on every call.
    pub async fn adapter(&self, name: &str) -> Result<Arc<FilesystemAdapter>> {
        if let Some(entry) = self.records.read().await.get(name) {
            return Ok(entry.adapter.clone());
        }
        // Unrecorded names can only be repositories found in the store.
        self.get(name).await?;
        Ok(self.persistent.clone())
    }

    /// Directory within the backend the engine should use for `name`.
    pub async fn root_path(&self, name: &str) -> Result<String> {
        Ok(self.get(name).await?.root_path)
    }

    /// Adapter and root path together, the pair every git call needs.
    pub async fn locate(&self, name: &str) -> Result<(Arc<FilesystemAdapter>, String)> {
        let adapter = self.adapter(name).await?;
        let root = self.root_path(name).await?;
        Ok((adapter, root))
    }

    /// Persistent repositories found in the store, then native ones.
    pub async fn list(&self) -> Vec<RepositoryRecord> {
        let mut repos = Vec::new();
        let records = self.records.read().await;

        match self.persistent.readdir("/").await {
            Ok(entries) => {
                for entry in entries {
                    let dir = format!("/{entry}");
                    match self.persistent.stat(&dir).await {
                        Ok(stat) if stat.is_directory => {}
                        Ok(_) => continue,
                        Err(e) => {
                            debug!(path = %dir, error = %e, "skipping unreadable store entry");
                            continue;
                        }
                    }
                    if !self.persistent.is_git_repository(&dir).await {
                        continue;
                    }
                    let record = match records.get(&entry) {
                        Some(known) => known.record.clone(),
                        None => RepositoryRecord::discovered(&entry),
                    };
                    repos.push(record);
                }
            }
            Err(e) => warn!(error = %e, "failed to scan persistent store"),
        }

        repos.extend(
            records
                .values()
                .filter(|entry| entry.record.backend == BackendKind::Native)
                .map(|entry| entry.record.clone()),
        );
        repos
    }

    /// Probe whether a repository's storage is still reachable.
    pub async fn test_connection(&self, name: &str) -> ConnectionStatus {
        match self.adapter(name).await {
            Ok(adapter) => adapter.test_connection().await,
            Err(e) => ConnectionStatus::failed(e.to_string(), "Please open a local repository first."),
        }
    }
}
