//! Session facade: repository-name addressed file and git operations.

use std::io;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result, ResultExt};
use crate::git::{
    CommitOutcome, CommitSummary, GitPlumbing, GitStateEngine, ObjectId, Progress, StatusRow,
    TreeDiffEntry,
};
use crate::path;
use crate::registry::RepositoryRegistry;
use crate::tree::{self, FileTreeEntry};
use crate::vfs::{BackendKind, FilesystemAdapter, Filesystem, MkdirOptions, PersistentStore};

/// Binds a registry, an engine and the user's configuration.
pub struct Session {
    registry: RepositoryRegistry,
    engine: GitStateEngine,
    config: Config,
}

impl Session {
    pub fn new(store: Arc<PersistentStore>, plumbing: Arc<dyn GitPlumbing>, config: Config) -> Self {
        Self {
            registry: RepositoryRegistry::new(store),
            engine: GitStateEngine::with_author(plumbing, config.author.clone()),
            config,
        }
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &GitStateEngine {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialized adapter and root path for `repo`.
    async fn open(&self, repo: &str) -> Result<(Arc<FilesystemAdapter>, String)> {
        let (adapter, root) = self.registry.locate(repo).await?;
        adapter
            .ensure_initialized()
            .await
            .with_context(|| format!("opening repository '{repo}'"))?;
        Ok((adapter, root))
    }

    /// Path of `file` under `root`; `..` may not leave the repository.
    fn resolve(repo: &str, root: &str, file: &str) -> Result<String> {
        let rel = path::confine(file).ok_or_else(|| {
            Error::Config(format!("path '{file}' escapes repository '{repo}'"))
        })?;
        Ok(path::join([root, rel.as_str()]))
    }

    pub async fn read_file(&self, repo: &str, file: &str) -> Result<String> {
        let (fs, root) = self.open(repo).await?;
        let full = Self::resolve(repo, &root, file)?;
        fs.read_to_string(&full)
            .await
            .with_context(|| format!("reading {file} in '{repo}'"))
    }

    /// Write a file in `repo`, creating its parent directories.
    pub async fn write_file(&self, repo: &str, file: &str, content: &[u8]) -> Result<()> {
        let (fs, root) = self.open(repo).await?;
        let full = Self::resolve(repo, &root, file)?;

        // The handle store creates parents itself; the persistent one needs mkdir -p.
        if fs.kind() == BackendKind::Persistent {
            if let Some((parent, _)) = path::split_parent(&full) {
                match fs.mkdir(&parent, MkdirOptions::recursive()).await {
                    Ok(()) => {}
                    Err(e) if e.io_kind() == Some(io::ErrorKind::AlreadyExists) => {
                        debug!(repo, path = %parent, "parent directory already exists");
                    }
                    Err(e) => {
                        return Err(e.context(format!("creating parent of {file} in '{repo}'")));
                    }
                }
            }
        }

        fs.write_file(&full, content)
            .await
            .with_context(|| format!("writing {file} in '{repo}'"))?;
        info!(repo, path = file, bytes = content.len(), "file saved");
        Ok(())
    }

    pub async fn list_files(&self, repo: &str) -> Result<Vec<String>> {
        let (fs, root) = self.open(repo).await?;
        tree::list_files(fs.as_ref(), &root).await
    }

    pub async fn file_tree(&self, repo: &str) -> Result<Vec<FileTreeEntry>> {
        let files = self.list_files(repo).await?;
        Ok(tree::file_tree(&files))
    }

    pub async fn status(&self, repo: &str) -> Result<Vec<StatusRow>> {
        let (fs, root) = self.open(repo).await?;
        self.engine.compute_status(repo, fs.as_ref(), &root).await
    }

    pub async fn commit(
        &self,
        repo: &str,
        message: &str,
        progress: Option<Progress<'_>>,
    ) -> Result<CommitOutcome> {
        let (fs, root) = self.open(repo).await?;
        self.engine
            .stage_and_commit(repo, fs.as_ref(), &root, message, progress)
            .await
    }

    pub async fn diff_commit(&self, repo: &str, commit: ObjectId) -> Result<Vec<TreeDiffEntry>> {
        let (fs, root) = self.open(repo).await?;
        self.engine.diff_commit(repo, fs.as_ref(), &root, commit).await
    }

    /// Recent commits; `depth` defaults to `[log] max_count`.
    pub async fn log(&self, repo: &str, depth: Option<usize>) -> Result<Vec<CommitSummary>> {
        let (fs, root) = self.open(repo).await?;
        let depth = depth.unwrap_or(self.config.log.max_count);
        self.engine.log(repo, fs.as_ref(), &root, depth).await
    }

    pub async fn head(&self, repo: &str) -> Result<Option<ObjectId>> {
        let (fs, root) = self.open(repo).await?;
        self.engine.head(repo, fs.as_ref(), &root).await
    }

    /// Persist the shared store, if it has a snapshot location.
    pub async fn flush(&self) -> Result<()> {
        self.registry.persistent_adapter().flush().await
    }
}
