//! Git state engine: status, stage-and-commit and commit diffs.
//!
//! The engine owns one [`StatusCache`] per repository name and threads it
//! into every status computation, so the plumbing can skip files whose size
//! and mtime have not changed since the previous call. The cache sits behind
//! a per-repository async mutex: status and stage-and-commit for the same
//! repository never interleave, while different repositories proceed
//! independently.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::cache::{CacheStats, StatusCache};
use super::plumbing::{
    CommitSummary, GitPlumbing, HeadState, ObjectId, Signature, StatusRow, TreeEntryKind,
    WorkdirState,
};
use crate::error::{Error, Result, ResultExt};
use crate::vfs::Filesystem;

/// Receives one human-readable line per staged path and for the commit.
pub type Progress<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// A blob path that differs between a commit and its first parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeDiffEntry {
    pub path: String,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub commit: ObjectId,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl CommitOutcome {
    /// Nothing was staged for this commit.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Paths to stage, split in a single pass over the status rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

impl Partition {
    pub fn from_rows(rows: &[StatusRow], progress: Option<Progress<'_>>) -> Self {
        let mut partition = Self::default();
        for row in rows {
            match (row.head, row.workdir) {
                (HeadState::Present, WorkdirState::Absent) => {
                    if let Some(report) = progress {
                        report(&format!("deleted: {}", row.path));
                    }
                    partition.to_remove.push(row.path.clone());
                }
                (_, WorkdirState::Modified) => {
                    if let Some(report) = progress {
                        report(&format!("added/modified: {}", row.path));
                    }
                    partition.to_add.push(row.path.clone());
                }
                _ => {}
            }
        }
        partition
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

#[derive(Debug, Default)]
struct RepoState {
    cache: Mutex<StatusCache>,
}

/// Orchestrates multi-step git operations over a [`GitPlumbing`].
pub struct GitStateEngine {
    plumbing: Arc<dyn GitPlumbing>,
    author: Signature,
    repos: Mutex<HashMap<String, Arc<RepoState>>>,
}

impl GitStateEngine {
    pub fn new(plumbing: Arc<dyn GitPlumbing>) -> Self {
        Self::with_author(plumbing, Signature::default())
    }

    pub fn with_author(plumbing: Arc<dyn GitPlumbing>, author: Signature) -> Self {
        Self {
            plumbing,
            author,
            repos: Mutex::new(HashMap::new()),
        }
    }

    pub fn author(&self) -> &Signature {
        &self.author
    }

    pub fn plumbing(&self) -> &Arc<dyn GitPlumbing> {
        &self.plumbing
    }

    async fn state(&self, repo: &str) -> Arc<RepoState> {
        let mut repos = self.repos.lock().await;
        repos
            .entry(repo.to_string())
            .or_insert_with(|| {
                debug!(repo, "creating status cache");
                Arc::new(RepoState::default())
            })
            .clone()
    }

    /// Three-way status of `repo`, reusing its cache.
    pub async fn compute_status(
        &self,
        repo: &str,
        fs: &dyn Filesystem,
        dir: &str,
    ) -> Result<Vec<StatusRow>> {
        let state = self.state(repo).await;
        let mut cache = state.cache.lock().await;
        self.status_locked(repo, fs, dir, &mut cache).await
    }

    async fn status_locked(
        &self,
        repo: &str,
        fs: &dyn Filesystem,
        dir: &str,
        cache: &mut StatusCache,
    ) -> Result<Vec<StatusRow>> {
        let rows = self
            .plumbing
            .status_matrix(fs, dir, cache)
            .await
            .with_context(|| format!("status of repository '{repo}'"))?;
        let stats = cache.stats();
        debug!(repo, rows = rows.len(), hits = stats.hits, misses = stats.misses, "status computed");
        Ok(rows)
    }

    /// Stage every change in one add batch and one remove batch, then commit.
    ///
    /// A failure part way leaves the index as far as it got; running again
    /// is safe since re-staging an already staged path changes nothing.
    pub async fn stage_and_commit(
        &self,
        repo: &str,
        fs: &dyn Filesystem,
        dir: &str,
        message: &str,
        progress: Option<Progress<'_>>,
    ) -> Result<CommitOutcome> {
        let state = self.state(repo).await;
        let mut cache = state.cache.lock().await;

        let rows = self.status_locked(repo, fs, dir, &mut cache).await?;
        let Partition { to_add, to_remove } = Partition::from_rows(&rows, progress);
        let commit_error = |step: &'static str| {
            let repo = repo.to_string();
            move |source: Error| Error::Commit {
                repo,
                step,
                source: Box::new(source),
            }
        };

        if !to_add.is_empty() {
            self.plumbing
                .add(fs, dir, &to_add)
                .await
                .map_err(commit_error("add"))?;
        }
        if !to_remove.is_empty() {
            self.plumbing
                .remove(fs, dir, &to_remove)
                .await
                .map_err(commit_error("remove"))?;
        }

        if let Some(report) = progress {
            report(&format!("git commit -m \"{message}\""));
        }
        let commit = self
            .plumbing
            .commit(fs, dir, &self.author, message)
            .await
            .map_err(commit_error("commit"))?;

        info!(
            repo,
            commit = %commit.short(),
            added = to_add.len(),
            removed = to_remove.len(),
            "commit created"
        );
        Ok(CommitOutcome {
            commit,
            added: to_add,
            removed: to_remove,
        })
    }

    /// Blob paths changed by `commit` relative to its first parent, or
    /// every blob in its tree for a root commit.
    ///
    /// Depth first, with each directory's entries in byte order of their
    /// names. This differs from git's tree order, which sorts a directory
    /// as if its name ended in `/`.
    pub async fn diff_commit(
        &self,
        repo: &str,
        fs: &dyn Filesystem,
        dir: &str,
        commit: ObjectId,
    ) -> Result<Vec<TreeDiffEntry>> {
        let info = self
            .plumbing
            .read_commit(fs, dir, commit)
            .await
            .with_context(|| format!("reading commit {} in '{repo}'", commit.short()))?;

        let walker = TreeWalker {
            plumbing: self.plumbing.as_ref(),
            fs,
            dir,
        };
        let mut changes = Vec::new();
        match info.parents.first() {
            None => {
                walker
                    .walk_one(info.tree, String::new(), ChangeKind::Added, &mut changes)
                    .await?;
            }
            Some(parent) => {
                let parent = self
                    .plumbing
                    .read_commit(fs, dir, *parent)
                    .await
                    .with_context(|| format!("reading parent {} in '{repo}'", parent.short()))?;
                walker
                    .walk_pair(Some(info.tree), Some(parent.tree), String::new(), &mut changes)
                    .await?;
            }
        }
        debug!(repo, commit = %commit.short(), changes = changes.len(), "diffed commit");
        Ok(changes)
    }

    /// Commits reachable from HEAD, newest first.
    pub async fn log(
        &self,
        repo: &str,
        fs: &dyn Filesystem,
        dir: &str,
        depth: usize,
    ) -> Result<Vec<CommitSummary>> {
        self.plumbing
            .log(fs, dir, depth)
            .await
            .with_context(|| format!("log of repository '{repo}'"))
    }

    pub async fn head(&self, repo: &str, fs: &dyn Filesystem, dir: &str) -> Result<Option<ObjectId>> {
        self.plumbing
            .resolve_head(fs, dir)
            .await
            .with_context(|| format!("resolving HEAD of '{repo}'"))
    }

    /// Counters of `repo`'s cache; `None` until its first status call.
    pub async fn cache_stats(&self, repo: &str) -> Option<CacheStats> {
        let state = self.repos.lock().await.get(repo).cloned()?;
        let cache = state.cache.lock().await;
        Some(cache.stats())
    }
}

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Paired and single-sided tree traversal for [`GitStateEngine::diff_commit`].
struct TreeWalker<'a> {
    plumbing: &'a dyn GitPlumbing,
    fs: &'a dyn Filesystem,
    dir: &'a str,
}

#[derive(Default)]
struct Sides {
    new: Option<(ObjectId, TreeEntryKind)>,
    old: Option<(ObjectId, TreeEntryKind)>,
}

fn child_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn tree_id(side: Option<(ObjectId, TreeEntryKind)>) -> Option<ObjectId> {
    match side {
        Some((oid, TreeEntryKind::Tree)) => Some(oid),
        _ => None,
    }
}

fn leaf_id(side: Option<(ObjectId, TreeEntryKind)>) -> Option<ObjectId> {
    match side {
        Some((oid, TreeEntryKind::Blob | TreeEntryKind::Commit)) => Some(oid),
        _ => None,
    }
}

impl<'a> TreeWalker<'a> {
    /// Emit every leaf under `tree` with the same change kind.
    fn walk_one<'b>(
        &'b self,
        tree: ObjectId,
        prefix: String,
        change: ChangeKind,
        out: &'b mut Vec<TreeDiffEntry>,
    ) -> WalkFuture<'b>
    where
        'a: 'b,
    {
        Box::pin(async move {
            let mut entries = self.plumbing.read_tree(self.fs, self.dir, tree).await?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in entries {
                let path = child_path(&prefix, &entry.name);
                match entry.kind {
                    TreeEntryKind::Tree => self.walk_one(entry.oid, path, change, out).await?,
                    TreeEntryKind::Blob | TreeEntryKind::Commit => {
                        out.push(TreeDiffEntry { path, change })
                    }
                }
            }
            Ok(())
        })
    }

    /// Walk two trees side by side, descending only where they differ.
    fn walk_pair<'b>(
        &'b self,
        new: Option<ObjectId>,
        old: Option<ObjectId>,
        prefix: String,
        out: &'b mut Vec<TreeDiffEntry>,
    ) -> WalkFuture<'b>
    where
        'a: 'b,
    {
        Box::pin(async move {
            if new == old {
                return Ok(());
            }
            let mut merged: BTreeMap<String, Sides> = BTreeMap::new();
            if let Some(tree) = new {
                for entry in self.plumbing.read_tree(self.fs, self.dir, tree).await? {
                    merged.entry(entry.name).or_default().new = Some((entry.oid, entry.kind));
                }
            }
            if let Some(tree) = old {
                for entry in self.plumbing.read_tree(self.fs, self.dir, tree).await? {
                    merged.entry(entry.name).or_default().old = Some((entry.oid, entry.kind));
                }
            }

            for (name, sides) in merged {
                if sides.new == sides.old {
                    continue;
                }
                let path = child_path(&prefix, &name);
                let (new_leaf, old_leaf) = (leaf_id(sides.new), leaf_id(sides.old));
                let (new_tree, old_tree) = (tree_id(sides.new), tree_id(sides.old));

                match (new_leaf, old_leaf) {
                    (Some(_), Some(_)) => out.push(TreeDiffEntry {
                        path: path.clone(),
                        change: ChangeKind::Modified,
                    }),
                    (Some(_), None) => out.push(TreeDiffEntry {
                        path: path.clone(),
                        change: ChangeKind::Added,
                    }),
                    (None, Some(_)) => out.push(TreeDiffEntry {
                        path: path.clone(),
                        change: ChangeKind::Removed,
                    }),
                    (None, None) => {}
                }

                match (new_tree, old_tree) {
                    (Some(_), Some(_)) => self.walk_pair(new_tree, old_tree, path, out).await?,
                    (Some(tree), None) => self.walk_one(tree, path, ChangeKind::Added, out).await?,
                    (None, Some(tree)) => self.walk_one(tree, path, ChangeKind::Removed, out).await?,
                    (None, None) => {}
                }
            }
            Ok(())
        })
    }
}
