//! git2-backed plumbing for backends that map onto host directories.
//!
//! Objects, refs and the index are handled by libgit2 on the backend's real
//! path. The working tree is still enumerated and hashed through the
//! [`Filesystem`] so the status cache decides what gets re-read.
//! A `Repository` is opened per call inside synchronous helpers. The one
//! kept for ignore checks during a status walk sits behind a mutex and is
//! only touched from synchronous code.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use git2::{ErrorCode, ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};
use tracing::{debug, warn};

use super::cache::{hash_workdir_file, StatusCache};
use super::plumbing::{
    CommitInfo, CommitSummary, GitPlumbing, ObjectId, Signature, StatusRow, TreeEntry,
    TreeEntryKind,
};
use crate::error::{Error, Result};
use crate::tree::list_files_except;
use crate::vfs::Filesystem;

fn git_error(err: git2::Error) -> Error {
    Error::Plumbing(err.message().to_string())
}

fn object_id(oid: Oid) -> Result<ObjectId> {
    ObjectId::from_slice(oid.as_bytes())
}

fn git_oid(id: ObjectId) -> Result<Oid> {
    Oid::from_bytes(id.as_bytes()).map_err(git_error)
}

fn is_unborn(err: &git2::Error) -> bool {
    matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound)
}

/// Plumbing over libgit2.
#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Plumbing;

impl Git2Plumbing {
    pub fn new() -> Self {
        Self
    }

    /// Host path of the repository, initializing the backend if needed.
    async fn root(&self, fs: &dyn Filesystem, dir: &str) -> Result<PathBuf> {
        let stat = fs.stat(dir).await?;
        if !stat.is_directory {
            return Err(Error::Plumbing(format!("repository root is not a directory: {dir}")));
        }
        fs.real_path(dir).ok_or_else(|| {
            Error::unsupported(format!(
                "{} backend has no host path for git2 plumbing",
                fs.backend_name()
            ))
        })
    }
}

fn open(root: &Path) -> Result<Repository> {
    Repository::open(root).map_err(git_error)
}

/// Blob ids of HEAD's tree and of the index, keyed by path.
fn head_and_index(root: &Path) -> Result<(BTreeMap<String, ObjectId>, BTreeMap<String, ObjectId>)> {
    let repo = open(root)?;

    let mut head = BTreeMap::new();
    match repo.head() {
        Ok(reference) => {
            let tree = reference.peel_to_tree().map_err(git_error)?;
            let mut failure = None;
            let walked = tree.walk(TreeWalkMode::PreOrder, |parent, entry| {
                if entry.kind() == Some(ObjectType::Blob) {
                    let name = String::from_utf8_lossy(entry.name_bytes());
                    match object_id(entry.id()) {
                        Ok(id) => {
                            head.insert(format!("{parent}{name}"), id);
                        }
                        Err(e) => {
                            failure = Some(e);
                            return TreeWalkResult::Abort;
                        }
                    }
                }
                TreeWalkResult::Ok
            });
            if let Some(e) = failure {
                return Err(e);
            }
            walked.map_err(git_error)?;
        }
        Err(e) if is_unborn(&e) => {}
        Err(e) => return Err(git_error(e)),
    }

    let mut index = BTreeMap::new();
    for entry in repo.index().map_err(git_error)?.iter() {
        let path = String::from_utf8_lossy(&entry.path).into_owned();
        index.insert(path, object_id(entry.id)?);
    }
    Ok((head, index))
}

/// Whether any key of `map` lies under directory `dir`.
fn has_under(map: &BTreeMap<String, ObjectId>, dir: &str) -> bool {
    let prefix = format!("{dir}/");
    map.range(prefix.clone()..)
        .next()
        .is_some_and(|(path, _)| path.starts_with(&prefix))
}

fn stage(root: &Path, paths: &[String], remove: bool) -> Result<()> {
    let repo = open(root)?;
    let mut index = repo.index().map_err(git_error)?;
    for path in paths {
        let path = Path::new(path);
        if remove {
            index.remove_path(path).map_err(git_error)?;
        } else {
            index.add_path(path).map_err(git_error)?;
        }
    }
    index.write().map_err(git_error)
}

fn commit_index(root: &Path, author: &Signature, message: &str) -> Result<ObjectId> {
    let repo = open(root)?;
    let mut index = repo.index().map_err(git_error)?;
    let tree_oid = index.write_tree().map_err(git_error)?;
    let tree = repo.find_tree(tree_oid).map_err(git_error)?;
    let sig = git2::Signature::now(&author.name, &author.email).map_err(git_error)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit().map_err(git_error)?),
        Err(e) if is_unborn(&e) => None,
        Err(e) => return Err(git_error(e)),
    };
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let oid = repo
        .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .map_err(git_error)?;
    object_id(oid)
}

fn read_commit(root: &Path, id: ObjectId) -> Result<CommitInfo> {
    let repo = open(root)?;
    let commit = repo.find_commit(git_oid(id)?).map_err(git_error)?;
    Ok(CommitInfo {
        oid: id,
        tree: object_id(commit.tree_id())?,
        parents: commit.parent_ids().map(object_id).collect::<Result<_>>()?,
    })
}

fn read_tree(root: &Path, id: ObjectId) -> Result<Vec<TreeEntry>> {
    let repo = open(root)?;
    let tree = repo.find_tree(git_oid(id)?).map_err(git_error)?;
    tree.iter()
        .map(|entry| {
            let kind = match entry.kind() {
                Some(ObjectType::Tree) => TreeEntryKind::Tree,
                Some(ObjectType::Commit) => TreeEntryKind::Commit,
                _ => TreeEntryKind::Blob,
            };
            Ok(TreeEntry {
                name: String::from_utf8_lossy(entry.name_bytes()).into_owned(),
                oid: object_id(entry.id())?,
                kind,
            })
        })
        .collect()
}

fn log(root: &Path, depth: usize) -> Result<Vec<CommitSummary>> {
    let repo = open(root)?;
    if let Err(e) = repo.head() {
        return if is_unborn(&e) { Ok(Vec::new()) } else { Err(git_error(e)) };
    }

    let mut revwalk = repo.revwalk().map_err(git_error)?;
    revwalk.push_head().map_err(git_error)?;

    let mut entries = Vec::with_capacity(depth.min(256));
    for oid in revwalk.take(depth) {
        let oid = oid.map_err(git_error)?;
        let commit = repo.find_commit(oid).map_err(git_error)?;
        let author = commit.author();
        entries.push(CommitSummary {
            oid: object_id(oid)?,
            message: commit.message().unwrap_or("").to_string(),
            author: Signature {
                name: author.name().unwrap_or("").to_string(),
                email: author.email().unwrap_or("").to_string(),
            },
            timestamp: commit.time().seconds(),
        });
    }
    Ok(entries)
}

fn resolve_head(root: &Path) -> Result<Option<ObjectId>> {
    let repo = open(root)?;
    match repo.head() {
        Ok(head) => {
            let commit = head.peel_to_commit().map_err(git_error)?;
            Ok(Some(object_id(commit.id())?))
        }
        Err(e) if is_unborn(&e) => Ok(None),
        Err(e) => Err(git_error(e)),
    }
}

#[async_trait]
impl GitPlumbing for Git2Plumbing {
    async fn status_matrix(
        &self,
        fs: &dyn Filesystem,
        dir: &str,
        cache: &mut StatusCache,
    ) -> Result<Vec<StatusRow>> {
        let root = self.root(fs, dir).await?;
        let (head, index) = head_and_index(&root)?;

        // Untracked ignored paths are never read; ignored directories are not entered.
        let repo = Mutex::new(open(&root)?);
        let skip = |rel: &str, is_dir: bool| -> bool {
            let tracked = if is_dir {
                has_under(&head, rel) || has_under(&index, rel)
            } else {
                head.contains_key(rel) || index.contains_key(rel)
            };
            if tracked {
                return false;
            }
            let candidate = if is_dir { format!("{rel}/") } else { rel.to_string() };
            let Ok(repo) = repo.lock() else {
                return false;
            };
            match repo.is_path_ignored(Path::new(&candidate)) {
                Ok(ignored) => ignored,
                Err(e) => {
                    warn!(path = rel, error = %e.message(), "ignore check failed");
                    false
                }
            }
        };

        let mut workdir = BTreeMap::new();
        for rel in list_files_except(fs, dir, &skip).await? {
            if let Some(oid) = hash_workdir_file(fs, dir, &rel, cache).await? {
                workdir.insert(rel, oid);
            }
        }
        // Paths gone from the working tree, or ignored, since the last call.
        cache.retain(|rel| workdir.contains_key(rel));

        let paths: BTreeSet<&String> = head
            .keys()
            .chain(index.keys())
            .chain(workdir.keys())
            .collect();
        let rows: Vec<StatusRow> = paths
            .into_iter()
            .map(|p| {
                StatusRow::from_ids(
                    p.clone(),
                    head.get(p).copied(),
                    workdir.get(p).copied(),
                    index.get(p).copied(),
                )
            })
            .collect();
        debug!(dir, rows = rows.len(), "git2 status matrix");
        Ok(rows)
    }

    async fn add(&self, fs: &dyn Filesystem, dir: &str, paths: &[String]) -> Result<()> {
        let root = self.root(fs, dir).await?;
        stage(&root, paths, false)
    }

    async fn remove(&self, fs: &dyn Filesystem, dir: &str, paths: &[String]) -> Result<()> {
        let root = self.root(fs, dir).await?;
        stage(&root, paths, true)
    }

    async fn commit(
        &self,
        fs: &dyn Filesystem,
        dir: &str,
        author: &Signature,
        message: &str,
    ) -> Result<ObjectId> {
        let root = self.root(fs, dir).await?;
        commit_index(&root, author, message)
    }

    async fn read_commit(&self, fs: &dyn Filesystem, dir: &str, oid: ObjectId) -> Result<CommitInfo> {
        let root = self.root(fs, dir).await?;
        read_commit(&root, oid)
    }

    async fn read_tree(&self, fs: &dyn Filesystem, dir: &str, oid: ObjectId) -> Result<Vec<TreeEntry>> {
        let root = self.root(fs, dir).await?;
        read_tree(&root, oid)
    }

    async fn log(&self, fs: &dyn Filesystem, dir: &str, depth: usize) -> Result<Vec<CommitSummary>> {
        let root = self.root(fs, dir).await?;
        log(&root, depth)
    }

    async fn resolve_head(&self, fs: &dyn Filesystem, dir: &str) -> Result<Option<ObjectId>> {
        let root = self.root(fs, dir).await?;
        resolve_head(&root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::engine::{ChangeKind, GitStateEngine};
    use crate::git::plumbing::{HeadState, WorkdirState};
    use crate::vfs::{FilesystemAdapter, LocalDirectoryHandle};
    use std::sync::Arc;

    async fn setup() -> (tempfile::TempDir, FilesystemAdapter) {
        let tmp = tempfile::tempdir().unwrap();
        Repository::init(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("keep.txt"), "keep\n").unwrap();
        std::fs::write(tmp.path().join("drop.txt"), "drop\n").unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "*.log\n").unwrap();
        let handle = LocalDirectoryHandle::open(tmp.path()).await.unwrap();
        (tmp, FilesystemAdapter::native(handle))
    }

    #[tokio::test]
    async fn commit_status_and_diff_on_host_repository() {
        let (tmp, fs) = setup().await;
        let engine = GitStateEngine::new(Arc::new(Git2Plumbing::new()));

        let first = engine.stage_and_commit("r", &fs, ".", "initial", None).await.unwrap();
        assert_eq!(first.added, vec![".gitignore", "drop.txt", "keep.txt"]);

        std::fs::remove_file(tmp.path().join("drop.txt")).unwrap();
        std::fs::write(tmp.path().join("new.txt"), "new\n").unwrap();
        std::fs::write(tmp.path().join("debug.log"), "noise\n").unwrap();

        let rows = engine.compute_status("r", &fs, ".").await.unwrap();
        let find = |p: &str| rows.iter().find(|r| r.path == p).cloned();
        assert!(find("debug.log").is_none());
        let dropped = find("drop.txt").unwrap();
        assert_eq!((dropped.head, dropped.workdir), (HeadState::Present, WorkdirState::Absent));
        let added = find("new.txt").unwrap();
        assert_eq!((added.head, added.workdir), (HeadState::Absent, WorkdirState::Modified));
        assert_eq!(find("keep.txt").unwrap().workdir, WorkdirState::Present);

        let second = engine.stage_and_commit("r", &fs, ".", "second", None).await.unwrap();
        assert_eq!(second.added, vec!["new.txt"]);
        assert_eq!(second.removed, vec!["drop.txt"]);

        let diff = engine.diff_commit("r", &fs, ".", second.commit).await.unwrap();
        let changes: Vec<_> = diff.iter().map(|d| (d.path.as_str(), d.change)).collect();
        assert_eq!(
            changes,
            vec![("drop.txt", ChangeKind::Removed), ("new.txt", ChangeKind::Added)]
        );

        let log = engine.log("r", &fs, ".", 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "second");
        assert_eq!(log[0].author, Signature::default());
        assert_eq!(engine.head("r", &fs, ".").await.unwrap(), Some(second.commit));
    }

    #[tokio::test]
    async fn ignored_directories_are_neither_hashed_nor_cached() {
        let (tmp, fs) = setup().await;
        std::fs::write(tmp.path().join(".gitignore"), "*.log\ntarget/\n").unwrap();
        let build = tmp.path().join("target/debug");
        std::fs::create_dir_all(&build).unwrap();
        for i in 0..50 {
            std::fs::write(build.join(format!("obj{i}.o")), format!("{i}")).unwrap();
        }
        std::fs::write(tmp.path().join("debug.log"), "noise\n").unwrap();
        let engine = GitStateEngine::new(Arc::new(Git2Plumbing::new()));

        let rows = engine.compute_status("r", &fs, ".").await.unwrap();
        let paths: Vec<&str> = rows.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec![".gitignore", "drop.txt", "keep.txt"]);
        let stats = engine.cache_stats("r").await.unwrap();
        assert_eq!((stats.entries, stats.misses), (3, 3));
    }

    #[tokio::test]
    async fn tracked_files_under_ignored_directories_still_report() {
        let (tmp, fs) = setup().await;
        std::fs::create_dir(tmp.path().join("vendor")).unwrap();
        std::fs::write(tmp.path().join("vendor/pinned.txt"), "v1\n").unwrap();
        let engine = GitStateEngine::new(Arc::new(Git2Plumbing::new()));
        engine.stage_and_commit("r", &fs, ".", "initial", None).await.unwrap();

        std::fs::write(tmp.path().join(".gitignore"), "*.log\nvendor/\n").unwrap();
        std::fs::write(tmp.path().join("vendor/pinned.txt"), "v2\n").unwrap();
        std::fs::write(tmp.path().join("vendor/extra.txt"), "new\n").unwrap();

        let rows = engine.compute_status("r", &fs, ".").await.unwrap();
        let pinned = rows.iter().find(|r| r.path == "vendor/pinned.txt").unwrap();
        assert_eq!(pinned.workdir, WorkdirState::Modified);
        assert!(rows.iter().all(|r| r.path != "vendor/extra.txt"));
    }

    #[tokio::test]
    async fn persistent_backend_is_unsupported() {
        let fs = crate::vfs::PersistentStore::in_memory();
        let err = Git2Plumbing::new().resolve_head(&fs, "/").await.unwrap_err();
        assert_eq!(err.code(), "ENOTSUP");
    }
}
