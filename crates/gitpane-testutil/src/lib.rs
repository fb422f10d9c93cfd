//! Test utilities for gitpane.
//!
//! [`MemoryPlumbing`] is a [`GitPlumbing`] whose objects, index and HEAD
//! live in memory. Working-tree content is read through the
//! [`Filesystem`] under test, so it runs against any backend. Every
//! add/remove batch is recorded and any step can be made to fail once.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use gitpane_kernel::error::{Error, Result};
use gitpane_kernel::git::{
    hash_workdir_file, CommitInfo, CommitSummary, GitPlumbing, ObjectId, Signature, StatusCache,
    StatusRow, TreeEntry, TreeEntryKind,
};
use gitpane_kernel::path;
use gitpane_kernel::tree::list_files;
use gitpane_kernel::vfs::{Filesystem, MkdirOptions};

/// File inside `.git` naming which in-memory repository a directory holds.
const MARKER: &str = ".git/memory-repo";

/// Epoch seconds of the first commit; later ones tick by one.
const FIRST_TIMESTAMP: i64 = 1_700_000_000;

/// A plumbing step, for call records and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Add,
    Remove,
    Commit,
}

/// One recorded plumbing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Add(Vec<String>),
    Remove(Vec<String>),
    Commit(String),
}

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit {
        tree: ObjectId,
        parents: Vec<ObjectId>,
        message: String,
        author: Signature,
        timestamp: i64,
    },
}

#[derive(Debug, Default)]
struct Repo {
    objects: HashMap<ObjectId, Object>,
    index: BTreeMap<String, ObjectId>,
    head: Option<ObjectId>,
}

enum Node {
    Blob(ObjectId),
    Dir(BTreeMap<String, Node>),
}

impl Repo {
    fn insert(&mut self, object: Object) -> ObjectId {
        let oid = match &object {
            Object::Blob(data) => ObjectId::for_blob(data),
            Object::Tree(entries) => {
                let mut body = String::new();
                for entry in entries {
                    let _ = writeln!(body, "{:?} {} {}", entry.kind, entry.oid, entry.name);
                }
                ObjectId::hash_object("tree", body.as_bytes())
            }
            Object::Commit {
                tree,
                parents,
                message,
                author,
                timestamp,
            } => {
                let mut body = format!("tree {tree}\n");
                for parent in parents {
                    let _ = writeln!(body, "parent {parent}");
                }
                let _ = write!(
                    body,
                    "author {} <{}> {timestamp}\n\n{message}",
                    author.name, author.email
                );
                ObjectId::hash_object("commit", body.as_bytes())
            }
        };
        self.objects.insert(oid, object);
        oid
    }

    fn commit_tree(&self, oid: ObjectId) -> Result<ObjectId> {
        match self.objects.get(&oid) {
            Some(Object::Commit { tree, .. }) => Ok(*tree),
            _ => Err(Error::Plumbing(format!("no commit {oid}"))),
        }
    }

    fn tree(&self, oid: ObjectId) -> Result<&[TreeEntry]> {
        match self.objects.get(&oid) {
            Some(Object::Tree(entries)) => Ok(entries),
            _ => Err(Error::Plumbing(format!("no tree {oid}"))),
        }
    }

    /// Every blob reachable from the HEAD tree, by path.
    fn head_files(&self) -> Result<BTreeMap<String, ObjectId>> {
        let mut files = BTreeMap::new();
        if let Some(head) = self.head {
            self.flatten(self.commit_tree(head)?, "", &mut files)?;
        }
        Ok(files)
    }

    fn flatten(
        &self,
        tree: ObjectId,
        prefix: &str,
        files: &mut BTreeMap<String, ObjectId>,
    ) -> Result<()> {
        for entry in self.tree(tree)? {
            let child = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            match entry.kind {
                TreeEntryKind::Tree => self.flatten(entry.oid, &child, files)?,
                TreeEntryKind::Blob | TreeEntryKind::Commit => {
                    files.insert(child, entry.oid);
                }
            }
        }
        Ok(())
    }

    /// Write tree objects for the whole index and return the root id.
    fn write_index_tree(&mut self) -> ObjectId {
        let root = nest(self.index.iter().map(|(p, oid)| (p.as_str(), *oid)).collect());
        self.write_tree(root)
    }

    fn write_tree(&mut self, nodes: BTreeMap<String, Node>) -> ObjectId {
        let entries = nodes
            .into_iter()
            .map(|(name, node)| match node {
                Node::Blob(oid) => TreeEntry {
                    name,
                    oid,
                    kind: TreeEntryKind::Blob,
                },
                Node::Dir(children) => TreeEntry {
                    name,
                    oid: self.write_tree(children),
                    kind: TreeEntryKind::Tree,
                },
            })
            .collect();
        self.insert(Object::Tree(entries))
    }
}

/// Group `files` by their first path segment.
fn nest(files: Vec<(&str, ObjectId)>) -> BTreeMap<String, Node> {
    let mut nodes = BTreeMap::new();
    let mut dirs: BTreeMap<&str, Vec<(&str, ObjectId)>> = BTreeMap::new();
    for (file, oid) in files {
        match file.split_once('/') {
            Some((dir, rest)) => dirs.entry(dir).or_default().push((rest, oid)),
            None => {
                nodes.insert(file.to_string(), Node::Blob(oid));
            }
        }
    }
    for (dir, children) in dirs {
        nodes.insert(dir.to_string(), Node::Dir(nest(children)));
    }
    nodes
}

/// In-memory git plumbing that records its calls.
#[derive(Default)]
pub struct MemoryPlumbing {
    repos: Mutex<Vec<Repo>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<BTreeSet<Step>>,
    clock: Mutex<i64>,
}

impl MemoryPlumbing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `dir` a repository with an unborn `main` branch.
    pub async fn init(&self, fs: &dyn Filesystem, dir: &str) -> Result<()> {
        let git_dir = path::join([dir, ".git"]);
        match fs.mkdir(&git_dir, MkdirOptions::recursive()).await {
            Ok(()) => {}
            Err(e) if e.io_kind() == Some(std::io::ErrorKind::AlreadyExists) => {}
            Err(e) => return Err(e),
        }
        fs.write_file(&path::join([git_dir.as_str(), "HEAD"]), b"ref: refs/heads/main\n")
            .await?;

        let mut repos = self.repos.lock().await;
        let id = repos.len();
        repos.push(Repo::default());
        fs.write_file(&path::join([dir, MARKER]), id.to_string().as_bytes())
            .await?;
        debug!(dir, id, "initialized in-memory repository");
        Ok(())
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn add_calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                Call::Add(paths) => Some(paths.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn remove_calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                Call::Remove(paths) => Some(paths.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    /// Fail the next `step`, once.
    pub async fn fail_next(&self, step: Step) {
        self.failures.lock().await.insert(step);
    }

    /// Paths currently staged in the repository at `dir`.
    pub async fn index(&self, fs: &dyn Filesystem, dir: &str) -> Result<Vec<String>> {
        let id = repo_id(fs, dir).await?;
        let repos = self.repos.lock().await;
        Ok(repo(&repos, id)?.index.keys().cloned().collect())
    }

    async fn check(&self, step: Step) -> Result<()> {
        if self.failures.lock().await.remove(&step) {
            return Err(Error::Plumbing(format!("injected {step:?} failure")));
        }
        Ok(())
    }

    async fn record(&self, call: Call) {
        self.calls.lock().await.push(call);
    }
}

async fn repo_id(fs: &dyn Filesystem, dir: &str) -> Result<usize> {
    let marker = path::join([dir, MARKER]);
    let text = fs
        .read_to_string(&marker)
        .await
        .map_err(|_| Error::Plumbing(format!("not a repository: {dir}")))?;
    text.trim()
        .parse()
        .map_err(|_| Error::Plumbing(format!("corrupt repository marker in {dir}")))
}

fn repo(repos: &[Repo], id: usize) -> Result<&Repo> {
    repos
        .get(id)
        .ok_or_else(|| Error::Plumbing(format!("repository {id} is gone")))
}

fn repo_mut(repos: &mut [Repo], id: usize) -> Result<&mut Repo> {
    repos
        .get_mut(id)
        .ok_or_else(|| Error::Plumbing(format!("repository {id} is gone")))
}

#[async_trait]
impl GitPlumbing for MemoryPlumbing {
    async fn status_matrix(
        &self,
        fs: &dyn Filesystem,
        dir: &str,
        cache: &mut StatusCache,
    ) -> Result<Vec<StatusRow>> {
        let id = repo_id(fs, dir).await?;
        let (head, index) = {
            let repos = self.repos.lock().await;
            let repo = repo(&repos, id)?;
            (repo.head_files()?, repo.index.clone())
        };

        let mut workdir = BTreeMap::new();
        for file in list_files(fs, dir).await? {
            if let Some(oid) = hash_workdir_file(fs, dir, &file, cache).await? {
                workdir.insert(file, oid);
            }
        }
        cache.retain(|file| workdir.contains_key(file));

        let paths: BTreeSet<&String> = head.keys().chain(index.keys()).chain(workdir.keys()).collect();
        Ok(paths
            .into_iter()
            .map(|p| {
                StatusRow::from_ids(
                    p.as_str(),
                    head.get(p).copied(),
                    workdir.get(p).copied(),
                    index.get(p).copied(),
                )
            })
            .collect())
    }

    async fn add(&self, fs: &dyn Filesystem, dir: &str, paths: &[String]) -> Result<()> {
        self.record(Call::Add(paths.to_vec())).await;
        self.check(Step::Add).await?;
        let id = repo_id(fs, dir).await?;

        let mut blobs = Vec::with_capacity(paths.len());
        for file in paths {
            let data = fs.read(&path::join([dir, file.as_str()])).await?;
            blobs.push((file.clone(), data));
        }

        let mut repos = self.repos.lock().await;
        let repo = repo_mut(&mut repos, id)?;
        for (file, data) in blobs {
            let oid = repo.insert(Object::Blob(data));
            repo.index.insert(file, oid);
        }
        Ok(())
    }

    async fn remove(&self, fs: &dyn Filesystem, dir: &str, paths: &[String]) -> Result<()> {
        self.record(Call::Remove(paths.to_vec())).await;
        self.check(Step::Remove).await?;
        let id = repo_id(fs, dir).await?;

        let mut repos = self.repos.lock().await;
        let repo = repo_mut(&mut repos, id)?;
        for file in paths {
            repo.index.remove(file);
        }
        Ok(())
    }

    async fn commit(
        &self,
        fs: &dyn Filesystem,
        dir: &str,
        author: &Signature,
        message: &str,
    ) -> Result<ObjectId> {
        self.record(Call::Commit(message.to_string())).await;
        self.check(Step::Commit).await?;
        let id = repo_id(fs, dir).await?;

        let timestamp = {
            let mut clock = self.clock.lock().await;
            let now = FIRST_TIMESTAMP + *clock;
            *clock += 1;
            now
        };

        let mut repos = self.repos.lock().await;
        let repo = repo_mut(&mut repos, id)?;
        let tree = repo.write_index_tree();
        let parents = repo.head.into_iter().collect();
        let commit = repo.insert(Object::Commit {
            tree,
            parents,
            message: message.to_string(),
            author: author.clone(),
            timestamp,
        });
        repo.head = Some(commit);
        debug!(dir, %commit, "committed");
        Ok(commit)
    }

    async fn read_commit(&self, fs: &dyn Filesystem, dir: &str, oid: ObjectId) -> Result<CommitInfo> {
        let id = repo_id(fs, dir).await?;
        let repos = self.repos.lock().await;
        match repo(&repos, id)?.objects.get(&oid) {
            Some(Object::Commit { tree, parents, .. }) => Ok(CommitInfo {
                oid,
                tree: *tree,
                parents: parents.clone(),
            }),
            _ => Err(Error::Plumbing(format!("no commit {oid}"))),
        }
    }

    async fn read_tree(&self, fs: &dyn Filesystem, dir: &str, oid: ObjectId) -> Result<Vec<TreeEntry>> {
        let id = repo_id(fs, dir).await?;
        let repos = self.repos.lock().await;
        Ok(repo(&repos, id)?.tree(oid)?.to_vec())
    }

    async fn log(&self, fs: &dyn Filesystem, dir: &str, depth: usize) -> Result<Vec<CommitSummary>> {
        let id = repo_id(fs, dir).await?;
        let repos = self.repos.lock().await;
        let repo = repo(&repos, id)?;

        let mut summaries = Vec::new();
        let mut next = repo.head;
        while let Some(oid) = next {
            if summaries.len() >= depth {
                break;
            }
            let Some(Object::Commit {
                parents,
                message,
                author,
                timestamp,
                ..
            }) = repo.objects.get(&oid)
            else {
                return Err(Error::Plumbing(format!("no commit {oid}")));
            };
            summaries.push(CommitSummary {
                oid,
                message: message.clone(),
                author: author.clone(),
                timestamp: *timestamp,
            });
            next = parents.first().copied();
        }
        Ok(summaries)
    }

    async fn resolve_head(&self, fs: &dyn Filesystem, dir: &str) -> Result<Option<ObjectId>> {
        let id = repo_id(fs, dir).await?;
        let repos = self.repos.lock().await;
        Ok(repo(&repos, id)?.head)
    }
}
