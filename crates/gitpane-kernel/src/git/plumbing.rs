//! The git plumbing seam and the records that cross it.
//!
//! The engine never touches git objects itself. It drives an implementation
//! of [`GitPlumbing`], which in turn reaches the repository through the
//! [`Filesystem`] it is handed.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use sha1::{Digest, Sha1};

use super::cache::StatusCache;
use crate::error::{Error, Result};
use crate::vfs::Filesystem;

/// A 20-byte SHA-1 git object id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Id from raw bytes, which must be exactly 20 long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        <[u8; 20]>::try_from(bytes)
            .map(Self)
            .map_err(|_| Error::Plumbing(format!("object id must be 20 bytes, got {}", bytes.len())))
    }

    /// Parse a full 40-character hex id.
    pub fn from_hex(text: &str) -> Result<Self> {
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(text, &mut bytes)
            .map_err(|e| Error::Plumbing(format!("invalid object id {text:?}: {e}")))?;
        Ok(Self(bytes))
    }

    /// Id git assigns to an object of `kind` with this payload.
    pub fn hash_object(kind: &str, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("{kind} {}\0", data.len()).as_bytes());
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Id of a blob holding `data`.
    pub fn for_blob(data: &[u8]) -> Self {
        Self::hash_object("blob", data)
    }

    /// The conventional 7-character abbreviation.
    pub fn short(&self) -> String {
        let mut hex = self.to_string();
        hex.truncate(7);
        hex
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Commit author identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            name: "Git Viewer User".to_string(),
            email: "user@gitviewer.app".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadState {
    Absent,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkdirState {
    Absent,
    /// Present and identical to HEAD.
    Present,
    /// Present and different from HEAD (including files HEAD lacks).
    Modified,
}

impl WorkdirState {
    pub fn is_present(self) -> bool {
        !matches!(self, Self::Absent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Absent,
    /// Index matches HEAD.
    Head,
    /// Index matches the working tree.
    Workdir,
    /// Index matches neither.
    Diverged,
}

/// One row of the HEAD / working tree / index comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub path: String,
    pub head: HeadState,
    pub workdir: WorkdirState,
    pub stage: StageState,
}

impl StatusRow {
    /// Derive a row from the three object ids seen for `path`.
    pub fn from_ids(
        path: impl Into<String>,
        head: Option<ObjectId>,
        workdir: Option<ObjectId>,
        index: Option<ObjectId>,
    ) -> Self {
        let head_state = match head {
            Some(_) => HeadState::Present,
            None => HeadState::Absent,
        };
        let workdir_state = match workdir {
            None => WorkdirState::Absent,
            Some(id) if head == Some(id) => WorkdirState::Present,
            Some(_) => WorkdirState::Modified,
        };
        let stage = match index {
            None => StageState::Absent,
            Some(id) if head == Some(id) => StageState::Head,
            Some(id) if workdir == Some(id) => StageState::Workdir,
            Some(_) => StageState::Diverged,
        };
        Self {
            path: path.into(),
            head: head_state,
            workdir: workdir_state,
            stage,
        }
    }

    /// Short two-column marker (`A`, `M`, `D`, or blank), like `git status -s`.
    pub fn marker(&self) -> &'static str {
        match (self.head, self.workdir) {
            (HeadState::Absent, WorkdirState::Modified) => "A",
            (HeadState::Present, WorkdirState::Modified) => "M",
            (HeadState::Present, WorkdirState::Absent) => "D",
            _ => " ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeEntryKind {
    Blob,
    Tree,
    /// A gitlink (submodule) entry.
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub oid: ObjectId,
    pub kind: TreeEntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub oid: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub oid: ObjectId,
    pub message: String,
    pub author: Signature,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

/// The external git engine. Every method receives the filesystem and the
/// repository directory within it. Implementations reach the repository
/// only through `fs`, by its methods or by its [`real_path`] mapping.
///
/// [`real_path`]: Filesystem::real_path
#[async_trait]
pub trait GitPlumbing: Send + Sync {
    /// Three-way status of every path known to HEAD, the index or the
    /// working tree. Must consult `cache` so unchanged files are not re-read.
    async fn status_matrix(
        &self,
        fs: &dyn Filesystem,
        dir: &str,
        cache: &mut StatusCache,
    ) -> Result<Vec<StatusRow>>;

    /// Stage working-tree content for all `paths` in one batch.
    async fn add(&self, fs: &dyn Filesystem, dir: &str, paths: &[String]) -> Result<()>;

    /// Drop all `paths` from the index in one batch.
    async fn remove(&self, fs: &dyn Filesystem, dir: &str, paths: &[String]) -> Result<()>;

    /// Commit the index on top of HEAD.
    async fn commit(
        &self,
        fs: &dyn Filesystem,
        dir: &str,
        author: &Signature,
        message: &str,
    ) -> Result<ObjectId>;

    async fn read_commit(&self, fs: &dyn Filesystem, dir: &str, oid: ObjectId) -> Result<CommitInfo>;

    async fn read_tree(&self, fs: &dyn Filesystem, dir: &str, oid: ObjectId) -> Result<Vec<TreeEntry>>;

    /// Up to `depth` commits reachable from HEAD, newest first.
    async fn log(&self, fs: &dyn Filesystem, dir: &str, depth: usize) -> Result<Vec<CommitSummary>>;

    /// The commit HEAD points at, `None` on an unborn branch.
    async fn resolve_head(&self, fs: &dyn Filesystem, dir: &str) -> Result<Option<ObjectId>>;
}
