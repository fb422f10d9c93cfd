//! Application-private persistent virtual filesystem.
//!
//! One store is shared by every persistent repository; each lives under
//! `/<name>`. Entries are kept in memory and written out as a JSON snapshot
//! (file data base64-encoded) on [`flush`](Filesystem::flush). Semantics are
//! POSIX-like: writes and non-recursive `mkdir` need an existing parent.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::{now_millis, Contents, Encoding, FileStat, Filesystem, MkdirOptions};
use crate::error::{Error, Result};
use crate::path;

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, modified: u64 },
    Directory { modified: u64 },
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum SnapshotEntry {
    File {
        path: String,
        modified: u64,
        data: String,
    },
    Directory {
        path: String,
        modified: u64,
    },
}

/// Path-keyed virtual filesystem with optional on-disk snapshots.
///
/// Keys are normalized relative paths; the root is `""` and always exists.
#[derive(Debug)]
pub struct PersistentStore {
    entries: RwLock<BTreeMap<String, Entry>>,
    snapshot: Option<PathBuf>,
}

impl Default for PersistentStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn fresh_entries() -> BTreeMap<String, Entry> {
    let mut entries = BTreeMap::new();
    entries.insert(
        String::new(),
        Entry::Directory {
            modified: now_millis(),
        },
    );
    entries
}

fn is_child_of(key: &str, parent: &str) -> bool {
    if parent.is_empty() {
        return !key.is_empty() && !key.contains('/');
    }
    key.strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|name| !name.is_empty() && !name.contains('/'))
}

fn is_under(key: &str, dir: &str) -> bool {
    key.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

impl PersistentStore {
    /// A store that never touches the host.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(fresh_entries()),
            snapshot: None,
        }
    }

    /// Load the snapshot at `snapshot`, or start empty if it does not exist.
    /// Later flushes write back to the same location.
    #[cfg(feature = "native")]
    pub async fn open(snapshot: impl Into<PathBuf>) -> Result<Self> {
        let snapshot = snapshot.into();
        let shown = snapshot.display().to_string();
        let entries = match tokio::fs::read(&snapshot).await {
            Ok(raw) => Self::decode_snapshot(&raw).map_err(|e| e.context(format!("loading {shown}")))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => fresh_entries(),
            Err(e) => return Err(Error::io("open snapshot", shown, e)),
        };
        tracing::info!(snapshot = %shown, entries = entries.len(), "opened persistent store");
        Ok(Self {
            entries: RwLock::new(entries),
            snapshot: Some(snapshot),
        })
    }

    pub fn snapshot_path(&self) -> Option<&PathBuf> {
        self.snapshot.as_ref()
    }

    fn decode_snapshot(raw: &[u8]) -> Result<BTreeMap<String, Entry>> {
        let snapshot: Snapshot = serde_json::from_slice(raw)
            .map_err(|e| Error::Config(format!("malformed store snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Config(format!(
                "unsupported store snapshot version {}",
                snapshot.version
            )));
        }
        let mut entries = fresh_entries();
        for entry in snapshot.entries {
            match entry {
                SnapshotEntry::File { path: key, modified, data } => {
                    let data = BASE64
                        .decode(data)
                        .map_err(|e| Error::Config(format!("bad file data for {key}: {e}")))?;
                    entries.insert(path::normalize(&key), Entry::File { data, modified });
                }
                SnapshotEntry::Directory { path: key, modified } => {
                    entries.insert(path::normalize(&key), Entry::Directory { modified });
                }
            }
        }
        Ok(entries)
    }

    async fn encode_snapshot(&self) -> Result<Vec<u8>> {
        let entries = self.entries.read().await;
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries: entries
                .iter()
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, entry)| match entry {
                    Entry::File { data, modified } => SnapshotEntry::File {
                        path: key.clone(),
                        modified: *modified,
                        data: BASE64.encode(data),
                    },
                    Entry::Directory { modified } => SnapshotEntry::Directory {
                        path: key.clone(),
                        modified: *modified,
                    },
                })
                .collect(),
        };
        serde_json::to_vec(&snapshot)
            .map_err(|e| Error::io("flush", "snapshot", io::Error::other(e)))
    }

    fn require_parent(entries: &BTreeMap<String, Entry>, key: &str) -> Result<()> {
        let parent = match path::split_parent(key) {
            Some((parent, _)) => parent,
            None => return Ok(()),
        };
        match entries.get(&parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(Error::io(
                "resolve",
                parent,
                io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
            )),
            None => Err(Error::not_found(parent)),
        }
    }
}

#[async_trait]
impl Filesystem for PersistentStore {
    async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let key = path::normalize(path);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => {
                return Err(Error::io(
                    "readdir",
                    path,
                    io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
                ));
            }
            None => return Err(Error::not_found(path)),
        }
        Ok(entries
            .keys()
            .filter(|k| is_child_of(k, &key))
            .map(|k| path::file_name(k).to_string())
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let key = path::normalize(path);
        match self.entries.read().await.get(&key) {
            Some(Entry::File { data, modified }) => Ok(FileStat::file(data.len() as u64, *modified)),
            Some(Entry::Directory { modified }) => Ok(FileStat::directory(*modified)),
            None => Err(Error::not_found(path)),
        }
    }

    async fn read_file(&self, path: Option<&str>, encoding: Encoding) -> Result<Option<Contents>> {
        let Some(path) = path else {
            return Ok(None);
        };
        let key = path::normalize(path);
        match self.entries.read().await.get(&key) {
            Some(Entry::File { data, .. }) => Ok(Some(Contents::decode(data.clone(), encoding))),
            Some(Entry::Directory { .. }) => Err(Error::io(
                "readFile",
                path,
                io::Error::new(io::ErrorKind::IsADirectory, "is a directory"),
            )),
            None => Err(Error::not_found(path)),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let key = path::normalize(path);
        let mut entries = self.entries.write().await;
        Self::require_parent(&entries, &key)?;
        if let Some(Entry::Directory { .. }) = entries.get(&key) {
            return Err(Error::io(
                "writeFile",
                path,
                io::Error::new(io::ErrorKind::IsADirectory, "is a directory"),
            ));
        }
        let modified = match entries.get(&key) {
            Some(Entry::File { modified, .. }) => now_millis().max(modified + 1),
            _ => now_millis(),
        };
        entries.insert(
            key,
            Entry::File {
                data: data.to_vec(),
                modified,
            },
        );
        Ok(())
    }

    async fn mkdir(&self, path: &str, options: MkdirOptions) -> Result<()> {
        let key = path::normalize(path);
        let mut entries = self.entries.write().await;

        match entries.get(&key) {
            Some(Entry::Directory { .. }) => return Ok(()),
            Some(Entry::File { .. }) => {
                return Err(Error::io(
                    "mkdir",
                    path,
                    io::Error::new(io::ErrorKind::AlreadyExists, "file exists"),
                ));
            }
            None => {}
        }

        if !options.recursive {
            Self::require_parent(&entries, &key)?;
            entries.insert(key, Entry::Directory { modified: now_millis() });
            return Ok(());
        }

        let mut current = String::new();
        for segment in path::segments(&key) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            match entries.get(&current) {
                Some(Entry::Directory { .. }) => {}
                Some(Entry::File { .. }) => {
                    return Err(Error::io(
                        "mkdir",
                        current,
                        io::Error::new(io::ErrorKind::AlreadyExists, "file exists"),
                    ));
                }
                None => {
                    entries.insert(current.clone(), Entry::Directory { modified: now_millis() });
                }
            }
        }
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let key = path::normalize(path);
        if key.is_empty() {
            return Err(Error::io(
                "rmdir",
                path,
                io::Error::new(io::ErrorKind::PermissionDenied, "cannot remove root directory"),
            ));
        }
        let mut entries = self.entries.write().await;
        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => {
                return Err(Error::io(
                    "rmdir",
                    path,
                    io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
                ));
            }
            None => return Err(Error::not_found(path)),
        }
        entries.retain(|k, _| k != &key && !is_under(k, &key));
        Ok(())
    }

    async fn unlink(&self, path: &str) -> Result<()> {
        let key = path::normalize(path);
        let mut entries = self.entries.write().await;
        match entries.get(&key) {
            Some(Entry::File { .. }) => {
                entries.remove(&key);
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(Error::io(
                "unlink",
                path,
                io::Error::new(io::ErrorKind::IsADirectory, "is a directory"),
            )),
            None => Err(Error::not_found(path)),
        }
    }

    /// Native move of a file or a whole subtree.
    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_key = path::normalize(from);
        let to_key = path::normalize(to);
        if from_key.is_empty() {
            return Err(Error::io(
                "rename",
                from,
                io::Error::new(io::ErrorKind::PermissionDenied, "cannot rename root directory"),
            ));
        }
        if is_under(&to_key, &from_key) {
            return Err(Error::io(
                "rename",
                to,
                io::Error::new(io::ErrorKind::InvalidInput, "cannot move a directory into itself"),
            ));
        }

        let mut entries = self.entries.write().await;
        let entry = entries.get(&from_key).cloned().ok_or_else(|| Error::not_found(from))?;
        Self::require_parent(&entries, &to_key)?;

        match (&entry, entries.get(&to_key)) {
            (Entry::File { .. }, Some(Entry::Directory { .. })) => {
                return Err(Error::io(
                    "rename",
                    to,
                    io::Error::new(io::ErrorKind::IsADirectory, "destination is a directory"),
                ));
            }
            (Entry::Directory { .. }, Some(Entry::File { .. })) => {
                return Err(Error::io(
                    "rename",
                    to,
                    io::Error::new(io::ErrorKind::NotADirectory, "destination is not a directory"),
                ));
            }
            _ => {}
        }

        let moved: Vec<(String, Entry)> = entries
            .iter()
            .filter(|(k, _)| is_under(k, &from_key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (old, child) in moved {
            entries.remove(&old);
            let suffix = &old[from_key.len()..];
            entries.insert(format!("{to_key}{suffix}"), child);
        }
        entries.remove(&from_key);
        entries.insert(to_key, entry);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let encoded = self.encode_snapshot().await?;
        write_snapshot(snapshot, &encoded).await?;
        debug!(snapshot = %snapshot.display(), bytes = encoded.len(), "flushed persistent store");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "persistent"
    }
}

#[cfg(feature = "native")]
async fn write_snapshot(target: &std::path::Path, encoded: &[u8]) -> Result<()> {
    let display = target.display().to_string();
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io("flush", display.clone(), e))?;
    }
    let swap = target.with_extension("json.tmp");
    tokio::fs::write(&swap, encoded)
        .await
        .map_err(|e| Error::io("flush", display.clone(), e))?;
    tokio::fs::rename(&swap, target)
        .await
        .map_err(|e| Error::io("flush", display, e))
}

#[cfg(not(feature = "native"))]
async fn write_snapshot(target: &std::path::Path, _encoded: &[u8]) -> Result<()> {
    Err(Error::unsupported(format!(
        "flush to {}: host storage requires the `native` feature",
        target.display()
    )))
}
