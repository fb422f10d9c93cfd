//! Per-repository status cache.
//!
//! Maps a repository-relative path to the size, mtime and blob id last seen
//! for it. A path whose size and mtime are unchanged is not re-read.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use super::plumbing::ObjectId;
use crate::error::Result;
use crate::path;
use crate::vfs::{FileStat, Filesystem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CachedStat {
    size: u64,
    mtime_millis: u64,
    oid: ObjectId,
}

/// Hit/miss counters, for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct StatusCache {
    entries: HashMap<String, CachedStat>,
    hits: u64,
    misses: u64,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blob id recorded for `path` if `stat` still matches it.
    pub fn lookup(&mut self, path: &str, stat: &FileStat) -> Option<ObjectId> {
        match self.entries.get(path) {
            Some(cached) if cached.size == stat.size && cached.mtime_millis == stat.mtime_millis => {
                self.hits += 1;
                Some(cached.oid)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn record(&mut self, path: &str, stat: &FileStat, oid: ObjectId) {
        self.entries.insert(
            path.to_string(),
            CachedStat {
                size: stat.size,
                mtime_millis: stat.mtime_millis,
                oid,
            },
        );
    }

    pub fn forget(&mut self, path: &str) {
        self.entries.remove(path);
    }

    /// Drop every entry whose path fails `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|path, _| keep(path));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

/// Blob id of the working-tree file `rel` under `dir`, via the cache.
///
/// Returns `None` when the path is missing or is not a regular file.
pub async fn hash_workdir_file(
    fs: &dyn Filesystem,
    dir: &str,
    rel: &str,
    cache: &mut StatusCache,
) -> Result<Option<ObjectId>> {
    let full = path::join([dir, rel]);
    let stat = match fs.stat(&full).await {
        Ok(stat) if stat.is_file => stat,
        Ok(_) => {
            cache.forget(rel);
            return Ok(None);
        }
        Err(e) if e.is_not_found() => {
            cache.forget(rel);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if let Some(oid) = cache.lookup(rel, &stat) {
        trace!(path = rel, "status cache hit");
        return Ok(Some(oid));
    }
    let data = fs.read(&full).await?;
    let oid = ObjectId::for_blob(&data);
    cache.record(rel, &stat, oid);
    Ok(Some(oid))
}
