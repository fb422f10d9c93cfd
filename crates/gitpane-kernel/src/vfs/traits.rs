//! Core filesystem contract and the records it traffics in.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Mode reported for regular files.
pub const MODE_FILE: u32 = 0o100644;
/// Mode reported for directories.
pub const MODE_DIRECTORY: u32 = 0o040755;

/// POSIX-style stat record.
///
/// Exactly one of `is_file` / `is_directory` is true. Backends without
/// inodes synthesize the mode from the entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub mtime_millis: u64,
    pub mode: u32,
}

impl FileStat {
    pub fn file(size: u64, mtime_millis: u64) -> Self {
        Self {
            is_file: true,
            is_directory: false,
            is_symlink: false,
            size,
            mtime_millis,
            mode: MODE_FILE,
        }
    }

    pub fn directory(mtime_millis: u64) -> Self {
        Self {
            is_file: false,
            is_directory: true,
            is_symlink: false,
            size: 0,
            mtime_millis,
            mode: MODE_DIRECTORY,
        }
    }
}

/// Milliseconds since the Unix epoch for `time`, saturating at zero.
pub fn millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn now_millis() -> u64 {
    millis(SystemTime::now())
}

/// How `read_file` should hand back content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Binary,
}

impl Encoding {
    /// Interpret a caller-supplied encoding name.
    ///
    /// No name (or `buffer`) means raw bytes; unknown names decode as text.
    pub fn parse(name: Option<&str>) -> Self {
        match name {
            None | Some("buffer") | Some("binary") => Self::Binary,
            Some(_) => Self::Utf8,
        }
    }
}

/// File content as returned by `read_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contents {
    Text(String),
    Bytes(Vec<u8>),
}

impl Contents {
    pub fn decode(data: Vec<u8>, encoding: Encoding) -> Self {
        match encoding {
            Encoding::Binary => Self::Bytes(data),
            Encoding::Utf8 => match String::from_utf8(data) {
                Ok(text) => Self::Text(text),
                Err(e) => Self::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
            },
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Bytes(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Bytes(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MkdirOptions {
    pub recursive: bool,
}

impl MkdirOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }
}

/// The path-addressed contract a git plumbing engine binds to.
///
/// Paths are `/`-separated and relative to the backend root. Every method
/// exists on every backend even when it can only fail, because the engine
/// probes for them.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Names of the immediate children of a directory.
    async fn readdir(&self, path: &str) -> Result<Vec<String>>;

    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Read a file. `None` for `path` is a capability probe and yields `None`.
    async fn read_file(&self, path: Option<&str>, encoding: Encoding) -> Result<Option<Contents>>;

    /// Write a file. The handle store creates missing parents; the
    /// persistent store requires the parent to exist.
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;

    async fn mkdir(&self, path: &str, options: MkdirOptions) -> Result<()>;

    /// Remove a directory and everything under it.
    async fn rmdir(&self, path: &str) -> Result<()>;

    /// Remove a file.
    async fn unlink(&self, path: &str) -> Result<()>;

    /// Backend-specific label used in logs.
    fn backend_name(&self) -> &'static str;

    async fn lstat(&self, path: &str) -> Result<FileStat> {
        self.stat(path).await
    }

    /// Move a file.
    ///
    /// The default is read → write → unlink and is not crash-safe: a failure
    /// after the write leaves both paths present.
    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let data = self.read(from).await?;
        self.write_file(to, &data).await?;
        self.unlink(from).await
    }

    async fn readlink(&self, path: &str) -> Result<String> {
        let _ = path;
        Err(Error::unsupported("readlink: symbolic links are not supported by this backend"))
    }

    async fn symlink(&self, target: &str, path: &str) -> Result<()> {
        let _ = (target, path);
        Err(Error::unsupported("symlink: symbolic links are not supported by this backend"))
    }

    /// Lazy-backing hook some engines probe for; nothing to back here.
    async fn back_file(&self, path: &str) -> Result<Option<FileStat>> {
        let _ = path;
        Ok(None)
    }

    /// Approximate size of a path in bytes; `0` on any failure.
    async fn du(&self, path: &str) -> u64 {
        match self.stat(path).await {
            Ok(stat) if stat.is_file => stat.size,
            _ => 0,
        }
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Host path for a backend path, for engines that need real paths.
    fn real_path(&self, path: &str) -> Option<PathBuf> {
        let _ = path;
        None
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        match self.read_file(Some(path), Encoding::Binary).await? {
            Some(contents) => Ok(contents.into_bytes()),
            None => Ok(Vec::new()),
        }
    }

    async fn read_to_string(&self, path: &str) -> Result<String> {
        match self.read_file(Some(path), Encoding::Utf8).await? {
            Some(Contents::Text(text)) => Ok(text),
            Some(Contents::Bytes(data)) => Ok(String::from_utf8_lossy(&data).into_owned()),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::none(None, Encoding::Binary)]
    #[case::buffer(Some("buffer"), Encoding::Binary)]
    #[case::utf8(Some("utf8"), Encoding::Utf8)]
    #[case::utf_dash_8(Some("utf-8"), Encoding::Utf8)]
    #[case::unknown_defaults_to_text(Some("latin1"), Encoding::Utf8)]
    fn encoding_names(#[case] name: Option<&str>, #[case] expected: Encoding) {
        assert_eq!(Encoding::parse(name), expected);
    }

    #[test]
    fn stat_constructors_pick_mode() {
        let f = FileStat::file(3, 10);
        assert!(f.is_file && !f.is_directory);
        assert_eq!(f.mode, MODE_FILE);

        let d = FileStat::directory(10);
        assert!(d.is_directory && !d.is_file);
        assert_eq!(d.mode, MODE_DIRECTORY);
        assert_eq!(d.size, 0);
    }

    #[test]
    fn decode_invalid_utf8_is_lossy() {
        let contents = Contents::decode(vec![0x66, 0xff, 0x6f], Encoding::Utf8);
        match contents {
            Contents::Text(text) => assert!(text.starts_with('f') && text.ends_with('o')),
            Contents::Bytes(_) => panic!("expected text"),
        }
    }
}
