//! Error types shared by every layer of the kernel.
//!
//! Each variant maps onto one [`ErrorKind`] and one stable machine-readable
//! [`code`](Error::code). The git plumbing and the callers match on those,
//! never on messages.

use std::io;

use thiserror::Error;

/// Kernel result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of an [`Error`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The path does not exist.
    NotFound,
    /// The backend cannot perform this operation (symlinks, etc.).
    Unsupported,
    /// Missing or invalid initialization input.
    Config,
    /// Underlying storage failure not classified above.
    Io,
    /// A staging or commit step failed.
    Commit,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("ENOENT: no such file or directory, '{path}'")]
    NotFound { path: String },

    #[error("operation not supported: {operation}")]
    Unsupported { operation: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{operation} failed for '{path}': {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("commit failed for repository '{repo}' during {step}: {source}")]
    Commit {
        repo: String,
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("unknown repository: {0}")]
    UnknownRepository(String),

    #[error("git plumbing: {0}")]
    Plumbing(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn io(operation: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        // A host NotFound is a missing path no matter which layer saw it.
        if source.kind() == io::ErrorKind::NotFound {
            return Self::not_found(path);
        }
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Classification that looks through [`Error::Context`] wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Config(_) => ErrorKind::Config,
            Self::Io { .. } | Self::Plumbing(_) => ErrorKind::Io,
            Self::UnknownRepository(_) => ErrorKind::Config,
            Self::Commit { .. } => ErrorKind::Commit,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Stable marker for programmatic handling (`ENOENT` for missing paths).
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "ENOENT",
            ErrorKind::Unsupported => "ENOTSUP",
            ErrorKind::Config => "ECONFIG",
            ErrorKind::Io => "EIO",
            ErrorKind::Commit => "ECOMMIT",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// The host I/O error kind, if this error (or what it wraps) carries one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            Self::NotFound { .. } => Some(io::ErrorKind::NotFound),
            Self::Context { source, .. } | Self::Commit { source, .. } => source.io_kind(),
            _ => None,
        }
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::io("io", "", err)
    }
}

/// Attach operation context to a failing result without losing its kind.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_preserves_kind_and_code() {
        let err = Error::not_found("a/b").context("reading file").context("status of repo x");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.code(), "ENOENT");
        assert!(err.to_string().contains("status of repo x"));
    }

    #[test]
    fn host_not_found_becomes_not_found() {
        let err = Error::io("stat", "x", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());

        let err = Error::io("stat", "x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.io_kind(), Some(io::ErrorKind::PermissionDenied));
    }

    #[test]
    fn commit_error_wraps_cause() {
        let err = Error::Commit {
            repo: "demo".into(),
            step: "remove",
            source: Box::new(Error::Plumbing("index locked".into())),
        };
        assert_eq!(err.code(), "ECOMMIT");
        assert!(err.to_string().contains("index locked"));
    }
}
