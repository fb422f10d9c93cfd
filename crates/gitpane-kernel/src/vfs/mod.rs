//! Storage backends behind one path-addressed contract.
//!
//! - **NativeHandleStore**: a granted directory handle tree
//!   ([`MemoryDirectoryHandle`] in the sandbox, [`LocalDirectoryHandle`] on a host)
//! - **PersistentStore**: the application-private virtual filesystem
//! - **FilesystemAdapter**: picks one per repository and initializes it lazily
//!
//! ```text
//! caller ─▶ FilesystemAdapter ─┬─▶ NativeHandleStore ─▶ DirectoryHandle
//!                              └─▶ PersistentStore   ─▶ snapshot file
//! ```

mod adapter;
mod handle;
#[cfg(feature = "native")]
mod local_handle;
mod memory_handle;
mod native;
mod persistent;
mod traits;

pub use adapter::{AdapterState, BackendKind, ConnectionStatus, FilesystemAdapter};
pub use handle::{DirectoryHandle, FileHandle, FileInfo, Handle, WritableFileStream};
#[cfg(feature = "native")]
pub use local_handle::{LocalDirectoryHandle, LocalFileHandle};
pub use memory_handle::{populate, MemoryDirectoryHandle, MemoryFileHandle};
pub use native::NativeHandleStore;
pub use persistent::PersistentStore;
pub use traits::{
    millis, now_millis, Contents, Encoding, FileStat, Filesystem, MkdirOptions, MODE_DIRECTORY,
    MODE_FILE,
};
