//! Git state: the plumbing seam, the status cache and the engine over them.

mod cache;
mod engine;
#[cfg(feature = "native")]
mod libgit;
mod plumbing;

pub use cache::{hash_workdir_file, CacheStats, StatusCache};
pub use engine::{
    ChangeKind, CommitOutcome, GitStateEngine, Partition, Progress, TreeDiffEntry,
};
#[cfg(feature = "native")]
pub use libgit::Git2Plumbing;
pub use plumbing::{
    CommitInfo, CommitSummary, GitPlumbing, HeadState, ObjectId, Signature, StageState, StatusRow,
    TreeEntry, TreeEntryKind, WorkdirState,
};
