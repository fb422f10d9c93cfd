//! Status, staging and commit diffs driven through the in-memory plumbing.

mod common;

use std::sync::{Arc, Mutex};

use common::{delete, put, Backend};
use gitpane_kernel::git::{
    ChangeKind, GitStateEngine, HeadState, StageState, StatusRow, TreeDiffEntry, WorkdirState,
};
use gitpane_kernel::vfs::{Filesystem, MemoryDirectoryHandle, NativeHandleStore, PersistentStore};
use gitpane_kernel::{Config, Error, ErrorKind, Session};
use gitpane_testutil::{MemoryPlumbing, Step};
use rstest::rstest;

struct Fixture {
    plumbing: Arc<MemoryPlumbing>,
    engine: GitStateEngine,
    fs: Arc<dyn Filesystem>,
    dir: &'static str,
}

impl Fixture {
    async fn new(backend: Backend) -> Self {
        let plumbing = Arc::new(MemoryPlumbing::new());
        let fs = backend.store();
        let dir = backend.repo_dir();
        plumbing.init(fs.as_ref(), dir).await.unwrap();
        Self {
            engine: GitStateEngine::new(plumbing.clone()),
            plumbing,
            fs,
            dir,
        }
    }

    async fn put(&self, file: &str, content: &str) {
        put(self.fs.as_ref(), self.dir, file, content).await;
    }

    async fn status(&self) -> Vec<StatusRow> {
        self.engine
            .compute_status("demo", self.fs.as_ref(), self.dir)
            .await
            .unwrap()
    }

    async fn commit(&self, message: &str) -> gitpane_kernel::git::CommitOutcome {
        self.engine
            .stage_and_commit("demo", self.fs.as_ref(), self.dir, message, None)
            .await
            .unwrap()
    }

    async fn diff(&self, commit: gitpane_kernel::git::ObjectId) -> Vec<TreeDiffEntry> {
        self.engine
            .diff_commit("demo", self.fs.as_ref(), self.dir, commit)
            .await
            .unwrap()
    }
}

fn row<'a>(rows: &'a [StatusRow], path: &str) -> &'a StatusRow {
    rows.iter()
        .find(|r| r.path == path)
        .unwrap_or_else(|| panic!("no status row for {path}"))
}

fn paths(diff: &[TreeDiffEntry]) -> Vec<&str> {
    diff.iter().map(|e| e.path.as_str()).collect()
}

#[rstest]
#[case::persistent(Backend::Persistent)]
#[case::native(Backend::Native)]
#[tokio::test]
async fn new_deleted_and_unchanged_files_are_staged_in_one_batch_each(#[case] backend: Backend) {
    let fx = Fixture::new(backend).await;
    fx.put("keep.txt", "keep").await;
    fx.put("gone.txt", "gone").await;
    fx.commit("initial").await;
    fx.plumbing.clear_calls().await;

    fx.put("new.txt", "new").await;
    delete(fx.fs.as_ref(), fx.dir, "gone.txt").await;

    let rows = fx.status().await;
    assert_eq!(rows.len(), 3);
    let new = row(&rows, "new.txt");
    assert_eq!((new.head, new.workdir), (HeadState::Absent, WorkdirState::Modified));
    assert_eq!(new.stage, StageState::Absent);
    let gone = row(&rows, "gone.txt");
    assert_eq!((gone.head, gone.workdir), (HeadState::Present, WorkdirState::Absent));
    let keep = row(&rows, "keep.txt");
    assert_eq!((keep.head, keep.workdir), (HeadState::Present, WorkdirState::Present));
    assert_eq!(keep.stage, StageState::Head);

    let outcome = fx.commit("update").await;
    assert_eq!(outcome.added, vec!["new.txt"]);
    assert_eq!(outcome.removed, vec!["gone.txt"]);
    assert_eq!(fx.plumbing.add_calls().await, vec![vec!["new.txt".to_string()]]);
    assert_eq!(fx.plumbing.remove_calls().await, vec![vec!["gone.txt".to_string()]]);
    assert_eq!(
        fx.plumbing.index(fx.fs.as_ref(), fx.dir).await.unwrap(),
        vec!["keep.txt", "new.txt"]
    );
}

#[rstest]
#[case::persistent(Backend::Persistent)]
#[case::native(Backend::Native)]
#[tokio::test]
async fn committing_again_stages_nothing(#[case] backend: Backend) {
    let fx = Fixture::new(backend).await;
    fx.put("a.txt", "a").await;
    fx.put("dir/b.txt", "b").await;
    let first = fx.commit("first").await;
    assert!(!first.is_empty());
    fx.plumbing.clear_calls().await;

    let second = fx.commit("second").await;
    assert!(second.is_empty());
    assert!(fx.plumbing.add_calls().await.is_empty());
    assert!(fx.plumbing.remove_calls().await.is_empty());
    assert_ne!(second.commit, first.commit);
    assert!(fx.diff(second.commit).await.is_empty());
}

#[tokio::test]
async fn root_commit_diff_lists_every_blob_once() {
    let fx = Fixture::new(Backend::Native).await;
    for file in ["README.md", "src/lib.rs", "src/deep/x/y.rs", "src/deep/z.rs", "docs/a.md"] {
        fx.put(file, file).await;
    }
    let root = fx.commit("root").await;

    let diff = fx.diff(root.commit).await;
    let mut listed = paths(&diff);
    listed.sort_unstable();
    assert_eq!(
        listed,
        vec!["README.md", "docs/a.md", "src/deep/x/y.rs", "src/deep/z.rs", "src/lib.rs"]
    );
    assert!(diff.iter().all(|e| e.change == ChangeKind::Added));
}

#[tokio::test]
async fn diff_orders_names_bytewise_within_each_directory() {
    let fx = Fixture::new(Backend::Persistent).await;
    for file in ["a.txt", "a/b.txt", "a-z.md"] {
        fx.put(file, "v1").await;
    }
    let root = fx.commit("root").await;
    assert_eq!(paths(&fx.diff(root.commit).await), vec!["a/b.txt", "a-z.md", "a.txt"]);

    for file in ["a.txt", "a/b.txt", "a-z.md"] {
        fx.put(file, "v2").await;
    }
    let edit = fx.commit("edit").await;
    assert_eq!(paths(&fx.diff(edit.commit).await), vec!["a/b.txt", "a-z.md", "a.txt"]);
}

#[rstest]
#[case::persistent(Backend::Persistent)]
#[case::native(Backend::Native)]
#[tokio::test]
async fn non_root_diff_lists_changed_blobs(#[case] backend: Backend) {
    let fx = Fixture::new(backend).await;
    fx.put("x.txt", "one").await;
    fx.put("lib/stable.rs", "stable").await;
    fx.put("lib/old.rs", "old").await;
    fx.commit("root").await;

    fx.put("x.txt", "version two").await;
    let edit = fx.commit("edit x").await;
    assert_eq!(
        fx.diff(edit.commit).await,
        vec![TreeDiffEntry {
            path: "x.txt".to_string(),
            change: ChangeKind::Modified,
        }]
    );

    delete(fx.fs.as_ref(), fx.dir, "lib/old.rs").await;
    fx.put("lib/new/mod.rs", "new").await;
    let reshuffle = fx.commit("reshuffle lib").await;
    let diff = fx.diff(reshuffle.commit).await;
    let changes: Vec<_> = diff.iter().map(|e| (e.path.as_str(), e.change)).collect();
    assert_eq!(
        changes,
        vec![
            ("lib/new/mod.rs", ChangeKind::Added),
            ("lib/old.rs", ChangeKind::Removed),
        ]
    );
}

#[tokio::test]
async fn repositories_on_different_backends_keep_separate_caches() {
    let plumbing = Arc::new(MemoryPlumbing::new());
    let engine = GitStateEngine::new(plumbing.clone());

    let browser = Backend::Persistent.store();
    let local = Backend::Native.store();
    for (fs, dir) in [(&browser, "/demo"), (&local, ".")] {
        plumbing.init(fs.as_ref(), dir).await.unwrap();
        put(fs.as_ref(), dir, "shared.txt", "same name, same content").await;
        put(fs.as_ref(), dir, "other.txt", "o").await;
    }

    let before = engine.compute_status("local", local.as_ref(), ".").await.unwrap();
    engine.compute_status("browser", browser.as_ref(), "/demo").await.unwrap();

    put(browser.as_ref(), "/demo", "shared.txt", "changed only in the browser repo").await;
    delete(browser.as_ref(), "/demo", "other.txt").await;
    engine.compute_status("browser", browser.as_ref(), "/demo").await.unwrap();

    let after = engine.compute_status("local", local.as_ref(), ".").await.unwrap();
    assert_eq!(before, after);

    let local_stats = engine.cache_stats("local").await.unwrap();
    let browser_stats = engine.cache_stats("browser").await.unwrap();
    assert_eq!(local_stats.entries, 2);
    assert_eq!(browser_stats.entries, 1);
    assert_eq!(local_stats.hits, 2);
    assert!(engine.cache_stats("neither").await.is_none());
}

#[tokio::test]
async fn unchanged_files_are_served_from_the_cache() {
    let fx = Fixture::new(Backend::Native).await;
    fx.put("a.txt", "a").await;
    fx.put("b/c.txt", "c").await;

    fx.status().await;
    let cold = fx.engine.cache_stats("demo").await.unwrap();
    assert_eq!((cold.hits, cold.misses, cold.entries), (0, 2, 2));

    fx.status().await;
    let warm = fx.engine.cache_stats("demo").await.unwrap();
    assert_eq!((warm.hits, warm.misses), (2, 2));

    fx.put("a.txt", "a, edited").await;
    let rows = fx.status().await;
    assert_eq!(row(&rows, "a.txt").workdir, WorkdirState::Modified);
    let edited = fx.engine.cache_stats("demo").await.unwrap();
    assert_eq!((edited.hits, edited.misses), (3, 3));
}

#[rstest]
#[case::add(Step::Add, "add")]
#[case::remove(Step::Remove, "remove")]
#[case::commit(Step::Commit, "commit")]
#[tokio::test]
async fn failed_step_surfaces_as_commit_error_and_retry_succeeds(
    #[case] step: Step,
    #[case] step_name: &str,
) {
    let fx = Fixture::new(Backend::Persistent).await;
    fx.put("stay.txt", "s").await;
    fx.put("drop.txt", "d").await;
    let base = fx.commit("base").await;

    fx.put("fresh.txt", "f").await;
    delete(fx.fs.as_ref(), fx.dir, "drop.txt").await;
    fx.plumbing.fail_next(step).await;

    let err = fx
        .engine
        .stage_and_commit("demo", fx.fs.as_ref(), fx.dir, "broken", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Commit);
    assert_eq!(err.code(), "ECOMMIT");
    match &err {
        Error::Commit { repo, step, .. } => {
            assert_eq!(repo, "demo");
            assert_eq!(*step, step_name);
        }
        other => panic!("expected a commit error, got {other:?}"),
    }
    let head = fx.engine.head("demo", fx.fs.as_ref(), fx.dir).await.unwrap();
    assert_eq!(head, Some(base.commit));

    let retry = fx.commit("retry").await;
    assert_eq!(retry.added, vec!["fresh.txt"]);
    assert_eq!(retry.removed, vec!["drop.txt"]);
    let diff = fx.diff(retry.commit).await;
    assert_eq!(paths(&diff), vec!["drop.txt", "fresh.txt"]);
}

#[tokio::test]
async fn concurrent_commits_on_one_repository_are_serialized() {
    let fx = Fixture::new(Backend::Native).await;
    fx.put("a.txt", "a").await;

    let (first, second) = tokio::join!(
        fx.engine
            .stage_and_commit("demo", fx.fs.as_ref(), fx.dir, "one", None),
        fx.engine
            .stage_and_commit("demo", fx.fs.as_ref(), fx.dir, "two", None),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.added.len() + second.added.len(), 1);
    assert_eq!(fx.plumbing.add_calls().await.len(), 1);

    let log = fx.engine.log("demo", fx.fs.as_ref(), fx.dir, 10).await.unwrap();
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn session_round_trip_on_both_backends() {
    let store = Arc::new(PersistentStore::in_memory());
    let plumbing = Arc::new(MemoryPlumbing::new());
    plumbing.init(store.as_ref(), "/notes").await.unwrap();

    let checkout = MemoryDirectoryHandle::new("checkout");
    let native = NativeHandleStore::new(checkout.clone());
    plumbing.init(&native, ".").await.unwrap();

    let session = Session::new(store, plumbing.clone(), Config::default());
    session
        .registry()
        .register_persistent("notes", Some("https://example.com/me/notes.git".to_string()))
        .await
        .unwrap();
    let local = session.registry().open_local(checkout).await.unwrap();

    for repo in ["notes", local.name.as_str()] {
        session.write_file(repo, "journal/today.md", b"# Today").await.unwrap();
        assert_eq!(session.list_files(repo).await.unwrap(), vec!["journal/today.md"]);

        let lines = Mutex::new(Vec::new());
        let report = |line: &str| lines.lock().unwrap().push(line.to_string());
        let outcome = session.commit(repo, "first entry", Some(&report)).await.unwrap();
        assert_eq!(
            lines.into_inner().unwrap(),
            vec![
                "added/modified: journal/today.md".to_string(),
                "git commit -m \"first entry\"".to_string(),
            ]
        );

        let log = session.log(repo, None).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "first entry");
        assert_eq!(log[0].author.name, "Git Viewer User");
        assert_eq!(session.head(repo).await.unwrap(), Some(outcome.commit));
        assert_eq!(
            paths(&session.diff_commit(repo, outcome.commit).await.unwrap()),
            vec!["journal/today.md"]
        );
    }

    let names: Vec<_> = session
        .registry()
        .list()
        .await
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["notes".to_string(), local.name.clone()]);
}
