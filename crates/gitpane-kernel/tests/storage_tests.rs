//! Filesystem contract behavior shared by both storage backends.

mod common;

use std::sync::Arc;

use common::{put, Backend};
use gitpane_kernel::vfs::{
    populate, Contents, Encoding, Filesystem, FilesystemAdapter, MemoryDirectoryHandle, MkdirOptions,
    PersistentStore,
};
use gitpane_kernel::ErrorKind;
use proptest::prelude::*;
use rstest::rstest;

#[rstest]
#[case::persistent(Backend::Persistent)]
#[case::native(Backend::Native)]
#[tokio::test]
async fn missing_paths_are_enoent(#[case] backend: Backend) {
    let fs = backend.store();
    put(fs.as_ref(), "docs", "present.md", "x").await;

    for missing in ["absent", "docs/absent.md", "nowhere/deep/file"] {
        let err = fs.stat(missing).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{missing}");
        assert_eq!(err.code(), "ENOENT");
        assert!(err.to_string().starts_with("ENOENT"), "{err}");
        assert!(err.is_not_found());
    }
    assert!(fs.readdir("absent").await.unwrap_err().is_not_found());
    assert!(fs.read("docs/absent.md").await.unwrap_err().is_not_found());
}

#[rstest]
#[case::persistent(Backend::Persistent)]
#[case::native(Backend::Native)]
#[tokio::test]
async fn mkdir_recursive_and_strict(#[case] backend: Backend) {
    let fs = backend.store();

    let err = fs.mkdir("a/b/c", MkdirOptions::default()).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert!(fs.stat("a").await.unwrap_err().is_not_found());

    fs.mkdir("a/b/c", MkdirOptions::recursive()).await.unwrap();
    let stat = fs.stat("a/b/c").await.unwrap();
    assert!(stat.is_directory);
    assert!(!stat.is_file);

    fs.mkdir("a/b/d", MkdirOptions::default()).await.unwrap();
    assert!(fs.stat("a/b/d").await.unwrap().is_directory);
}

#[rstest]
#[case::persistent(Backend::Persistent)]
#[case::native(Backend::Native)]
#[tokio::test]
async fn read_file_encodings(#[case] backend: Backend) {
    let fs = backend.store();
    put(fs.as_ref(), ".", "note.txt", "héllo").await;

    let text = fs.read_file(Some("note.txt"), Encoding::Utf8).await.unwrap();
    assert_eq!(text, Some(Contents::Text("héllo".to_string())));

    let bytes = fs.read_file(Some("note.txt"), Encoding::Binary).await.unwrap();
    assert_eq!(bytes, Some(Contents::Bytes("héllo".as_bytes().to_vec())));

    assert_eq!(fs.read_file(None, Encoding::Utf8).await.unwrap(), None);
}

#[rstest]
#[case::persistent(Backend::Persistent)]
#[case::native(Backend::Native)]
#[tokio::test]
async fn overwrite_replaces_content(#[case] backend: Backend) {
    let fs = backend.store();
    put(fs.as_ref(), ".", "f.txt", "a much longer first version").await;
    put(fs.as_ref(), ".", "f.txt", "short").await;
    assert_eq!(fs.read_to_string("f.txt").await.unwrap(), "short");
    assert_eq!(fs.stat("f.txt").await.unwrap().size, 5);
}

#[tokio::test]
async fn adapter_reports_repositories_on_both_backends() {
    let store = Arc::new(PersistentStore::in_memory());
    store.mkdir("/web/.git", MkdirOptions::recursive()).await.unwrap();
    let persistent = FilesystemAdapter::persistent(store);
    assert!(persistent.is_git_repository("/web").await);
    assert!(!persistent.is_git_repository("/other").await);

    let root = MemoryDirectoryHandle::new("checkout");
    populate(&root, [(".git/HEAD", "ref: refs/heads/main\n"), ("a.txt", "a")])
        .await
        .unwrap();
    let native = FilesystemAdapter::native(root);
    assert!(native.is_git_repository(".").await);
    assert!(native.exists("a.txt").await);
    assert!(!native.exists("b.txt").await);
    assert!(native.test_connection().await.connected);
}

fn file_path() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.txt"
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn write_then_read_round_trips(path in file_path(), content in any::<String>()) {
        for backend in [Backend::Persistent, Backend::Native] {
            let read = runtime().block_on(async {
                let fs = backend.store();
                put(fs.as_ref(), ".", &path, &content).await;
                fs.read_file(Some(&path), Encoding::Utf8).await.unwrap()
            });
            prop_assert_eq!(read, Some(Contents::Text(content.clone())), "{:?}", backend);
        }
    }

    #[test]
    fn stat_size_matches_bytes(path in file_path(), content in proptest::collection::vec(any::<u8>(), 0..256)) {
        for backend in [Backend::Persistent, Backend::Native] {
            let (size, read) = runtime().block_on(async {
                let fs = backend.store();
                put(fs.as_ref(), ".", &path, &content).await;
                (fs.stat(&path).await.unwrap().size, fs.read(&path).await.unwrap())
            });
            prop_assert_eq!(size, content.len() as u64);
            prop_assert_eq!(read, content.clone());
        }
    }
}
