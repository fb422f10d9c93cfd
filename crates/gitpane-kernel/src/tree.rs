//! Working-tree enumeration and the flattened file tree shown to callers.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::{Result, ResultExt};
use crate::path;
use crate::vfs::Filesystem;

/// Every file under `dir`, relative to it, skipping `.git` entries.
///
/// Children are visited in the backend's enumeration order, depth first.
pub async fn list_files(fs: &dyn Filesystem, dir: &str) -> Result<Vec<String>> {
    list_files_except(fs, dir, &|_, _| false).await
}

/// Predicate over a relative path and whether it is a directory.
pub type SkipFn<'a> = dyn Fn(&str, bool) -> bool + Send + Sync + 'a;

/// Like [`list_files`], leaving out entries `skip` rejects. A rejected
/// directory is not descended into.
pub async fn list_files_except(
    fs: &dyn Filesystem,
    dir: &str,
    skip: &SkipFn<'_>,
) -> Result<Vec<String>> {
    let mut files = Vec::new();
    collect(fs, dir, String::new(), skip, &mut files).await?;
    Ok(files)
}

fn collect<'a>(
    fs: &'a dyn Filesystem,
    dir: &'a str,
    relative: String,
    skip: &'a SkipFn<'a>,
    files: &'a mut Vec<String>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let read_path = path::join([dir, relative.as_str()]);
        let entries = fs
            .readdir(&read_path)
            .await
            .with_context(|| format!("listing {read_path}"))?;

        for entry in entries {
            if entry == ".git" {
                continue;
            }
            let child = if relative.is_empty() {
                entry
            } else {
                format!("{relative}/{entry}")
            };
            let stat = fs.stat(&path::join([dir, child.as_str()])).await?;
            if skip(&child, stat.is_directory) {
                continue;
            }
            if stat.is_directory {
                collect(fs, dir, child, skip, files).await?;
            } else {
                files.push(child);
            }
        }
        Ok(())
    })
}

/// One row of the flattened tree view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTreeEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub depth: usize,
}

/// Flatten file paths into tree rows, synthesizing a row for every
/// directory on the way. Sorted by depth, directories first, then name.
pub fn file_tree<S: AsRef<str>>(files: &[S]) -> Vec<FileTreeEntry> {
    let mut tree = Vec::new();
    let mut seen_dirs = HashSet::new();

    for file in files {
        let parts: Vec<&str> = file.as_ref().split('/').collect();
        let Some((name, dirs)) = parts.split_last() else {
            continue;
        };
        for depth in 0..dirs.len() {
            let dir_path = dirs[..=depth].join("/");
            if seen_dirs.insert(dir_path.clone()) {
                tree.push(FileTreeEntry {
                    name: dirs[depth].to_string(),
                    path: dir_path,
                    is_directory: true,
                    depth,
                });
            }
        }
        tree.push(FileTreeEntry {
            name: name.to_string(),
            path: file.as_ref().to_string(),
            is_directory: false,
            depth: dirs.len(),
        });
    }

    tree.sort_by(compare_rows);
    tree
}

fn compare_rows(a: &FileTreeEntry, b: &FileTreeEntry) -> Ordering {
    a.depth
        .cmp(&b.depth)
        .then_with(|| b.is_directory.cmp(&a.is_directory))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}
