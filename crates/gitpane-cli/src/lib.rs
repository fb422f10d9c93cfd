//! gitpane command line.
//!
//! Opens either a host directory (`-C DIR`) or a repository kept in the
//! persistent store (`--repo NAME`) and runs one command against it:
//!
//! ```bash
//! gitpane status
//! gitpane commit -m "update notes"
//! gitpane --repo notes ls --tree
//! echo hi | gitpane --repo notes write greeting.txt
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;

use gitpane_kernel::git::{ChangeKind, Git2Plumbing, ObjectId, Partition};
use gitpane_kernel::vfs::{BackendKind, LocalDirectoryHandle, PersistentStore};
use gitpane_kernel::{Config, Session};

#[derive(Debug, Parser)]
#[command(name = "gitpane", version, about = "Browse, edit and commit git repositories")]
pub struct Cli {
    /// Open this host directory as a local repository.
    #[arg(short = 'C', long = "dir", global = true, conflicts_with = "repo")]
    pub dir: Option<PathBuf>,

    /// Use a repository from the persistent store.
    #[arg(long, global = true)]
    pub repo: Option<String>,

    /// Config file to read instead of the XDG default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Persistent store snapshot, overriding `[storage] snapshot`.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show changed paths.
    Status,
    /// Stage every change and commit it.
    Commit {
        #[arg(short, long)]
        message: String,
        /// Commit even when nothing changed.
        #[arg(long)]
        allow_empty: bool,
    },
    /// Paths changed by a commit (HEAD by default).
    Diff { commit: Option<String> },
    /// Recent commits.
    Log {
        #[arg(short = 'n', long)]
        max_count: Option<usize>,
    },
    /// List working-tree files.
    Ls {
        /// Indented tree with directory rows.
        #[arg(long)]
        tree: bool,
    },
    /// Print a file.
    Cat { path: String },
    /// Write a file from CONTENT or stdin.
    Write { path: String, content: Option<String> },
    /// List known repositories.
    Repos,
}

/// Run one command, writing its output to `out`.
pub async fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path).await?,
        None => Config::load_default().await?,
    };
    let snapshot = cli.store.clone().unwrap_or_else(|| config.snapshot_path());
    let store = PersistentStore::open(&snapshot)
        .await
        .with_context(|| format!("opening store {}", snapshot.display()))?;
    let default_backend = config.storage.default_backend;
    let session = Session::new(Arc::new(store), Arc::new(Git2Plumbing::new()), config);

    if let Command::Repos = cli.command {
        // The local directory is listed when it happens to be a repository.
        if cli.repo.is_none() {
            let dir = cli.dir.clone().unwrap_or_else(|| PathBuf::from("."));
            if let Err(e) = open_local(&session, dir).await {
                tracing::debug!(error = %e, "no local repository to list");
            }
        }
        return repos(&session, cli.json, out).await;
    }

    let repo = select(&session, &cli, default_backend).await?;
    tracing::debug!(repo = %repo, command = ?cli.command, "running");

    match cli.command {
        Command::Status => status(&session, &repo, cli.json, out).await,
        Command::Commit {
            message,
            allow_empty,
        } => commit(&session, &repo, &message, allow_empty, out).await,
        Command::Diff { commit } => diff(&session, &repo, commit.as_deref(), cli.json, out).await,
        Command::Log { max_count } => log(&session, &repo, max_count, cli.json, out).await,
        Command::Ls { tree } => ls(&session, &repo, tree, cli.json, out).await,
        Command::Cat { path } => {
            let text = session.read_file(&repo, &path).await?;
            out.write_all(text.as_bytes())?;
            Ok(())
        }
        Command::Write { path, content } => {
            let data = match content {
                Some(content) => content.into_bytes(),
                None => {
                    let mut data = Vec::new();
                    tokio::io::stdin()
                        .read_to_end(&mut data)
                        .await
                        .context("reading stdin")?;
                    data
                }
            };
            session.write_file(&repo, &path, &data).await?;
            session.flush().await?;
            writeln!(out, "wrote {} bytes to {path}", data.len())?;
            Ok(())
        }
        Command::Repos => Ok(()),
    }
}

async fn open_local(session: &Session, dir: PathBuf) -> Result<String> {
    let handle = LocalDirectoryHandle::open(&dir)
        .await
        .with_context(|| format!("opening {}", dir.display()))?;
    let record = session.registry().open_local(handle).await?;
    Ok(record.name)
}

/// Name of the repository the flags point at.
async fn select(session: &Session, cli: &Cli, default_backend: BackendKind) -> Result<String> {
    if let Some(name) = &cli.repo {
        session.registry().get(name).await?;
        return Ok(name.clone());
    }
    match (&cli.dir, default_backend) {
        (Some(dir), _) => open_local(session, dir.clone()).await,
        (None, BackendKind::Native) => open_local(session, PathBuf::from(".")).await,
        (None, BackendKind::Persistent) => {
            let names: Vec<String> = session
                .registry()
                .list()
                .await
                .into_iter()
                .map(|r| r.name)
                .collect();
            match names.as_slice() {
                [only] => Ok(only.clone()),
                [] => open_local(session, PathBuf::from(".")).await,
                _ => Err(anyhow!(
                    "several repositories in the store ({}); pick one with --repo or -C",
                    names.join(", ")
                )),
            }
        }
    }
}

async fn status(session: &Session, repo: &str, json: bool, out: &mut dyn Write) -> Result<()> {
    let rows = session.status(repo).await?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &rows)?;
        writeln!(out)?;
        return Ok(());
    }
    let changed: Vec<_> = rows.iter().filter(|r| r.marker() != " ").collect();
    if changed.is_empty() {
        writeln!(out, "nothing to commit, working tree clean")?;
    }
    for row in changed {
        writeln!(out, "{} {}", row.marker(), row.path)?;
    }
    Ok(())
}

async fn commit(
    session: &Session,
    repo: &str,
    message: &str,
    allow_empty: bool,
    out: &mut dyn Write,
) -> Result<()> {
    if !allow_empty {
        let rows = session.status(repo).await?;
        if Partition::from_rows(&rows, None).is_empty() {
            bail!("nothing to commit (use --allow-empty to commit anyway)");
        }
    }

    let lines = Mutex::new(Vec::new());
    let report = |line: &str| {
        if let Ok(mut lines) = lines.lock() {
            lines.push(line.to_string());
        }
    };
    let outcome = session.commit(repo, message, Some(&report)).await?;

    let lines = lines.into_inner().map_err(|_| anyhow!("progress log poisoned"))?;
    for line in lines {
        writeln!(out, "{line}")?;
    }
    writeln!(
        out,
        "[{}] {message} ({} added/modified, {} deleted)",
        outcome.commit.short(),
        outcome.added.len(),
        outcome.removed.len()
    )?;
    Ok(())
}

async fn diff(
    session: &Session,
    repo: &str,
    commit: Option<&str>,
    json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let commit = match commit {
        None | Some("HEAD") => session
            .head(repo)
            .await?
            .ok_or_else(|| anyhow!("repository '{repo}' has no commits yet"))?,
        Some(hex) => hex.parse::<ObjectId>()?,
    };
    let changes = session.diff_commit(repo, commit).await?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &changes)?;
        writeln!(out)?;
        return Ok(());
    }
    for change in changes {
        let marker = match change.change {
            ChangeKind::Added => "A",
            ChangeKind::Removed => "D",
            ChangeKind::Modified => "M",
        };
        writeln!(out, "{marker} {}", change.path)?;
    }
    Ok(())
}

async fn log(
    session: &Session,
    repo: &str,
    max_count: Option<usize>,
    json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let commits = session.log(repo, max_count).await?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &commits)?;
        writeln!(out)?;
        return Ok(());
    }
    for commit in commits {
        let subject = commit.message.lines().next().unwrap_or_default();
        writeln!(
            out,
            "{} {subject} <{}>",
            commit.oid.short(),
            commit.author.email
        )?;
    }
    Ok(())
}

async fn ls(session: &Session, repo: &str, tree: bool, json: bool, out: &mut dyn Write) -> Result<()> {
    if tree {
        let entries = session.file_tree(repo).await?;
        if json {
            serde_json::to_writer_pretty(&mut *out, &entries)?;
            writeln!(out)?;
            return Ok(());
        }
        for entry in entries {
            let suffix = if entry.is_directory { "/" } else { "" };
            writeln!(out, "{}{}{suffix}", "  ".repeat(entry.depth), entry.name)?;
        }
        return Ok(());
    }

    let files = session.list_files(repo).await?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &files)?;
        writeln!(out)?;
        return Ok(());
    }
    for file in files {
        writeln!(out, "{file}")?;
    }
    Ok(())
}

async fn repos(session: &Session, json: bool, out: &mut dyn Write) -> Result<()> {
    let records = session.registry().list().await;
    if json {
        serde_json::to_writer_pretty(&mut *out, &records)?;
        writeln!(out)?;
        return Ok(());
    }
    for record in records {
        writeln!(out, "{}\t{}", record.name, record.display_name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_and_repo_conflict() {
        let err = Cli::try_parse_from(["gitpane", "-C", "x", "--repo", "y", "status"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gitpane", "log", "-n", "3", "--json", "--repo", "notes"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.repo.as_deref(), Some("notes"));
        assert!(matches!(cli.command, Command::Log { max_count: Some(3) }));
    }

    #[test]
    fn commit_requires_message() {
        assert!(Cli::try_parse_from(["gitpane", "commit"]).is_err());
    }
}
