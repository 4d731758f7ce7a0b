//! Version-control adapter backed by the `git` command-line tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use nbci_shared::{NbciError, Result};

/// Queries the change detector and source archiver need from version control.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Repository root; every path returned by this adapter is relative to it.
    fn root(&self) -> &Path;

    /// Files under `paths` that differ between `base_ref` and the working tree's
    /// merge base (`git diff --name-only <base_ref>...`).
    async fn diff_names(&self, base_ref: &str, paths: &[PathBuf]) -> Result<Vec<String>>;

    /// Tracked files under `paths`.
    async fn list_files(&self, paths: &[PathBuf]) -> Result<Vec<String>>;

    /// Write a gzipped tarball of the tracked tree at `HEAD` to `dest`.
    async fn archive_head(&self, dest: &Path) -> Result<()>;
}

/// [`Vcs`] implementation that shells out to `git`.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    /// `repo_root` should be the repository's top-level directory so that
    /// `git diff` and `git ls-files` report paths relative to the same base.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    async fn run(&self, cmd: &mut Command, label: &str) -> Result<String> {
        debug!(cmd = label, root = %self.repo_root.display(), "running git");

        let output = cmd
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| NbciError::Git(format!("failed to run git {label}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NbciError::Git(format!("git {label}: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(".")
    }
}

fn split_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl Vcs for GitCli {
    fn root(&self) -> &Path {
        &self.repo_root
    }

    async fn diff_names(&self, base_ref: &str, paths: &[PathBuf]) -> Result<Vec<String>> {
        let mut cmd = Command::new("git");
        cmd.args(["diff", "--name-only"])
            .arg(format!("{base_ref}..."))
            .arg("--")
            .args(paths);
        let stdout = self.run(&mut cmd, "diff").await?;
        Ok(split_lines(&stdout))
    }

    async fn list_files(&self, paths: &[PathBuf]) -> Result<Vec<String>> {
        let mut cmd = Command::new("git");
        cmd.args(["ls-files", "--"]).args(paths);
        let stdout = self.run(&mut cmd, "ls-files").await?;
        Ok(split_lines(&stdout))
    }

    async fn archive_head(&self, dest: &Path) -> Result<()> {
        let dest = if dest.is_absolute() {
            dest.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| NbciError::io(".", e))?
                .join(dest)
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| NbciError::io(parent, e))?;
        }

        let mut cmd = Command::new("git");
        cmd.args(["archive", "--format=tar.gz", "-o"])
            .arg(&dest)
            .arg("HEAD");
        self.run(&mut cmd, "archive").await?;
        Ok(())
    }
}
