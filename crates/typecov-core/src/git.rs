//! Version-control operations used by the synchronizer.
//!
//! [`RepoOps`] is the seam between the synchronizer and the external
//! version-control tool. [`GitCli`] implements it by running `git` as a
//! subprocess; exit status decides success.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{CensusError, Result};

/// Clone and update operations on driver repositories.
///
/// Implement this trait to plug in another VCS backend or a test stub.
#[async_trait]
pub trait RepoOps: Send + Sync {
    /// Clone `url` into `root/dir_name`.
    async fn clone_into(&self, url: &str, root: &Path, dir_name: &str) -> Result<()>;

    /// Bring `repo_dir` up to date with `branch` of its origin.
    async fn update(&self, repo_dir: &Path, branch: &str) -> Result<()>;

    /// Revision checked out in `repo_dir`, when the backend can tell.
    async fn head_revision(&self, _repo_dir: &Path) -> Result<Option<String>> {
        Ok(None)
    }
}

/// [`RepoOps`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a different executable, e.g. a wrapper script.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run git in `dir`. Repository discovery never climbs above `ceiling`.
    async fn run(&self, operation: &str, dir: &Path, ceiling: &Path, args: &[&str]) -> Result<String> {
        // Relative ceilings are ignored by git.
        let ceiling = tokio::fs::canonicalize(ceiling)
            .await
            .unwrap_or_else(|_| ceiling.to_path_buf());
        let git_error = |stderr: String| CensusError::Git {
            operation: operation.to_string(),
            dir: dir.to_path_buf(),
            stderr,
        };

        // kill_on_drop lets a pool deadline reap a hung clone.
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_CEILING_DIRECTORIES", &ceiling)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| git_error(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(git_error(format!("exit {code}: {stderr}")));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl RepoOps for GitCli {
    async fn clone_into(&self, url: &str, root: &Path, dir_name: &str) -> Result<()> {
        self.run("clone", root, root, &["clone", "--quiet", url, dir_name])
            .await
            .map(|_| ())
    }

    async fn update(&self, repo_dir: &Path, branch: &str) -> Result<()> {
        self.run(
            "pull",
            repo_dir,
            clone_root(repo_dir),
            &["pull", "--quiet", "--ff-only", "origin", branch],
        )
        .await
        .map(|_| ())
    }

    async fn head_revision(&self, repo_dir: &Path) -> Result<Option<String>> {
        let sha = self
            .run("rev-parse", repo_dir, clone_root(repo_dir), &["rev-parse", "HEAD"])
            .await?;
        if sha.is_empty() {
            return Ok(None);
        }
        Ok(Some(sha))
    }
}

/// Directory a driver is cloned into.
pub fn repo_dir(root: &Path, dir_name: &str) -> PathBuf {
    root.join(dir_name)
}

/// Whether `dir` holds its own git checkout rather than a leftover.
pub async fn is_checkout(dir: &Path) -> bool {
    tokio::fs::metadata(dir.join(".git")).await.is_ok()
}

fn clone_root(repo_dir: &Path) -> &Path {
    repo_dir.parent().unwrap_or(repo_dir)
}
