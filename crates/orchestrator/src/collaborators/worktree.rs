//! Version-control worktrees for workers.
//!
//! Each worker that needs a checkout gets its own worktree on its own
//! branch. Removal is idempotent: removing a worktree that no longer exists
//! succeeds.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Worktree operation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorktreeError {
    /// A git command exited unsuccessfully
    #[error("git {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    /// Filesystem error
    #[error("worktree I/O error: {reason}")]
    Io { reason: String },

    /// No worktree exists for the branch
    #[error("no worktree for branch '{branch}'")]
    UnknownBranch { branch: String },
}

impl From<std::io::Error> for WorktreeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

/// Creates and removes per-worker worktrees.
#[async_trait]
pub trait WorktreeManager: Send + Sync {
    /// Create a worktree checked out on a new branch. Returns its path.
    async fn create_worktree(&self, branch_name: &str) -> Result<PathBuf, WorktreeError>;

    /// Record files the worker produced on its branch.
    async fn assign_files(&self, branch_name: &str, paths: &[PathBuf]) -> Result<(), WorktreeError>;

    /// Remove a worktree. Succeeds if it is already gone.
    async fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError>;

    /// Delete a branch created by `create_worktree`. Succeeds if it is already gone.
    async fn delete_branch(&self, _branch_name: &str) -> Result<(), WorktreeError> {
        Ok(())
    }
}

/// Directory name for a branch's worktree.
fn worktree_dir_name(branch_name: &str) -> String {
    branch_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Worktrees managed with the `git` command line.
#[derive(Debug, Clone)]
pub struct GitWorktrees {
    repo_dir: PathBuf,
    worktrees_dir: PathBuf,
}

impl GitWorktrees {
    /// Manage worktrees of `repo_dir`, created under `worktrees_dir`.
    #[must_use]
    pub fn new(repo_dir: impl Into<PathBuf>, worktrees_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            worktrees_dir: worktrees_dir.into(),
        }
    }

    /// Where the worktree for `branch_name` lives.
    #[must_use]
    pub fn worktree_path(&self, branch_name: &str) -> PathBuf {
        self.worktrees_dir.join(worktree_dir_name(branch_name))
    }

    async fn run_git(&self, dir: &Path, args: &[&str]) -> Result<String, WorktreeError> {
        debug!(dir = %dir.display(), ?args, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(WorktreeError::CommandFailed {
                command: args.first().map_or_else(String::new, |a| (*a).to_string()),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl WorktreeManager for GitWorktrees {
    async fn create_worktree(&self, branch_name: &str) -> Result<PathBuf, WorktreeError> {
        let path = self.worktree_path(branch_name);
        tokio::fs::create_dir_all(&self.worktrees_dir).await?;

        let path_str = path.to_string_lossy().into_owned();
        // -B resets a branch left behind by an earlier attempt.
        self.run_git(
            &self.repo_dir,
            &["worktree", "add", "-B", branch_name, path_str.as_str(), "HEAD"],
        )
        .await?;

        info!(branch = branch_name, path = %path.display(), "created worktree");
        Ok(path)
    }

    async fn assign_files(&self, branch_name: &str, paths: &[PathBuf]) -> Result<(), WorktreeError> {
        if paths.is_empty() {
            return Ok(());
        }
        let worktree = self.worktree_path(branch_name);
        if !tokio::fs::try_exists(&worktree).await? {
            return Err(WorktreeError::UnknownBranch {
                branch: branch_name.to_string(),
            });
        }

        let path_strs: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut args = vec!["add", "--"];
        args.extend(path_strs.iter().map(String::as_str));
        self.run_git(&worktree, &args).await?;

        debug!(branch = branch_name, count = paths.len(), "assigned files");
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError> {
        if tokio::fs::try_exists(path).await? {
            let path_str = path.to_string_lossy().into_owned();
            self.run_git(&self.repo_dir, &["worktree", "remove", "--force", path_str.as_str()])
                .await?;
            info!(path = %path.display(), "removed worktree");
        }
        // Drop metadata of worktrees deleted behind git's back.
        self.run_git(&self.repo_dir, &["worktree", "prune"]).await?;
        Ok(())
    }

    async fn delete_branch(&self, branch_name: &str) -> Result<(), WorktreeError> {
        let exists = self
            .run_git(&self.repo_dir, &["branch", "--list", branch_name])
            .await?;
        if exists.trim().is_empty() {
            return Ok(());
        }
        self.run_git(&self.repo_dir, &["branch", "-D", branch_name])
            .await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryWorktreeState {
    worktrees: BTreeMap<String, PathBuf>,
    assigned: BTreeMap<String, Vec<PathBuf>>,
    removed: BTreeSet<PathBuf>,
}

/// Worktrees as plain directories, with every call recorded.
#[derive(Debug, Clone)]
pub struct MemoryWorktrees {
    root: PathBuf,
    state: Arc<Mutex<MemoryWorktreeState>>,
}

impl MemoryWorktrees {
    /// Create worktree directories under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Arc::new(Mutex::new(MemoryWorktreeState::default())),
        }
    }

    /// Branches with a live worktree.
    pub async fn branches(&self) -> Vec<String> {
        self.state.lock().await.worktrees.keys().cloned().collect()
    }

    /// Files ever assigned to `branch_name`, kept after the branch is deleted.
    pub async fn assigned(&self, branch_name: &str) -> Vec<PathBuf> {
        self.state
            .lock()
            .await
            .assigned
            .get(branch_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Worktree paths that were removed.
    pub async fn removed(&self) -> Vec<PathBuf> {
        self.state.lock().await.removed.iter().cloned().collect()
    }
}

#[async_trait]
impl WorktreeManager for MemoryWorktrees {
    async fn create_worktree(&self, branch_name: &str) -> Result<PathBuf, WorktreeError> {
        let path = self.root.join(worktree_dir_name(branch_name));
        tokio::fs::create_dir_all(&path).await?;
        self.state
            .lock()
            .await
            .worktrees
            .insert(branch_name.to_string(), path.clone());
        Ok(path)
    }

    async fn assign_files(&self, branch_name: &str, paths: &[PathBuf]) -> Result<(), WorktreeError> {
        let mut state = self.state.lock().await;
        if !state.worktrees.contains_key(branch_name) {
            return Err(WorktreeError::UnknownBranch {
                branch: branch_name.to_string(),
            });
        }
        state
            .assigned
            .entry(branch_name.to_string())
            .or_default()
            .extend(paths.iter().cloned());
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut state = self.state.lock().await;
        state.worktrees.retain(|_, p| p.as_path() != path);
        state.removed.insert(path.to_path_buf());
        Ok(())
    }

    async fn delete_branch(&self, branch_name: &str) -> Result<(), WorktreeError> {
        self.state.lock().await.worktrees.remove(branch_name);
        Ok(())
    }
}
