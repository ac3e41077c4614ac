//! Concrete `WorkingCopyManager`: isolated checkouts via `git worktree`,
//! shelled out to the system `git` binary.

use async_trait::async_trait;
use ctask_core::{WorkingCopyError, WorkingCopyManager};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

pub struct GitWorkingCopy {
    worktree_base_path: String,
    /// Bare clone (or any already-checked-out repository) that
    /// `git worktree add` branches off of.
    repo_root: String,
}

impl GitWorkingCopy {
    #[must_use]
    pub fn new(worktree_base_path: impl Into<String>, repo_root: impl Into<String>) -> Self {
        Self {
            worktree_base_path: worktree_base_path.into(),
            repo_root: repo_root.into(),
        }
    }
}

#[async_trait]
impl WorkingCopyManager for GitWorkingCopy {
    async fn create(
        &self,
        task_id: &str,
        _repository: &str,
        base_branch: &str,
        branch: &str,
    ) -> Result<String, WorkingCopyError> {
        let path = format!("{}/{task_id}", self.worktree_base_path);

        debug!(path = %path, branch = %branch, "creating git worktree");
        let output = Command::new("git")
            .args(["worktree", "add", "-b", branch, &path, base_branch])
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| WorkingCopyError::Create(e.to_string()))?;

        if !output.status.success() {
            return Err(WorkingCopyError::Create(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(path)
    }

    async fn remove(&self, path: &str) -> Result<(), WorkingCopyError> {
        if !Path::new(path).exists() {
            return Ok(());
        }
        let output = Command::new("git")
            .args(["worktree", "remove", "--force", path])
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| WorkingCopyError::Remove(e.to_string()))?;

        if !output.status.success() {
            return Err(WorkingCopyError::Remove(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(())
    }
}
