//! Trait boundaries for the external collaborators this crate's operations
//! are specified only at interface level against: the working-copy manager,
//! the terminal-multiplexer session manager, and the source-forge.
//!
//! Concrete adapters (a real git-worktree shell-out, a real tmux driver, a
//! real GitHub client) live outside this crate; tests plug in fakes.

use async_trait::async_trait;
use thiserror::Error;

/// Aggregate CI status of a pull request's head commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiStatus {
    Success,
    Pending,
    Failure,
    Error,
    Cancelled,
}

impl CiStatus {
    /// Whether this status should be treated as a passing build for the
    /// purposes of completion classification (§4.5.4).
    #[must_use]
    pub fn is_passing(self) -> bool {
        matches!(self, CiStatus::Success | CiStatus::Pending)
    }
}

/// A pull request discovered on the source-forge, correlated to a task by
/// its head branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub url: String,
    pub branch: String,
    pub commits: u32,
    pub summary: String,
    pub head_sha: String,
}

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("source-forge request timed out")]
    Timeout,
    #[error("source-forge returned malformed data: {0}")]
    MalformedResponse(String),
    #[error("source-forge request failed: {0}")]
    Transport(String),
}

/// Inspects the source-forge for pull requests and CI outcomes produced by a
/// task's agent run. Out of scope for this crate's own implementation; only
/// the interface is specified here (§6).
#[async_trait]
pub trait SourceForge: Send + Sync {
    /// List (at most one is expected) pull requests whose head branch
    /// matches `branch` in `repository`.
    async fn find_pull_requests(
        &self,
        repository: &str,
        branch: &str,
    ) -> Result<Vec<PullRequest>, ForgeError>;

    /// Aggregate CI status for a commit.
    async fn ci_status(&self, repository: &str, head_sha: &str) -> Result<CiStatus, ForgeError>;
}

#[derive(Debug, Error)]
pub enum WorkingCopyError {
    #[error("failed to create working copy: {0}")]
    Create(String),
    #[error("failed to remove working copy: {0}")]
    Remove(String),
}

/// Creates and tears down the isolated, version-controlled checkout a task
/// runs its agent inside. Out of scope for this crate's own implementation;
/// only the interface is specified here (§6).
#[async_trait]
pub trait WorkingCopyManager: Send + Sync {
    /// Create a fresh checkout at `{worktree_base_path}/{task_id}` on
    /// `branch`, forked from `base_branch`, returning the absolute path.
    /// `branch` must be the task's [`Task::branch_name`](crate::Task::branch_name)
    /// so that pull-request correlation later searches the branch that was
    /// actually created.
    async fn create(
        &self,
        task_id: &str,
        repository: &str,
        base_branch: &str,
        branch: &str,
    ) -> Result<String, WorkingCopyError>;

    /// Delete a previously created working copy. Idempotent: removing an
    /// already-absent path is not an error.
    async fn remove(&self, path: &str) -> Result<(), WorkingCopyError>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to start session: {0}")]
    Start(String),
    #[error("failed to stop session: {0}")]
    Stop(String),
}

/// Launches and supervises the terminal-multiplexer session that runs the AI
/// agent process. Out of scope for this crate's own implementation; only the
/// interface is specified here (§6).
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Start an isolated session named `session_name`, running the agent
    /// against `worktree_path` with `prompt`, teeing output to `log_path`.
    async fn start(
        &self,
        session_name: &str,
        worktree_path: &str,
        prompt: &str,
        log_path: &str,
    ) -> Result<(), SessionError>;

    /// Whether the session (and its process tree) is still live.
    async fn is_alive(&self, session_name: &str) -> bool;

    /// Request a graceful stop (e.g. a polite termination signal).
    async fn stop_gracefully(&self, session_name: &str) -> Result<(), SessionError>;

    /// Force-terminate the session and its process tree unconditionally.
    async fn kill(&self, session_name: &str) -> Result<(), SessionError>;
}
