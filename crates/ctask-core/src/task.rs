//! The `Task` aggregate and the values that hang off it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which backing model/agent profile a task runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    Opus,
    Auto,
    Glm,
}

/// Lifecycle status of a task. Terminal variants are absorbing — once set,
/// a task record never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Interrupted,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Outcome of a task that produced and merged-worthy pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub pr_url: String,
    pub branch: String,
    pub commits: u32,
    pub summary: String,
}

/// Machine-readable failure classification, attached to a terminal `failed`
/// or `interrupted` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl TaskError {
    #[must_use]
    pub fn no_pr() -> Self {
        Self {
            code: "no_pr".to_string(),
            message: "Task exited without producing a pull request".to_string(),
            remediation: None,
        }
    }

    #[must_use]
    pub fn ci_failed() -> Self {
        Self {
            code: "ci_failed".to_string(),
            message: "Pull request CI checks did not succeed".to_string(),
            remediation: None,
        }
    }
}

/// Request body accepted by the admission endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_id: String,
    pub worker_type: WorkerType,
    pub prompt: String,
    #[serde(default)]
    pub linear_issue_id: Option<String>,
    #[serde(default)]
    pub linear_issue_title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub action_id: Option<String>,
    pub repository: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    pub webhook_url: String,
    pub webhook_secret: String,
}

fn default_base_branch() -> String {
    "main".to_string()
}

/// The persisted record of a single bounded AI-coding job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub worker_type: WorkerType,
    pub prompt: String,
    #[serde(default)]
    pub linear_issue_id: Option<String>,
    #[serde(default)]
    pub linear_issue_title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub action_id: Option<String>,
    pub repository: String,
    pub base_branch: String,
    pub webhook_url: String,
    pub webhook_secret: String,
    pub status: TaskStatus,
    pub session_name: String,
    pub worktree_path: String,
    pub log_path: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub error: Option<TaskError>,
}

impl Task {
    /// Deterministic terminal-multiplexer session name for a task.
    #[must_use]
    pub fn session_name_for(task_id: &str) -> String {
        format!("ctask-{task_id}")
    }

    /// Branch-naming convention the agent is expected to follow, used to
    /// correlate a produced pull request back to its originating task.
    #[must_use]
    pub fn branch_name(&self) -> String {
        match &self.slug {
            Some(slug) if !slug.is_empty() => format!("ctask/{}-{}", self.task_id, slug),
            _ => format!("ctask/{}", self.task_id),
        }
    }

    pub fn new(
        req: SubmitTaskRequest,
        worktree_base: &str,
        log_base: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let session_name = Self::session_name_for(&req.task_id);
        let worktree_path = format!("{worktree_base}/{}", req.task_id);
        let log_path = format!("{log_base}/{}.log", req.task_id);
        Self {
            task_id: req.task_id,
            worker_type: req.worker_type,
            prompt: req.prompt,
            linear_issue_id: req.linear_issue_id,
            linear_issue_title: req.linear_issue_title,
            slug: req.slug,
            action_id: req.action_id,
            repository: req.repository,
            base_branch: req.base_branch,
            webhook_url: req.webhook_url,
            webhook_secret: req.webhook_secret,
            status: TaskStatus::Running,
            session_name,
            worktree_path,
            log_path,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            result: None,
            error: None,
        }
    }
}
