//! Lifecycle event payloads and the outbox entry used to retry delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskError, TaskResult};

/// Body of a single lifecycle event delivered to a task's `webhook_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookPayload {
    Log {
        #[serde(rename = "taskId")]
        task_id: String,
        chunk: String,
    },
    Completed {
        #[serde(rename = "taskId")]
        task_id: String,
        result: TaskResult,
    },
    Failed {
        #[serde(rename = "taskId")]
        task_id: String,
        error: TaskError,
    },
    Interrupted {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    Cancelled {
        #[serde(rename = "taskId")]
        task_id: String,
    },
}

impl WebhookPayload {
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            WebhookPayload::Log { task_id, .. }
            | WebhookPayload::Completed { task_id, .. }
            | WebhookPayload::Failed { task_id, .. }
            | WebhookPayload::Interrupted { task_id }
            | WebhookPayload::Cancelled { task_id } => task_id,
        }
    }

    /// `payload.status`, used by receivers to deduplicate at-least-once
    /// deliveries of `(taskId, status)`.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            WebhookPayload::Log { .. } => "log",
            WebhookPayload::Completed { .. } => "completed",
            WebhookPayload::Failed { .. } => "failed",
            WebhookPayload::Interrupted { .. } => "interrupted",
            WebhookPayload::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether this event terminates a task's lifecycle (as opposed to an
    /// in-flight `log` chunk).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WebhookPayload::Log { .. })
    }
}

/// An event queued for (re)delivery because its first send attempt failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWebhook {
    pub task_id: String,
    pub url: String,
    pub payload: WebhookPayload,
    pub signature: String,
    pub timestamp: i64,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
}
