//! The single persisted aggregate: tasks, the cached installation credential,
//! and the webhook outbox.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::credential::InstallationCredential;
use crate::task::Task;
use crate::webhook::PendingWebhook;

/// `{ tasks, githubToken, pendingWebhooks }` — the whole of the orchestrator's
/// durable state, written and read as one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorState {
    #[serde(default)]
    pub tasks: HashMap<String, Task>,
    #[serde(default)]
    pub github_token: Option<InstallationCredential>,
    #[serde(default)]
    pub pending_webhooks: Vec<PendingWebhook>,
}

impl OrchestratorState {
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count()
    }
}
