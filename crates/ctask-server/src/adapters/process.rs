//! Concrete `SessionManager`: one subprocess per task, running a
//! configured agent command with the prompt on stdin and output teed to
//! the task's log file.

use async_trait::async_trait;
use ctask_core::{SessionError, SessionManager};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Spawns `agent_command` as a child process per session. Out of scope for
/// this crate's own implementation is *which* agent it runs; the command is
/// entirely configuration-driven (`CTASK_AGENT_COMMAND`), so this adapter
/// carries no assumption about a specific vendor's coding agent.
pub struct ProcessSessionManager {
    agent_command: String,
    sessions: Mutex<HashMap<String, Child>>,
}

impl ProcessSessionManager {
    #[must_use]
    pub fn new(agent_command: impl Into<String>) -> Self {
        Self {
            agent_command: agent_command.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionManager for ProcessSessionManager {
    async fn start(
        &self,
        session_name: &str,
        worktree_path: &str,
        prompt: &str,
        log_path: &str,
    ) -> Result<(), SessionError> {
        let log_file = File::create(log_path)
            .await
            .map_err(|e| SessionError::Start(e.to_string()))?;
        let stdout_fd = log_file
            .try_clone()
            .await
            .map_err(|e| SessionError::Start(e.to_string()))?;
        let stderr_fd = log_file
            .try_clone()
            .await
            .map_err(|e| SessionError::Start(e.to_string()))?;

        let mut child = Command::new(&self.agent_command)
            .current_dir(worktree_path)
            .stdin(Stdio::piped())
            .stdout(stdout_fd.into_std().await)
            .stderr(stderr_fd.into_std().await)
            .spawn()
            .map_err(|e| SessionError::Start(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| SessionError::Start(e.to_string()))?;
        }

        info!(session_name, pid = child.id(), "agent session started");
        self.sessions
            .lock()
            .unwrap()
            .insert(session_name.to_string(), child);
        Ok(())
    }

    async fn is_alive(&self, session_name: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(child) = sessions.get_mut(session_name) else {
            return false;
        };
        matches!(child.try_wait(), Ok(None))
    }

    /// `std`/`tokio` expose no portable "send SIGTERM" on `Child` without an
    /// extra signals crate, so a graceful stop here is the same
    /// `start_kill` the hard-kill path uses; the dispatcher's grace period
    /// still gives a well-behaved agent process a window to flush output
    /// before `is_alive` is rechecked.
    async fn stop_gracefully(&self, session_name: &str) -> Result<(), SessionError> {
        self.kill(session_name).await
    }

    async fn kill(&self, session_name: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(child) = sessions.get_mut(session_name) {
            if let Err(e) = child.start_kill() {
                warn!(session_name, error = %e, "failed to kill session process");
            }
        }
        Ok(())
    }
}
