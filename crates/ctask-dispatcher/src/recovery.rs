//! Crash recovery: hydrate state, re-attach or finalize in-flight tasks,
//! clean up orphaned working copies, and start the background loops.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ctask_core::TaskStatus;
use tracing::{info, warn};

use crate::{timers, Dispatcher};

const CREDENTIAL_REFRESH_INTERVAL: Duration = Duration::from_mins(5);
const WEBHOOK_RETRY_INTERVAL: Duration = Duration::from_mins(1);

/// Load the persisted state, re-adopt or finalize every still-`running`
/// task, delete orphaned working copies, and start the credential and
/// webhook background loops.
///
/// # Errors
///
/// Returns [`ctask_state::PersistError`] if the state file exists but
/// cannot be parsed.
pub async fn recover(dispatcher: &Arc<Dispatcher>) -> Result<(), ctask_state::PersistError> {
    let loaded = ctask_state::load(&dispatcher.state_path).await?;
    let running_count = loaded.running_count();
    dispatcher.webhook.hydrate(loaded.pending_webhooks.clone());

    let running_tasks: Vec<_> = loaded
        .tasks
        .values()
        .filter(|t| t.status == TaskStatus::Running)
        .cloned()
        .collect();

    *dispatcher.state.write().await = loaded;
    dispatcher.running.store(running_count, Ordering::SeqCst);

    for task in running_tasks {
        if dispatcher
            .collaborators
            .session
            .is_alive(&task.session_name)
            .await
        {
            info!(task_id = %task.task_id, "re-adopting running task after restart");
            dispatcher.attach_log_forwarder(&task);
            timers::arm(
                Arc::clone(dispatcher),
                task.task_id.clone(),
                task.created_at,
            );
        } else {
            info!(task_id = %task.task_id, "session gone on restart, classifying outcome");
            dispatcher.finalize_from_classification(&task).await;
        }
    }

    let worktree_base = Path::new(&dispatcher.config.worktree_base_path);
    match ctask_state::detect_orphan_worktrees(worktree_base, &*dispatcher.state.read().await).await
    {
        Ok(orphans) => {
            for orphan in orphans {
                warn!(path = %orphan.display(), "removing orphaned working copy");
                if let Err(e) = dispatcher
                    .collaborators
                    .working_copy
                    .remove(&orphan.display().to_string())
                    .await
                {
                    warn!(path = %orphan.display(), error = %e, "failed to remove orphaned working copy");
                }
            }
        }
        Err(e) => warn!(error = %e, "failed to scan for orphaned working copies"),
    }

    dispatcher
        .credentials
        .start_background_refresh(CREDENTIAL_REFRESH_INTERVAL)
        .await;

    dispatcher.webhook.retry_pending().await;
    spawn_webhook_retry_loop(Arc::clone(dispatcher));

    Ok(())
}

fn spawn_webhook_retry_loop(dispatcher: Arc<Dispatcher>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(WEBHOOK_RETRY_INTERVAL);
        loop {
            ticker.tick().await;
            if dispatcher.is_draining() {
                return;
            }
            dispatcher.webhook.retry_pending().await;
        }
    });
}
