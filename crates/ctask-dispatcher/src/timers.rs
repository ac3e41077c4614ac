//! Warning/kill timeout timers and the completion poller, armed per task on
//! admission and re-armed per task during crash recovery.
//!
//! Each timer and the poller run as their own `tokio::spawn`ed task; a panic
//! in one is isolated by the runtime and never propagates to another task's
//! timer, satisfying the "one task's error can't kill the monitor for
//! others" requirement without extra bookkeeping.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use ctask_core::TaskStatus;
use tracing::warn;

use crate::{Dispatcher, COMPLETION_POLL_INTERVAL, WARNING_LEAD_TIME};

/// Arm the warning timer, the kill timer, and the completion poller for a
/// task. Because both timers compute their deadline from `created_at`
/// rather than "now", calling this again after a restart naturally re-arms
/// them with the correct remaining time.
pub fn arm(dispatcher: Arc<Dispatcher>, task_id: String, created_at: DateTime<Utc>) {
    spawn_warning(Arc::clone(&dispatcher), task_id.clone(), created_at);
    spawn_kill(Arc::clone(&dispatcher), task_id.clone(), created_at);
    spawn_poller(dispatcher, task_id);
}

fn until(deadline: DateTime<Utc>) -> StdDuration {
    (deadline - Utc::now())
        .to_std()
        .unwrap_or(StdDuration::ZERO)
}

fn spawn_warning(dispatcher: Arc<Dispatcher>, task_id: String, created_at: DateTime<Utc>) {
    tokio::spawn(async move {
        let deadline = created_at + dispatcher.task_timeout() - WARNING_LEAD_TIME;
        tokio::time::sleep(until(deadline)).await;

        if let Some(task) = dispatcher.get_task(&task_id).await {
            if task.status == TaskStatus::Running {
                warn!(task_id = %task_id, "task approaching its timeout");
            }
        }
    });
}

fn spawn_kill(dispatcher: Arc<Dispatcher>, task_id: String, created_at: DateTime<Utc>) {
    tokio::spawn(async move {
        let deadline = created_at + dispatcher.task_timeout();
        tokio::time::sleep(until(deadline)).await;

        let lock = dispatcher.task_lock(&task_id);
        let _guard = lock.lock().await;
        let Some(task) = dispatcher.get_task(&task_id).await else {
            return;
        };
        if task.status != TaskStatus::Running {
            return; // already transitioned before the deadline: no-op
        }
        dispatcher
            .finalize(&task, TaskStatus::Interrupted, None, None)
            .await;
    });
}

fn spawn_poller(dispatcher: Arc<Dispatcher>, task_id: String) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(COMPLETION_POLL_INTERVAL).await;

            let Some(task) = dispatcher.get_task(&task_id).await else {
                return;
            };
            if task.status != TaskStatus::Running {
                return;
            }
            if dispatcher
                .collaborators
                .session
                .is_alive(&task.session_name)
                .await
            {
                continue;
            }

            let lock = dispatcher.task_lock(&task_id);
            let _guard = lock.lock().await;
            let Some(task) = dispatcher.get_task(&task_id).await else {
                return;
            };
            if task.status != TaskStatus::Running {
                return;
            }
            dispatcher.finalize_from_classification(&task).await;
            return;
        }
    });
}
