//! Task Dispatcher: the heart of the orchestrator. Composes the
//! working-copy manager, session manager, webhook client, credential
//! service, and state persister into admission, lifecycle, timeout, and
//! recovery logic.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod classify;
mod log_forward;
mod recovery;
mod timers;

pub use recovery::recover;
pub use timers::arm as arm_timers;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use ctask_core::{
    AdmissionError, CancelError, OrchestratorConfig, OrchestratorState, SessionManager,
    SourceForge, Task, TaskError, TaskResult, TaskStatus, WebhookPayload, WorkingCopyManager,
};
use ctask_credentials::CredentialService;
use ctask_webhook::{OutboundWebhook, WebhookClient};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{error, info, instrument, warn};

pub use classify::Outcome;

const CANCEL_GRACE_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);
const WARNING_LEAD_TIME: chrono::Duration = chrono::Duration::minutes(5);
const COMPLETION_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// The dispatcher's collaborators, held as trait objects so a single
/// `Dispatcher` type can be constructed with any concrete adapters (or
/// fakes, in tests).
pub struct Collaborators {
    pub forge: Arc<dyn SourceForge>,
    pub working_copy: Arc<dyn WorkingCopyManager>,
    pub session: Arc<dyn SessionManager>,
}

/// Admission, lifecycle, timeout, and recovery logic for bounded AI-coding
/// jobs. All mutation of the `tasks` map goes through a single serialized
/// writer: the per-task lock obtained by [`Dispatcher::task_lock`].
pub struct Dispatcher {
    config: OrchestratorConfig,
    collaborators: Collaborators,
    webhook: Arc<WebhookClient>,
    credentials: Arc<CredentialService>,
    state: RwLock<OrchestratorState>,
    state_path: PathBuf,
    running: AtomicUsize,
    task_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    log_forwarders: StdMutex<HashMap<String, tokio::task::JoinHandle<()>>>,
    draining: AtomicBool,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        webhook: Arc<WebhookClient>,
        credentials: Arc<CredentialService>,
    ) -> Arc<Self> {
        let state_path = PathBuf::from(config.state_file_path.clone());
        Arc::new(Self {
            config,
            collaborators,
            webhook,
            credentials,
            state: RwLock::new(OrchestratorState::default()),
            state_path,
            running: AtomicUsize::new(0),
            task_locks: StdMutex::new(HashMap::new()),
            log_forwarders: StdMutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn get_capacity(&self) -> usize {
        self.config.capacity
    }

    #[must_use]
    pub fn get_running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.state.read().await.tasks.get(task_id).cloned()
    }

    /// Stop admitting new tasks and stop background timers. Running tasks
    /// are left to their session manager and will be re-adopted on restart.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn task_lock(&self, task_id: &str) -> Arc<AsyncMutex<()>> {
        self.task_locks
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Attach the log forwarder for `task`, replacing any handle already
    /// registered for its id (there shouldn't be one, but admission and
    /// recovery both call this and must not leak a stale task's handle).
    fn attach_log_forwarder(self: &Arc<Self>, task: &Task) {
        let handle = log_forward::spawn(
            Arc::clone(self),
            task.task_id.clone(),
            task.log_path.clone(),
            task.webhook_url.clone(),
            task.webhook_secret.clone(),
        );
        if let Some(previous) = self
            .log_forwarders
            .lock()
            .unwrap()
            .insert(task.task_id.clone(), handle)
        {
            previous.abort();
        }
    }

    fn stop_log_forwarder(&self, task_id: &str) {
        if let Some(handle) = self.log_forwarders.lock().unwrap().remove(task_id) {
            handle.abort();
        }
    }

    async fn persist(
        &self,
        state: &mut OrchestratorState,
    ) -> Result<(), ctask_state::PersistError> {
        state.pending_webhooks = self.webhook.snapshot_pending();
        ctask_state::save(&self.state_path, state).await
    }

    fn task_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.task_timeout).unwrap_or(chrono::Duration::hours(2))
    }

    /// Admit a task: persist its `running` record, create its working copy,
    /// launch its session, attach its log forwarder, arm its timers, and
    /// start its completion poller. Any failure after persistence reverts
    /// the record and the counter in the same step that observed it.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::AtCapacity`] if already at the configured
    /// capacity, or [`AdmissionError::ServiceError`] if any collaborator
    /// step fails.
    #[instrument(skip(self, req), fields(task_id = %req.task_id))]
    pub async fn submit_task(
        self: &Arc<Self>,
        req: ctask_core::SubmitTaskRequest,
    ) -> Result<(), AdmissionError> {
        if self.is_draining() {
            return Err(AdmissionError::ServiceError(
                "orchestrator is draining".to_string(),
            ));
        }
        if self.running.load(Ordering::SeqCst) >= self.config.capacity {
            return Err(AdmissionError::AtCapacity);
        }

        let task_id = req.task_id.clone();
        let lock = self.task_lock(&task_id);
        let _guard = lock.lock().await;

        {
            let state = self.state.read().await;
            if let Some(existing) = state.tasks.get(&task_id) {
                if !existing.status.is_terminal() {
                    return Err(AdmissionError::ServiceError(format!(
                        "task {task_id} is already running"
                    )));
                }
            }
        }

        self.running.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let task = Task::new(
            req,
            &self.config.worktree_base_path,
            &self.config.log_base_path,
            now,
        );

        if let Err(e) = self.record_task(task.clone()).await {
            self.running.fetch_sub(1, Ordering::SeqCst);
            return Err(AdmissionError::ServiceError(e.to_string()));
        }

        if let Err(e) = self
            .collaborators
            .working_copy
            .create(
                &task.task_id,
                &task.repository,
                &task.base_branch,
                &task.branch_name(),
            )
            .await
        {
            warn!(task_id = %task.task_id, error = %e, "working copy creation failed, reverting admission");
            self.revert_admission(&task_id).await;
            return Err(AdmissionError::ServiceError(e.to_string()));
        }

        if let Err(e) = self
            .collaborators
            .session
            .start(
                &task.session_name,
                &task.worktree_path,
                &task.prompt,
                &task.log_path,
            )
            .await
        {
            warn!(task_id = %task.task_id, error = %e, "session start failed, reverting admission");
            let _ = self
                .collaborators
                .working_copy
                .remove(&task.worktree_path)
                .await;
            self.revert_admission(&task_id).await;
            return Err(AdmissionError::ServiceError(e.to_string()));
        }

        info!(task_id = %task.task_id, "task admitted");
        self.attach_log_forwarder(&task);
        timers::arm(Arc::clone(self), task.task_id.clone(), now);
        Ok(())
    }

    async fn record_task(&self, task: Task) -> Result<(), ctask_state::PersistError> {
        let mut state = self.state.write().await;
        state.tasks.insert(task.task_id.clone(), task);
        self.persist(&mut state).await
    }

    async fn revert_admission(&self, task_id: &str) {
        let mut state = self.state.write().await;
        state.tasks.remove(task_id);
        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = self.persist(&mut state).await {
            error!(task_id = %task_id, error = %e, "failed to persist admission revert");
        }
    }

    /// Cancel a running task: request a graceful stop, wait a bounded
    /// period, then force-kill if the session is still alive. The terminal
    /// `cancelled` transition fires exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`CancelError::NotFound`] for an unknown task id, or
    /// [`CancelError::AlreadyCompleted`] if the task is already terminal.
    #[instrument(skip(self))]
    pub async fn cancel_task(self: &Arc<Self>, task_id: &str) -> Result<(), CancelError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let task = {
            let state = self.state.read().await;
            state
                .tasks
                .get(task_id)
                .cloned()
                .ok_or(CancelError::NotFound)?
        };
        if task.status.is_terminal() {
            return Err(CancelError::AlreadyCompleted);
        }

        let _ = self
            .collaborators
            .session
            .stop_gracefully(&task.session_name)
            .await;
        tokio::time::sleep(CANCEL_GRACE_PERIOD).await;
        if self
            .collaborators
            .session
            .is_alive(&task.session_name)
            .await
        {
            let _ = self.collaborators.session.kill(&task.session_name).await;
        }

        self.finalize(&task, TaskStatus::Cancelled, None, None)
            .await;
        Ok(())
    }

    /// Perform the common terminal transition: set status/`completed_at`,
    /// enqueue the terminal webhook, stop the log forwarder, release
    /// resources, decrement the running counter, and persist.
    async fn finalize(
        &self,
        task: &Task,
        status: TaskStatus,
        result: Option<TaskResult>,
        error: Option<TaskError>,
    ) {
        let payload = terminal_payload(&task.task_id, status, result.clone(), error.clone());

        {
            let mut state = self.state.write().await;
            if let Some(t) = state.tasks.get_mut(&task.task_id) {
                t.status = status;
                t.completed_at = Some(Utc::now());
                t.result = result;
                t.error = error;
            }
            if let Err(e) = self.persist(&mut state).await {
                error!(task_id = %task.task_id, error = %e, "failed to persist terminal transition");
            }
        }

        let _ = self
            .webhook
            .send(OutboundWebhook {
                task_id: task.task_id.clone(),
                url: task.webhook_url.clone(),
                payload,
                webhook_secret: task.webhook_secret.clone(),
            })
            .await;

        // send() may have enqueued a retry; persist the outbox again so a
        // crash between here and the next retry tick doesn't lose it.
        {
            let mut state = self.state.write().await;
            if let Err(e) = self.persist(&mut state).await {
                error!(task_id = %task.task_id, error = %e, "failed to persist webhook outbox");
            }
        }

        self.stop_log_forwarder(&task.task_id);

        if self
            .collaborators
            .session
            .is_alive(&task.session_name)
            .await
        {
            let _ = self.collaborators.session.kill(&task.session_name).await;
        }
        let _ = self
            .collaborators
            .working_copy
            .remove(&task.worktree_path)
            .await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        info!(task_id = %task.task_id, status = ?status, "task finalized");
    }

    /// Inspect the source-forge and finalize a task whose session is no
    /// longer live, as either the timeout path or completion detection.
    async fn finalize_from_classification(&self, task: &Task) {
        match classify::classify(self.collaborators.forge.as_ref(), task).await {
            Outcome::Completed(result) => {
                self.finalize(task, TaskStatus::Completed, Some(result), None)
                    .await;
            }
            Outcome::Failed(err) => {
                self.finalize(task, TaskStatus::Failed, None, Some(err))
                    .await;
            }
        }
    }
}

fn terminal_payload(
    task_id: &str,
    status: TaskStatus,
    result: Option<TaskResult>,
    error: Option<TaskError>,
) -> WebhookPayload {
    match status {
        TaskStatus::Completed => WebhookPayload::Completed {
            task_id: task_id.to_string(),
            result: result.expect("completed transition always carries a result"),
        },
        TaskStatus::Failed => WebhookPayload::Failed {
            task_id: task_id.to_string(),
            error: error.expect("failed transition always carries an error"),
        },
        TaskStatus::Interrupted => WebhookPayload::Interrupted {
            task_id: task_id.to_string(),
        },
        TaskStatus::Cancelled => WebhookPayload::Cancelled {
            task_id: task_id.to_string(),
        },
        TaskStatus::Running => unreachable!("finalize is only called on terminal transitions"),
    }
}
