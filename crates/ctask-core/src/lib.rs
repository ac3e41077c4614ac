//! Domain types, configuration, and collaborator-trait boundaries shared by
//! every subsystem of the code-task orchestrator.

#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod collaborators;
pub mod config;
pub mod credential;
pub mod error;
pub mod state;
pub mod task;
pub mod webhook;

pub use collaborators::{
    CiStatus, ForgeError, PullRequest, SessionError, SessionManager, SourceForge, WorkingCopyError,
    WorkingCopyManager,
};
pub use config::{ConfigError, OrchestratorConfig};
pub use credential::InstallationCredential;
pub use error::{AdmissionError, CancelError};
pub use state::OrchestratorState;
pub use task::{SubmitTaskRequest, Task, TaskError, TaskResult, TaskStatus, WorkerType};
pub use webhook::{PendingWebhook, WebhookPayload};
