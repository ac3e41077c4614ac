//! Orchestrator binary: wires the Task Dispatcher and its concrete
//! collaborators into the admission HTTP server and runs it with graceful
//! shutdown.

use std::sync::Arc;

use anyhow::Context;
use ctask_core::OrchestratorConfig;
use ctask_credentials::{CredentialConfig, CredentialService};
use ctask_dispatcher::{Collaborators, Dispatcher};
use ctask_server::adapters::{GitWorkingCopy, GithubForge, ProcessSessionManager};
use ctask_server::{build_router, AppState, NonceCache};
use ctask_webhook::WebhookClient;
use tracing::{info, warn};

const GITHUB_API_BASE_URL: &str = "https://api.github.com";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .json()
        .init();

    let config = OrchestratorConfig::from_env().context("loading orchestrator configuration")?;
    let addr = format!("0.0.0.0:{}", config.port);

    let credentials = CredentialService::new(CredentialConfig {
        app_id: config.github_app_id.clone(),
        private_key_path: config.github_app_private_key_path.clone().into(),
        installation_id: config.github_installation_id.clone(),
        forge_base_url: GITHUB_API_BASE_URL.to_string(),
        publish_path: config.credential_publish_path.clone().into(),
    });

    let repo_root = std::env::var("CTASK_REPO_ROOT").unwrap_or_else(|_| ".".to_string());
    let agent_command =
        std::env::var("CTASK_AGENT_COMMAND").unwrap_or_else(|_| "claude".to_string());

    let collaborators = Collaborators {
        forge: Arc::new(GithubForge::new(
            GITHUB_API_BASE_URL,
            Arc::clone(&credentials),
        )),
        working_copy: Arc::new(GitWorkingCopy::new(
            config.worktree_base_path.clone(),
            repo_root,
        )),
        session: Arc::new(ProcessSessionManager::new(agent_command)),
    };

    let webhook = Arc::new(WebhookClient::new());
    let dispatcher = Dispatcher::new(config.clone(), collaborators, webhook, credentials);

    if let Err(e) = ctask_dispatcher::recover(&dispatcher).await {
        warn!(error = %e, "failed to load persisted state, starting from empty state");
    }

    let state = AppState {
        config: config.clone(),
        dispatcher: Arc::clone(&dispatcher),
        nonces: Arc::new(NonceCache::default()),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("binding admission HTTP listener")?;
    info!(%addr, "orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(dispatcher))
        .await
        .context("running admission HTTP server")?;

    Ok(())
}

async fn shutdown_signal(dispatcher: Arc<Dispatcher>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, draining");
    dispatcher.begin_draining();
}
