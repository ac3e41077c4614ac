//! Thin admission-client CLI for local smoke-testing: `submit`, `cancel`,
//! and `status`, each calling the same signed HTTP contract any other
//! admission client would.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ctask_core::{SubmitTaskRequest, WorkerType};
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "ctask-cli",
    version,
    about = "Smoke-test client for the code-task orchestrator"
)]
struct Cli {
    /// Base URL of a running orchestrator, e.g. http://localhost:8080
    #[arg(
        long,
        env = "CTASK_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    url: String,

    /// Shared dispatch secret used to sign requests.
    #[arg(long, env = "CTASK_DISPATCH_SECRET")]
    dispatch_secret: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new task.
    Submit {
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        repository: String,
        #[arg(long, default_value = "main")]
        base_branch: String,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        webhook_url: String,
        #[arg(long)]
        webhook_secret: String,
        #[arg(long, default_value = "auto")]
        worker_type: String,
    },
    /// Cancel a running task.
    Cancel {
        #[arg(long)]
        task_id: String,
    },
    /// Fetch a task's current record.
    Status {
        #[arg(long)]
        task_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let http = reqwest::Client::new();

    match cli.command {
        Commands::Submit {
            task_id,
            repository,
            base_branch,
            prompt,
            webhook_url,
            webhook_secret,
            worker_type,
        } => {
            let worker_type = match worker_type.as_str() {
                "opus" => WorkerType::Opus,
                "glm" => WorkerType::Glm,
                _ => WorkerType::Auto,
            };
            let req = SubmitTaskRequest {
                task_id,
                worker_type,
                prompt,
                linear_issue_id: None,
                linear_issue_title: None,
                slug: None,
                action_id: None,
                repository,
                base_branch,
                webhook_url,
                webhook_secret,
            };
            let body = serde_json::to_vec(&req)?;
            let response =
                signed_post(&http, &cli.url, "/tasks", &body, &cli.dispatch_secret).await?;
            print_response(response).await
        }
        Commands::Cancel { task_id } => {
            let response = signed_post(
                &http,
                &cli.url,
                &format!("/tasks/{task_id}/cancel"),
                b"",
                &cli.dispatch_secret,
            )
            .await?;
            print_response(response).await
        }
        Commands::Status { task_id } => {
            let response = http
                .get(format!("{}/tasks/{task_id}", cli.url))
                .send()
                .await
                .context("fetching task status")?;
            print_response(response).await
        }
    }
}

async fn signed_post(
    http: &reqwest::Client,
    base_url: &str,
    path: &str,
    body: &[u8],
    secret: &str,
) -> Result<reqwest::Response> {
    let timestamp = chrono::Utc::now().timestamp_millis();
    let signed = ctask_auth::sign(body, timestamp, secret).context("signing request")?;

    http.post(format!("{base_url}{path}"))
        .header(ctask_auth::headers::TIMESTAMP, timestamp.to_string())
        .header(ctask_auth::headers::SIGNATURE, signed.signature)
        .header(ctask_auth::headers::NONCE, ctask_auth::generate_nonce())
        .header("Content-Type", "application/json")
        .body(body.to_vec())
        .send()
        .await
        .context("sending request")
}

async fn print_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    println!("{status}: {}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        bail!("request failed with status {status}");
    }
    Ok(())
}
