//! Concrete `SourceForge`: GitHub REST calls for pull-request discovery and
//! aggregate CI status, authenticated with the Credential Service's
//! installation token.

use async_trait::async_trait;
use ctask_core::{CiStatus, ForgeError, PullRequest, SourceForge};
use ctask_credentials::CredentialService;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

pub struct GithubForge {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialService>,
}

impl GithubForge {
    #[must_use]
    pub fn new(base_url: impl Into<String>, credentials: Arc<CredentialService>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }

    async fn bearer(&self) -> Result<String, ForgeError> {
        if let Some(token) = self.credentials.get_token().await {
            return Ok(token);
        }
        self.credentials
            .refresh_token()
            .await
            .map_err(|e| ForgeError::Transport(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GhPullRequest {
    html_url: String,
    head: GhRef,
    #[serde(default)]
    commits: Option<u32>,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct GhRef {
    #[serde(rename = "ref")]
    branch: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GhCheckRunsResponse {
    check_runs: Vec<GhCheckRun>,
}

#[derive(Debug, Deserialize)]
struct GhCheckRun {
    status: String,
    conclusion: Option<String>,
}

#[async_trait]
impl SourceForge for GithubForge {
    async fn find_pull_requests(
        &self,
        repository: &str,
        branch: &str,
    ) -> Result<Vec<PullRequest>, ForgeError> {
        let token = self.bearer().await?;
        let url = format!(
            "{}/repos/{repository}/pulls?head={branch}&state=open",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "ctask-orchestrator")
            .send()
            .await
            .map_err(|e| ForgeError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ForgeError::Transport(format!(
                "GitHub returned {}",
                response.status()
            )));
        }

        let pulls: Vec<GhPullRequest> = response
            .json()
            .await
            .map_err(|e| ForgeError::MalformedResponse(e.to_string()))?;

        Ok(pulls
            .into_iter()
            .map(|p| PullRequest {
                url: p.html_url,
                branch: p.head.branch,
                commits: p.commits.unwrap_or(0),
                summary: p.title,
                head_sha: p.head.sha,
            })
            .collect())
    }

    async fn ci_status(&self, repository: &str, head_sha: &str) -> Result<CiStatus, ForgeError> {
        let token = self.bearer().await?;
        let url = format!(
            "{}/repos/{repository}/commits/{head_sha}/check-runs",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "ctask-orchestrator")
            .send()
            .await
            .map_err(|e| ForgeError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ForgeError::Transport(format!(
                "GitHub returned {}",
                response.status()
            )));
        }

        let body: GhCheckRunsResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::MalformedResponse(e.to_string()))?;

        Ok(aggregate_status(&body.check_runs))
    }
}

/// Fold individual check-run statuses into one aggregate, conservatively:
/// any incomplete run makes the whole thing pending, any failing conclusion
/// makes it a failure.
fn aggregate_status(runs: &[GhCheckRun]) -> CiStatus {
    if runs.is_empty() {
        return CiStatus::Pending;
    }
    let mut worst = CiStatus::Success;
    for run in runs {
        if run.status != "completed" {
            return CiStatus::Pending;
        }
        let status = match run.conclusion.as_deref() {
            Some("success" | "neutral" | "skipped") => CiStatus::Success,
            Some("cancelled") => CiStatus::Cancelled,
            Some("failure" | "timed_out" | "action_required") => CiStatus::Failure,
            other => {
                warn!(
                    ?other,
                    "unrecognized check-run conclusion, treating as failure"
                );
                CiStatus::Failure
            }
        };
        worst = worse_of(worst, status);
    }
    worst
}

fn worse_of(a: CiStatus, b: CiStatus) -> CiStatus {
    fn rank(s: CiStatus) -> u8 {
        match s {
            CiStatus::Success => 0,
            CiStatus::Pending => 1,
            CiStatus::Cancelled => 2,
            CiStatus::Failure | CiStatus::Error => 3,
        }
    }
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_check_runs_is_pending() {
        assert_eq!(aggregate_status(&[]), CiStatus::Pending);
    }

    #[test]
    fn all_successful_is_success() {
        let runs = vec![
            GhCheckRun {
                status: "completed".to_string(),
                conclusion: Some("success".to_string()),
            },
            GhCheckRun {
                status: "completed".to_string(),
                conclusion: Some("neutral".to_string()),
            },
        ];
        assert_eq!(aggregate_status(&runs), CiStatus::Success);
    }

    #[test]
    fn any_incomplete_run_is_pending() {
        let runs = vec![
            GhCheckRun {
                status: "completed".to_string(),
                conclusion: Some("success".to_string()),
            },
            GhCheckRun {
                status: "in_progress".to_string(),
                conclusion: None,
            },
        ];
        assert_eq!(aggregate_status(&runs), CiStatus::Pending);
    }

    #[test]
    fn any_failure_conclusion_wins() {
        let runs = vec![
            GhCheckRun {
                status: "completed".to_string(),
                conclusion: Some("success".to_string()),
            },
            GhCheckRun {
                status: "completed".to_string(),
                conclusion: Some("failure".to_string()),
            },
        ];
        assert_eq!(aggregate_status(&runs), CiStatus::Failure);
    }
}
