//! Classification of a task's outcome once its session is no longer live:
//! did the agent produce a mergeable pull request, and did its CI pass?

use ctask_core::{CiStatus, ForgeError, SourceForge, Task, TaskError, TaskResult};
use tracing::warn;

pub enum Outcome {
    Completed(TaskResult),
    Failed(TaskError),
}

/// Inspect the source-forge for a pull request produced by `task` and
/// classify the result (§4.5.4). A source-forge error or malformed
/// response is treated conservatively as `no_pr`.
pub async fn classify(forge: &dyn SourceForge, task: &Task) -> Outcome {
    let branch = task.branch_name();
    let pulls = match forge.find_pull_requests(&task.repository, &branch).await {
        Ok(pulls) => pulls,
        Err(e) => {
            warn!(task_id = %task.task_id, error = %e, "source-forge lookup failed, classifying as no_pr");
            return Outcome::Failed(TaskError::no_pr());
        }
    };

    let Some(pr) = pulls.into_iter().next() else {
        return Outcome::Failed(TaskError::no_pr());
    };

    let ci = match forge.ci_status(&task.repository, &pr.head_sha).await {
        Ok(status) => status,
        Err(ForgeError::Timeout | ForgeError::Transport(_) | ForgeError::MalformedResponse(_)) => {
            warn!(task_id = %task.task_id, "CI status lookup failed, treating as failure");
            CiStatus::Failure
        }
    };

    if ci.is_passing() {
        Outcome::Completed(TaskResult {
            pr_url: pr.url,
            branch: pr.branch,
            commits: pr.commits,
            summary: pr.summary,
        })
    } else {
        Outcome::Failed(TaskError::ci_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use ctask_core::{PullRequest, SubmitTaskRequest, WorkerType};

    struct FakeForge {
        pulls: Vec<PullRequest>,
        ci: CiStatus,
        fail: bool,
    }

    #[async_trait]
    impl SourceForge for FakeForge {
        async fn find_pull_requests(
            &self,
            _repo: &str,
            _branch: &str,
        ) -> Result<Vec<PullRequest>, ForgeError> {
            if self.fail {
                return Err(ForgeError::Transport("boom".to_string()));
            }
            Ok(self.pulls.clone())
        }

        async fn ci_status(&self, _repo: &str, _sha: &str) -> Result<CiStatus, ForgeError> {
            Ok(self.ci)
        }
    }

    fn task() -> Task {
        let req = SubmitTaskRequest {
            task_id: "t1".to_string(),
            worker_type: WorkerType::Auto,
            prompt: "go".to_string(),
            linear_issue_id: None,
            linear_issue_title: None,
            slug: None,
            action_id: None,
            repository: "ex/repo".to_string(),
            base_branch: "main".to_string(),
            webhook_url: "https://example.com".to_string(),
            webhook_secret: "whsec_x".to_string(),
        };
        Task::new(req, "/worktrees", "/logs", Utc::now())
    }

    fn pr() -> PullRequest {
        PullRequest {
            url: "https://example.com/pull/1".to_string(),
            branch: "ctask/t1".to_string(),
            commits: 3,
            summary: "did the thing".to_string(),
            head_sha: "abc123".to_string(),
        }
    }

    #[tokio::test]
    async fn no_pull_request_is_no_pr_failure() {
        let forge = FakeForge {
            pulls: vec![],
            ci: CiStatus::Success,
            fail: false,
        };
        match classify(&forge, &task()).await {
            Outcome::Failed(e) => assert_eq!(e.code, "no_pr"),
            Outcome::Completed(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn passing_ci_completes_with_the_pr_result() {
        let forge = FakeForge {
            pulls: vec![pr()],
            ci: CiStatus::Success,
            fail: false,
        };
        match classify(&forge, &task()).await {
            Outcome::Completed(result) => {
                assert_eq!(result.pr_url, "https://example.com/pull/1");
                assert_eq!(result.commits, 3);
            }
            Outcome::Failed(_) => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn pending_ci_is_treated_as_passing() {
        let forge = FakeForge {
            pulls: vec![pr()],
            ci: CiStatus::Pending,
            fail: false,
        };
        assert!(matches!(
            classify(&forge, &task()).await,
            Outcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn failing_ci_is_ci_failed() {
        let forge = FakeForge {
            pulls: vec![pr()],
            ci: CiStatus::Failure,
            fail: false,
        };
        match classify(&forge, &task()).await {
            Outcome::Failed(e) => assert_eq!(e.code, "ci_failed"),
            Outcome::Completed(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn forge_error_is_conservative_no_pr() {
        let forge = FakeForge {
            pulls: vec![],
            ci: CiStatus::Success,
            fail: true,
        };
        match classify(&forge, &task()).await {
            Outcome::Failed(e) => assert_eq!(e.code, "no_pr"),
            Outcome::Completed(_) => panic!("expected failure"),
        }
    }
}
