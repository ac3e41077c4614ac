//! State Persister: atomic load/save of the single orchestrator state
//! document, and orphan working-copy detection.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ctask_core::OrchestratorState;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read state file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write state file: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to parse state file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load the state document at `path`. A missing file yields the empty
/// aggregate rather than an error. A stale `.tmp` sibling left behind by a
/// crashed `save` is removed.
///
/// # Errors
///
/// Returns [`PersistError`] for any I/O failure other than the target file
/// being absent, or for a present-but-unparseable file.
pub async fn load(path: &Path) -> Result<OrchestratorState, PersistError> {
    let tmp = tmp_path(path);
    if tokio::fs::metadata(&tmp).await.is_ok() {
        warn!(path = %tmp.display(), "removing stale state temp file from a crashed save");
        let _ = tokio::fs::remove_file(&tmp).await;
    }

    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no state file yet, starting empty");
            Ok(OrchestratorState::default())
        }
        Err(e) => Err(PersistError::Read(e)),
    }
}

/// Atomically replace the state document at `path` with `state`: write to a
/// sibling temp file, then rename over the target so readers never observe a
/// truncated file.
///
/// # Errors
///
/// Returns [`PersistError`] if any I/O step fails. Failures are fail-fast —
/// `save` does not retry.
pub async fn save(path: &Path, state: &OrchestratorState) -> Result<(), PersistError> {
    let tmp = tmp_path(path);
    let bytes = serde_json::to_vec_pretty(state)?;
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(PersistError::Write)?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(PersistError::Write)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// List subdirectories of `worktree_base` whose name is not a known task id
/// in `state` — candidates for deletion during recovery.
///
/// # Errors
///
/// Returns an I/O error if `worktree_base` cannot be read. A missing
/// directory is treated as having no orphans.
pub async fn detect_orphan_worktrees(
    worktree_base: &Path,
    state: &OrchestratorState,
) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut entries = match tokio::fs::read_dir(worktree_base).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut orphans = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !state.tasks.contains_key(name) {
            orphans.push(entry.path());
        }
    }
    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ctask_core::{SubmitTaskRequest, Task, WorkerType};

    fn sample_request(task_id: &str) -> SubmitTaskRequest {
        SubmitTaskRequest {
            task_id: task_id.to_string(),
            worker_type: WorkerType::Auto,
            prompt: "do the thing".to_string(),
            linear_issue_id: None,
            linear_issue_title: None,
            slug: None,
            action_id: None,
            repository: "ex/repo".to_string(),
            base_branch: "main".to_string(),
            webhook_url: "https://example.com/hook".to_string(),
            webhook_secret: "whsec_test".to_string(),
        }
    }

    #[tokio::test]
    async fn load_of_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = load(&path).await.unwrap();
        assert!(state.tasks.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = OrchestratorState::default();
        let task = Task::new(sample_request("t1"), "/worktrees", "/logs", Utc::now());
        state.tasks.insert(task.task_id.clone(), task);

        save(&path, &state).await.unwrap();
        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded.tasks.len(), 1);
        assert!(loaded.tasks.contains_key("t1"));
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save(&path, &OrchestratorState::default()).await.unwrap();
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn load_removes_a_stale_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(tmp_path(&path), b"garbage").await.unwrap();

        let state = load(&path).await.unwrap();
        assert!(state.tasks.is_empty());
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn orphan_detection_finds_directories_with_no_matching_task() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("t1")).await.unwrap();
        tokio::fs::create_dir(dir.path().join("orphan"))
            .await
            .unwrap();

        let mut state = OrchestratorState::default();
        let task = Task::new(sample_request("t1"), "/worktrees", "/logs", Utc::now());
        state.tasks.insert(task.task_id.clone(), task);

        let orphans = detect_orphan_worktrees(dir.path(), &state).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].file_name().unwrap(), "orphan");
    }

    #[tokio::test]
    async fn orphan_detection_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let orphans = detect_orphan_worktrees(&missing, &OrchestratorState::default())
            .await
            .unwrap();
        assert!(orphans.is_empty());
    }
}
