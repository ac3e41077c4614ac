//! Log forwarder: tails a task's session log file and streams newly
//! appended bytes to its webhook as `log` events (§4.5.2 step 6).
//!
//! Spawned in [`crate::Dispatcher::submit_task`] once the session starts,
//! stopped in `finalize`, and re-attached in [`crate::recovery::recover`]
//! for tasks re-adopted after a restart. Delivery failures are the webhook
//! client's concern: [`ctask_webhook::WebhookClient::send_log`] drops (and
//! counts) a chunk once its own short retry budget is exhausted rather than
//! persisting it, since logs are streamed, not stored.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use ctask_core::WebhookPayload;
use ctask_webhook::OutboundWebhook;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::debug;

use crate::Dispatcher;

const TAIL_INTERVAL: StdDuration = StdDuration::from_secs(2);

/// Spawn the tailing loop for a task, returning a handle the caller can
/// `abort()` to stop it. Runs until aborted; there is no natural end
/// condition from the forwarder's own perspective, since it only observes
/// the log file, not the task's lifecycle.
pub fn spawn(
    dispatcher: Arc<Dispatcher>,
    task_id: String,
    log_path: String,
    webhook_url: String,
    webhook_secret: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut offset: u64 = 0;
        let mut ticker = tokio::time::interval(TAIL_INTERVAL);
        loop {
            ticker.tick().await;
            match read_new_chunk(&log_path, &mut offset).await {
                Ok(Some(chunk)) => {
                    let _ = dispatcher
                        .webhook
                        .send_log(OutboundWebhook {
                            task_id: task_id.clone(),
                            url: webhook_url.clone(),
                            payload: WebhookPayload::Log {
                                task_id: task_id.clone(),
                                chunk,
                            },
                            webhook_secret: webhook_secret.clone(),
                        })
                        .await;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(task_id = %task_id, error = %e, "log tail read failed");
                }
            }
        }
    })
}

/// Read whatever has been appended to `log_path` since `offset`, advancing
/// it. A not-yet-created log file (the session hasn't written anything yet)
/// is not an error.
async fn read_new_chunk(log_path: &str, offset: &mut u64) -> std::io::Result<Option<String>> {
    let mut file = match tokio::fs::File::open(log_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let len = file.metadata().await?.len();
    if len <= *offset {
        return Ok(None);
    }

    file.seek(SeekFrom::Start(*offset)).await?;
    let mut buf = Vec::with_capacity(usize::try_from(len - *offset).unwrap_or(0));
    file.read_to_end(&mut buf).await?;
    *offset = len;

    if buf.is_empty() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn first_read_returns_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.log");
        tokio::fs::write(&path, b"hello\n").await.unwrap();

        let mut offset = 0;
        let chunk = read_new_chunk(path.to_str().unwrap(), &mut offset)
            .await
            .unwrap();
        assert_eq!(chunk, Some("hello\n".to_string()));
        assert_eq!(offset, 6);
    }

    #[tokio::test]
    async fn second_read_only_returns_newly_appended_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.log");
        tokio::fs::write(&path, b"hello\n").await.unwrap();

        let mut offset = 0;
        read_new_chunk(path.to_str().unwrap(), &mut offset)
            .await
            .unwrap();

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"world\n").await.unwrap();
        file.flush().await.unwrap();

        let chunk = read_new_chunk(path.to_str().unwrap(), &mut offset)
            .await
            .unwrap();
        assert_eq!(chunk, Some("world\n".to_string()));
    }

    #[tokio::test]
    async fn missing_log_file_is_not_an_error() {
        let mut offset = 0;
        let chunk = read_new_chunk("/nonexistent/path.log", &mut offset)
            .await
            .unwrap();
        assert_eq!(chunk, None);
    }

    #[tokio::test]
    async fn no_new_bytes_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.log");
        tokio::fs::write(&path, b"hello\n").await.unwrap();

        let mut offset = 6;
        let chunk = read_new_chunk(path.to_str().unwrap(), &mut offset)
            .await
            .unwrap();
        assert_eq!(chunk, None);
    }
}
