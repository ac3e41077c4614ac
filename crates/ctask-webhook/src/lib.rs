//! Webhook Client: authenticated, at-least-once delivery of task lifecycle
//! events with a persistent retry outbox.

#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use ctask_core::{PendingWebhook, WebhookPayload};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

const SEND_TIMEOUT: StdDuration = StdDuration::from_secs(10);
const BACKOFF_BASE_SECS: i64 = 30;
const BACKOFF_CEILING_SECS: i64 = 600;
/// Attempts budget before a permanently-failing outbox entry is dropped
/// rather than retried forever.
const MAX_ATTEMPTS: u32 = 10;
/// Attempts budget for a single `log` chunk. Log chunks are a best-effort,
/// in-memory stream rather than durable state, so they get a short, bounded
/// retry instead of the persistent outbox's long backoff schedule.
const LOG_MAX_ATTEMPTS: u32 = 3;
const LOG_RETRY_DELAY: StdDuration = StdDuration::from_secs(1);

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("failed to serialize webhook payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("webhook delivery failed: {0}")]
    Delivery(String),
}

/// A lifecycle event to deliver, addressed to a single task's webhook URL
/// and signed with its per-task secret.
pub struct OutboundWebhook {
    pub task_id: String,
    pub url: String,
    pub payload: WebhookPayload,
    pub webhook_secret: String,
}

/// Delivers signed lifecycle events and retries failed deliveries from a
/// persistent outbox. Exclusively owns the `pendingWebhooks` collection of
/// the orchestrator's durable state.
pub struct WebhookClient {
    http: reqwest::Client,
    pending: Mutex<Vec<PendingWebhook>>,
    dropped: AtomicU64,
    log_dropped: AtomicU64,
}

impl Default for WebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            pending: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
            log_dropped: AtomicU64::new(0),
        }
    }

    /// Count of pending lifecycle webhooks permanently dropped after
    /// exhausting the outbox's retry attempts budget. Operator visibility
    /// only, not part of persisted state.
    #[must_use]
    pub fn get_dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Count of `log` chunks permanently dropped after exhausting the log
    /// forwarder's (much shorter) retry budget — the backpressure counter of
    /// §9, distinct from [`Self::get_dropped_count`]'s lifecycle-webhook
    /// outbox. Operator visibility only, not part of persisted state.
    #[must_use]
    pub fn get_log_dropped_count(&self) -> u64 {
        self.log_dropped.load(Ordering::Relaxed)
    }

    /// Sign and attempt delivery of a single `log` chunk, retrying a short,
    /// bounded number of times. Unlike [`Self::send`], a failing chunk is
    /// never persisted to the outbox — logs are a best-effort stream, not
    /// durable state — it is simply dropped and counted once the retry
    /// budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Serialize`] only if the payload cannot be
    /// JSON-encoded; delivery failures are swallowed and counted.
    pub async fn send_log(&self, event: OutboundWebhook) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(&event.payload)?;
        let timestamp = Utc::now().timestamp_millis();
        let signed = ctask_auth::sign(&body, timestamp, &event.webhook_secret)
            .map_err(|e| WebhookError::Delivery(e.to_string()))?;

        for attempt in 1..=LOG_MAX_ATTEMPTS {
            match deliver(&self.http, &event.url, &body, &signed).await {
                Ok(()) => {
                    debug!(task_id = %event.task_id, "log chunk delivered");
                    return Ok(());
                }
                Err(e) => {
                    warn!(task_id = %event.task_id, attempt, error = %e, "log chunk delivery failed");
                    if attempt < LOG_MAX_ATTEMPTS {
                        tokio::time::sleep(LOG_RETRY_DELAY).await;
                    }
                }
            }
        }
        self.log_dropped.fetch_add(1, Ordering::Relaxed);
        warn!(task_id = %event.task_id, "dropping log chunk after exhausting retry budget");
        Ok(())
    }

    /// Restore a previously persisted outbox, e.g. on startup recovery.
    pub fn hydrate(&self, pending: Vec<PendingWebhook>) {
        *self.pending.lock().unwrap() = pending;
    }

    /// Snapshot the current outbox, for the caller to persist.
    #[must_use]
    pub fn snapshot_pending(&self) -> Vec<PendingWebhook> {
        self.pending.lock().unwrap().clone()
    }

    #[must_use]
    pub fn get_pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Sign and deliver one event. On non-2xx or transport failure, enqueues
    /// it in the retry outbox rather than returning an error — delivery is
    /// at-least-once, not synchronous-or-bust.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Serialize`] only if the payload cannot be
    /// JSON-encoded; delivery failures are swallowed into the outbox.
    pub async fn send(&self, event: OutboundWebhook) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(&event.payload)?;
        let timestamp = Utc::now().timestamp_millis();
        let signed = ctask_auth::sign(&body, timestamp, &event.webhook_secret)
            .map_err(|e| WebhookError::Delivery(e.to_string()))?;

        match deliver(&self.http, &event.url, &body, &signed).await {
            Ok(()) => {
                debug!(task_id = %event.task_id, status = event.payload.status(), "webhook delivered");
                Ok(())
            }
            Err(e) => {
                warn!(task_id = %event.task_id, error = %e, "webhook delivery failed, enqueuing for retry");
                self.pending.lock().unwrap().push(PendingWebhook {
                    task_id: event.task_id,
                    url: event.url,
                    payload: event.payload,
                    signature: signed.signature,
                    timestamp,
                    attempts: 1,
                    next_attempt_at: Utc::now() + backoff(1),
                });
                Ok(())
            }
        }
    }

    /// Resend every outbox entry whose `next_attempt_at` has passed.
    /// Entries that succeed are removed; entries that fail again have their
    /// attempt count bumped and backoff recomputed.
    pub async fn retry_pending(&self) {
        let now = Utc::now();
        let ready: Vec<PendingWebhook> = {
            let mut pending = self.pending.lock().unwrap();
            let (ready, not_ready): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|p| p.next_attempt_at <= now);
            *pending = not_ready;
            ready
        };

        if ready.is_empty() {
            return;
        }
        info!(count = ready.len(), "retrying pending webhooks");

        for mut entry in ready {
            let body = match serde_json::to_vec(&entry.payload) {
                Ok(body) => body,
                Err(e) => {
                    warn!(task_id = %entry.task_id, error = %e, "dropping unserializable pending webhook");
                    continue;
                }
            };
            let signed = ctask_auth::Signed {
                timestamp: entry.timestamp,
                signature: entry.signature.clone(),
            };

            match deliver(&self.http, &entry.url, &body, &signed).await {
                Ok(()) => {
                    debug!(task_id = %entry.task_id, attempts = entry.attempts, "pending webhook delivered");
                }
                Err(e) => {
                    entry.attempts += 1;
                    if entry.attempts >= MAX_ATTEMPTS {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(task_id = %entry.task_id, attempts = entry.attempts, "dropping webhook after exhausting retry budget");
                        continue;
                    }
                    entry.next_attempt_at = Utc::now() + backoff(entry.attempts);
                    warn!(task_id = %entry.task_id, attempts = entry.attempts, error = %e, "pending webhook retry failed");
                    self.pending.lock().unwrap().push(entry);
                }
            }
        }
    }
}

async fn deliver(
    http: &reqwest::Client,
    url: &str,
    body: &[u8],
    signed: &ctask_auth::Signed,
) -> Result<(), String> {
    let response = http
        .post(url)
        .timeout(SEND_TIMEOUT)
        .header(ctask_auth::headers::TIMESTAMP, signed.timestamp.to_string())
        .header(ctask_auth::headers::SIGNATURE, signed.signature.clone())
        .header("Content-Type", "application/json")
        .body(body.to_vec())
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("webhook receiver returned {}", response.status()))
    }
}

/// Exponential backoff with jitter, capped at a 10-minute ceiling: base 30s
/// doubled per attempt, plus up to 1s of jitter to avoid thundering-herd
/// retries.
fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_SECS.saturating_mul(1i64 << attempt.saturating_sub(1).min(20));
    let capped = exp.min(BACKOFF_CEILING_SECS);
    let jitter_ms = rand::thread_rng().gen_range(0..1000);
    Duration::seconds(capped) + Duration::milliseconds(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctask_core::WebhookPayload;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn log_event(task_id: &str, url: String) -> OutboundWebhook {
        OutboundWebhook {
            task_id: task_id.to_string(),
            url,
            payload: WebhookPayload::Log {
                task_id: task_id.to_string(),
                chunk: "building...".to_string(),
            },
            webhook_secret: "whsec_test".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_send_does_not_enqueue() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = WebhookClient::new();
        client.send(log_event("t1", server.uri())).await.unwrap();
        assert_eq!(client.get_pending_count(), 0);
    }

    #[tokio::test]
    async fn failed_send_enqueues_for_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = WebhookClient::new();
        client.send(log_event("t1", server.uri())).await.unwrap();
        assert_eq!(client.get_pending_count(), 1);
    }

    #[tokio::test]
    async fn retry_pending_removes_entries_that_now_succeed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = WebhookClient::new();
        client.hydrate(vec![PendingWebhook {
            task_id: "t1".to_string(),
            url: server.uri(),
            payload: WebhookPayload::Cancelled {
                task_id: "t1".to_string(),
            },
            signature: "deadbeef".to_string(),
            timestamp: 1000,
            attempts: 1,
            next_attempt_at: Utc::now() - Duration::seconds(1),
        }]);

        client.retry_pending().await;
        assert_eq!(client.get_pending_count(), 0);
    }

    #[tokio::test]
    async fn retry_pending_skips_entries_not_yet_due() {
        let client = WebhookClient::new();
        client.hydrate(vec![PendingWebhook {
            task_id: "t1".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            payload: WebhookPayload::Cancelled {
                task_id: "t1".to_string(),
            },
            signature: "deadbeef".to_string(),
            timestamp: 1000,
            attempts: 1,
            next_attempt_at: Utc::now() + Duration::hours(1),
        }]);

        client.retry_pending().await;
        assert_eq!(client.get_pending_count(), 1);
    }

    #[tokio::test]
    async fn retry_pending_bumps_attempts_on_repeated_failure() {
        let client = WebhookClient::new();
        client.hydrate(vec![PendingWebhook {
            task_id: "t1".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            payload: WebhookPayload::Cancelled {
                task_id: "t1".to_string(),
            },
            signature: "deadbeef".to_string(),
            timestamp: 1000,
            attempts: 1,
            next_attempt_at: Utc::now() - Duration::seconds(1),
        }]);

        client.retry_pending().await;
        let pending = client.snapshot_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 2);
    }

    #[tokio::test]
    async fn send_log_delivers_without_touching_the_outbox() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = WebhookClient::new();
        client
            .send_log(log_event("t1", server.uri()))
            .await
            .unwrap();
        assert_eq!(client.get_pending_count(), 0);
        assert_eq!(client.get_log_dropped_count(), 0);
    }

    #[tokio::test]
    async fn send_log_drops_and_counts_after_exhausting_its_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = WebhookClient::new();
        client
            .send_log(log_event("t1", server.uri()))
            .await
            .unwrap();
        assert_eq!(client.get_log_dropped_count(), 1);
        assert_eq!(
            client.get_pending_count(),
            0,
            "log drops never join the outbox"
        );
    }

    #[test]
    fn backoff_is_capped_at_the_ceiling() {
        let d = backoff(20);
        assert!(d.num_seconds() <= BACKOFF_CEILING_SECS + 1);
    }

    #[test]
    fn backoff_grows_with_attempt_count() {
        assert!(backoff(1).num_seconds() < backoff(3).num_seconds());
    }
}
