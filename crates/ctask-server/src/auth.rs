//! Inbound HMAC verification for the admission endpoints: timestamp
//! freshness plus nonce replay suppression, on top of the Dispatch
//! Authenticator's signature check.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::AppState;

/// Maximum age of a signed request before it is rejected as stale, matching
/// the webhook verifier's freshness window.
const MAX_REQUEST_AGE_MS: i64 = 60_000;
/// Request bodies above this size are rejected before signature
/// verification is even attempted.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Recently-seen nonces, pruned of entries past [`MAX_REQUEST_AGE_MS`] on
/// every check so the set never grows unbounded.
#[derive(Default)]
pub struct NonceCache {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl NonceCache {
    /// Record `nonce` if it hasn't been seen within the freshness window.
    /// Returns `false` if it's a replay.
    fn check_and_record(&self, nonce: &str) -> bool {
        let now = Utc::now();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, seen_at| (now - *seen_at).num_milliseconds() <= MAX_REQUEST_AGE_MS);
        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_string(), now);
        true
    }
}

/// Axum middleware verifying `X-Dispatch-Timestamp` / `X-Dispatch-Signature`
/// / `X-Dispatch-Nonce` against the configured dispatch secret. Rejects with
/// 401 on any missing header, stale timestamp, replayed nonce, or bad
/// signature. Reconstructs the request body for the downstream handler once
/// verified.
pub async fn require_dispatch_signature(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = req.into_parts();

    let timestamp: i64 = parts
        .headers
        .get(ctask_auth::headers::TIMESTAMP)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let signature = parts
        .headers
        .get(ctask_auth::headers::SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let nonce = parts
        .headers
        .get(ctask_auth::headers::NONCE)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if (Utc::now().timestamp_millis() - timestamp).abs() > MAX_REQUEST_AGE_MS {
        warn!("rejecting stale dispatch-signed request");
        return Err(StatusCode::UNAUTHORIZED);
    }
    if !state.nonces.check_and_record(nonce) {
        warn!(%nonce, "rejecting replayed dispatch nonce");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    if !ctask_auth::verify(&body, timestamp, &state.config.dispatch_secret, signature) {
        warn!("rejecting request with invalid dispatch signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let req = Request::from_parts(parts, axum::body::Body::from(body));
    Ok(next.run(req).await)
}
