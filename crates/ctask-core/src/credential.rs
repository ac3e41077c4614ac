//! The installation-credential value the Credential Service maintains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A short-lived source-forge installation access token plus the bookkeeping
/// the Credential Service needs to decide when to refresh it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl InstallationCredential {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    #[must_use]
    pub fn is_expiring_soon(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.expires_at - now < window
    }

    #[must_use]
    pub fn is_auth_degraded(&self) -> bool {
        self.consecutive_failures >= 3
    }
}
