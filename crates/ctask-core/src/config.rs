//! Fully-resolved orchestrator configuration.
//!
//! Everything the dispatcher and its collaborators need is read once, here,
//! at construction time — no leaf function reaches into the process
//! environment on its own.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Error loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Fully-resolved orchestrator configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub port: u16,
    pub capacity: usize,
    pub task_timeout: Duration,
    pub state_file_path: String,
    pub worktree_base_path: String,
    pub log_base_path: String,
    pub dispatch_secret: String,
    pub github_app_id: String,
    pub github_app_private_key_path: String,
    pub github_installation_id: String,
    pub credential_publish_path: String,
}

const DEFAULT_TASK_TIMEOUT_MS: u64 = 7_200_000;

impl OrchestratorConfig {
    /// Load configuration from the process environment, applying the
    /// documented defaults for optional values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is absent or a present
    /// one fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_or("CTASK_PORT", "8080")?;
        let capacity = env_or("CTASK_CAPACITY", "5")?;
        let task_timeout_ms: u64 = env_or_raw("CTASK_TASK_TIMEOUT_MS")
            .map(|v| parse("CTASK_TASK_TIMEOUT_MS", &v))
            .transpose()?
            .unwrap_or(DEFAULT_TASK_TIMEOUT_MS);

        Ok(Self {
            port,
            capacity,
            task_timeout: Duration::from_millis(task_timeout_ms),
            state_file_path: require("CTASK_STATE_FILE_PATH")?,
            worktree_base_path: require("CTASK_WORKTREE_BASE_PATH")?,
            log_base_path: require("CTASK_LOG_BASE_PATH")?,
            dispatch_secret: require("CTASK_DISPATCH_SECRET")?,
            github_app_id: require("CTASK_GITHUB_APP_ID")?,
            github_app_private_key_path: require("CTASK_GITHUB_APP_PRIVATE_KEY_PATH")?,
            github_installation_id: require("CTASK_GITHUB_INSTALLATION_ID")?,
            credential_publish_path: env::var("CTASK_CREDENTIAL_PUBLISH_PATH")
                .unwrap_or_else(|_| "/tmp/ctask-github-token".to_string()),
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn env_or_raw(name: &'static str) -> Option<String> {
    env::var(name).ok()
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn env_or<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = env::var(name).unwrap_or_else(|_| default.to_string());
    parse(name, &value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "CTASK_PORT",
            "CTASK_CAPACITY",
            "CTASK_TASK_TIMEOUT_MS",
            "CTASK_STATE_FILE_PATH",
            "CTASK_WORKTREE_BASE_PATH",
            "CTASK_LOG_BASE_PATH",
            "CTASK_DISPATCH_SECRET",
            "CTASK_GITHUB_APP_ID",
            "CTASK_GITHUB_APP_PRIVATE_KEY_PATH",
            "CTASK_GITHUB_INSTALLATION_ID",
            "CTASK_CREDENTIAL_PUBLISH_PATH",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn missing_required_var_errors() {
        clear_env();
        let err = OrchestratorConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CTASK_STATE_FILE_PATH")));
    }

    #[test]
    #[serial]
    fn defaults_apply_when_optional_vars_absent() {
        clear_env();
        env::set_var("CTASK_STATE_FILE_PATH", "/tmp/state.json");
        env::set_var("CTASK_WORKTREE_BASE_PATH", "/tmp/worktrees");
        env::set_var("CTASK_LOG_BASE_PATH", "/tmp/logs");
        env::set_var("CTASK_DISPATCH_SECRET", "secret");
        env::set_var("CTASK_GITHUB_APP_ID", "123");
        env::set_var("CTASK_GITHUB_APP_PRIVATE_KEY_PATH", "/tmp/key.pem");
        env::set_var("CTASK_GITHUB_INSTALLATION_ID", "456");

        let cfg = OrchestratorConfig::from_env().unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.capacity, 5);
        assert_eq!(
            cfg.task_timeout,
            Duration::from_millis(DEFAULT_TASK_TIMEOUT_MS)
        );
        clear_env();
    }
}
