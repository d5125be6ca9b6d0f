//! Client configuration
//!
//! Durations are carried as milliseconds so the struct maps one-to-one onto
//! the `[client]` table of the CLI's TOML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection and policy settings for one `ApiClient`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientConfig {
    /// API base, e.g. `https://example.com/api`. Request paths are appended verbatim.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-attempt timeout; `0` disables it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Generic retries after the first attempt (401s never consume these)
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Renewals allowed without an intervening success
    #[serde(default = "default_max_refresh_attempts")]
    pub max_refresh_attempts: u32,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Authentication entry point used for the redirect after an unrecoverable 401
    #[serde(default = "default_login_path")]
    pub login_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            max_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            max_refresh_attempts: default_max_refresh_attempts(),
            refresh_path: default_refresh_path(),
            login_path: default_login_path(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Build the config for a backend origin: trailing slashes are dropped
    /// and `/api` appended.
    pub fn for_api_url(origin: &str) -> Self {
        Self::new(format!("{}/api", origin.trim_end_matches('/')))
    }

    /// Profile used by the application: 15s timeout, one retry after 1s.
    pub fn application(self) -> Self {
        Self {
            timeout_ms: 15_000,
            max_retries: 1,
            retry_delay_ms: 1_000,
            ..self
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_refresh_attempts(mut self, attempts: u32) -> Self {
        self.max_refresh_attempts = attempts;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Absolute URL for a request path.
    pub fn url_for(&self, path: &str) -> String {
        crate::request::join_url(&self.base_url, path)
    }

    pub fn refresh_url(&self) -> String {
        self.url_for(&self.refresh_path)
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_refresh_attempts() -> u32 {
    2
}

fn default_refresh_path() -> String {
    session_auth::REFRESH_PATH.to_string()
}

fn default_login_path() -> String {
    session_auth::LOGIN_PATH.to_string()
}
