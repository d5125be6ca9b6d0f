//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Unlike a long-running service the CLI runs without a config file; a file
//! that exists but does not parse is still an error.

use std::path::{Path, PathBuf};

use api_client::ClientConfig;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Where the session tokens live between invocations
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
        }
    }
}

fn default_credentials_file() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config/apictl/credentials.json"),
        None => PathBuf::from("apictl-credentials.json"),
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `API_URL` is a backend origin; it replaces `client.base_url` with
    /// `{origin}/api`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        if let Ok(origin) = std::env::var("API_URL")
            && !origin.trim().is_empty()
        {
            config.client.base_url = ClientConfig::for_api_url(origin.trim()).base_url;
        }

        if !config.client.base_url.starts_with("http://")
            && !config.client.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.client.base_url
            )));
        }

        if config.client.timeout_ms == 0 {
            return Err(common::Error::Config(
                "timeout_ms must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("apictl.toml")
    }
}
