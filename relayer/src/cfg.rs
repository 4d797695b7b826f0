use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Settings for the relayer process itself, as opposed to the registry of chains and paths it manages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Location of the chain and path registry. Defaults to `$HOME/.relayer/config.yml`.
    #[serde(default = "registry_file_default")]
    pub registry_file: PathBuf,
    /// How to reach the relay engine.
    #[serde(default)]
    pub engine: EngineSettings,
    /// Timeout for the status query used to identify a chain when it is registered. Defaults to 10 seconds.
    #[serde(default = "chain_query_timeout_default")]
    pub chain_query_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// JSON-RPC endpoint of the relay engine.
    #[serde(default = "engine_url_default")]
    pub url: String,
    /// Timeout for a single engine request. Handshakes submit several transactions on each chain, so this is
    /// generous. Defaults to 5 minutes.
    #[serde(default = "engine_request_timeout_default")]
    pub request_timeout: Duration,
}

pub fn registry_file_default() -> PathBuf {
    home::home_dir()
        .unwrap_or_default()
        .join(".relayer")
        .join("config.yml")
}

pub fn chain_query_timeout_default() -> Duration {
    Duration::from_secs(10)
}

pub fn engine_url_default() -> String {
    "http://127.0.0.1:26700".to_owned()
}

pub fn engine_request_timeout_default() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            registry_file: registry_file_default(),
            engine: EngineSettings::default(),
            chain_query_timeout: chain_query_timeout_default(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            url: engine_url_default(),
            request_timeout: engine_request_timeout_default(),
        }
    }
}

impl Settings {
    pub fn from_file(file: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(file)
            .with_context(|| format!("Cannot read {}", file.display()))?;
        toml::from_str(&contents).with_context(|| {
            format!(
                "{} does not contain valid relayer settings",
                file.display()
            )
        })
    }
}
