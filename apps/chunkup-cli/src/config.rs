//! CLI configuration.
//!
//! Read from `<config dir>/chunkup/config.json`:
//!
//! ```json
//! {
//!   "client": { "base_url": "http://localhost:8080" },
//!   "engine": { "chunk_size": 1048576, "max_retries": 3, "retry_delay_ms": 1000 },
//!   "state_dir": "/home/me/.config/chunkup"
//! }
//! ```
//!
//! Every field is optional.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chunkup_client::ClientConfig;
use chunkup_engine::{EngineConfig, config_dir, default_state_dir};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Where `transfers.json` and `credentials.json` live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl CliConfig {
    /// Loads the default config file.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads `path`. A missing file yields defaults; so does an unparsable
    /// one, with a warning.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    pub fn state_dir(&self) -> anyhow::Result<PathBuf> {
        self.state_dir
            .clone()
            .or_else(default_state_dir)
            .context("cannot determine a state directory; set `state_dir` in the config file")
    }
}

fn config_path() -> anyhow::Result<PathBuf> {
    let dir = config_dir().context("cannot determine the config directory")?;
    Ok(dir.join("chunkup").join("config.json"))
}
