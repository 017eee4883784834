use mcpbroker_core::config::ResourceConfig;
use mcpbroker_core::consent::NewConsent;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub consent: ConsentConfig,

    #[serde(default)]
    pub resources: ResourceConfig,

    #[serde(default)]
    pub builtin: BuiltinConfig,

    /// Grants registered at startup
    #[serde(default)]
    pub grants: Vec<NewConsent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsentConfig {
    /// Allow calls that no grant covers
    #[serde(default)]
    pub auto_consent: bool,
}

/// Servers the binary starts in-process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltinConfig {
    #[serde(default = "default_true")]
    pub calculator: bool,

    /// Root directory served as `resource://files/...`; no files server when unset
    #[serde(default)]
    pub files_root: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self {
            calculator: default_true(),
            files_root: None,
        }
    }
}

impl HostConfig {
    /// Load from `path`, or defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
