use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chunkgate_core::RouterConfig;
use chunkgate_meta::MetaConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Full service configuration: the router core plus the metadata database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Routing core parameters.
    #[serde(default)]
    pub router: RouterConfig,
    /// Metadata store parameters.
    #[serde(default)]
    pub meta: MetaConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("default config to parse")
    }
}

impl CliConfig {
    /// Loads configuration from `path`, or the embedded defaults when no
    /// file is given. Fields absent from the file keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
        }
    }
}
