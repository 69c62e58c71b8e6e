use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    common::{ClientError, Result, UserId},
    configs::*,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Bot user id sent in the `User-Id` handshake header.
    pub user_id: UserId,
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default)]
    pub nodes: Vec<NodeOptions>,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = if Path::new("config.toml").exists() {
            "config.toml"
        } else if Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Err(ClientError::Config(
                "config.toml or config.default.toml not found".into(),
            ));
        };

        Self::load_from(config_path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading configuration from: {}", path.display());

        let config_str = std::fs::read_to_string(path)?;
        if config_str.trim().is_empty() {
            return Err(ClientError::Config(format!("{} is empty", path.display())));
        }

        Self::from_toml(&config_str)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(ClientError::Config("shards must be at least 1".into()));
        }

        let mut hosts = HashSet::new();
        for node in &self.nodes {
            if node.host.trim().is_empty() {
                return Err(ClientError::Config("node host must not be empty".into()));
            }
            if !hosts.insert(node.host.as_str()) {
                return Err(ClientError::Config(format!(
                    "node host {} is listed twice",
                    node.host
                )));
            }
        }
        Ok(())
    }
}

fn default_shards() -> u32 {
    1
}
