use serde::{Deserialize, Serialize};

use crate::node::constants::{
    DEFAULT_MAX_RECONNECT_DELAY_MS, DEFAULT_NODE_PASSWORD, DEFAULT_NODE_PORT,
    DEFAULT_RECONNECT_INTERVAL_MS,
};

/// Connection parameters of one audio node.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeOptions {
    /// Registry key for the node.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket URL. Derived from `host` and `port` when empty.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default = "default_password")]
    pub password: String,
    /// Base reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl NodeOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            address: String::new(),
            region: None,
            password: default_password(),
            reconnect_interval: default_reconnect_interval(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_reconnect_interval(mut self, interval_ms: u64) -> Self {
        self.reconnect_interval = interval_ms;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn websocket_url(&self) -> String {
        if self.address.is_empty() {
            format!("ws://{}:{}", self.host, self.port)
        } else {
            self.address.clone()
        }
    }
}

/// Reconnect strategy applied after an unexpected close.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ReconnectConfig {
    /// Retry every `reconnect_interval` ms.
    Fixed {
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    /// Double the delay from `reconnect_interval` up to `max_delay` ms.
    Exponential {
        #[serde(default = "default_max_delay")]
        max_delay: u64,
        #[serde(default)]
        max_attempts: Option<u32>,
        #[serde(default)]
        jitter: bool,
    },
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::Fixed { max_attempts: None }
    }
}

fn default_port() -> u16 {
    DEFAULT_NODE_PORT
}

fn default_password() -> String {
    DEFAULT_NODE_PASSWORD.to_string()
}

fn default_reconnect_interval() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_RECONNECT_DELAY_MS
}
