use thiserror::Error;

/// Errors surfaced by node connections, players and the manager.
///
/// Transport and parse failures are delivered through node error listeners and
/// never tear down the process. Only caller-facing operations such as
/// `spawn_player` or `connect` return them directly.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An outbound message could not be encoded; the frame was dropped.
    #[error("failed to serialize outbound message: {0}")]
    Serialization(#[source] serde_json::Error),

    /// An inbound frame was not valid JSON; the frame was dropped.
    #[error("failed to parse inbound frame: {0}")]
    Parse(#[source] serde_json::Error),

    /// Socket-level failure.
    #[error("websocket error: {0}")]
    Transport(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("invalid handshake header {name}: {value:?}")]
    InvalidHeader { name: &'static str, value: String },

    /// The caller referenced a node host that is not registered.
    #[error("INVALID_HOST: No available node with {0}")]
    InvalidHost(String),

    #[error("a node with host {0} is already registered")]
    DuplicateNode(String),

    #[error("node {0} already has a live socket")]
    AlreadyConnected(String),

    #[error("node {0} has been destroyed")]
    Destroyed(String),

    #[error("node {host} gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { host: String, attempts: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(Box::new(e))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
