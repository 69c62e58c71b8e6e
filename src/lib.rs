pub mod common;
pub mod configs;
pub mod manager;
pub mod node;
pub mod player;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testing;

pub use common::{ClientError, Result};
pub use configs::{Config, NodeOptions, ReconnectConfig};
pub use manager::{GatewaySender, PlayerManager, RouteOutcome};
pub use node::{Node, NodeIdentity, ReconnectPolicy};
pub use player::{Player, PlayerState};
