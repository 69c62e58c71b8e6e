use std::sync::Arc;

use rustalink_client::{
    common::logger, configs::Config, manager::PlayerManager, protocol::VoiceStateUpdate,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    logger::init(config.logging.as_ref());

    // No chat gateway is attached here; voice state frames are only logged.
    let gateway = Arc::new(|update: &VoiceStateUpdate| {
        info!(
            "Voice state update for guild {}: channel={:?}",
            update.guild_id, update.channel_id
        );
    });
    let manager = PlayerManager::from_config(&config, gateway)?;

    for (host, e) in manager.connect_nodes().await {
        warn!("[{}] Node unavailable: {}", host, e);
    }
    info!(
        "{} node(s) registered, {} ready",
        manager.nodes().len(),
        manager.nodes().iter().filter(|node| node.is_ready()).count()
    );

    tokio::signal::ctrl_c().await?;

    for node in manager.nodes() {
        let stats = node.stats();
        info!(
            "[{}] Shutting down: {} player(s), {} playing",
            node.host(),
            stats.players,
            stats.playing_players
        );
        manager.remove_node(node.host());
    }
    Ok(())
}
