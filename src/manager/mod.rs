use std::sync::{Arc, Weak};

use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, warn};

pub mod store;
pub mod voice;

pub use store::PlayerStore;
pub use voice::GatewaySender;

use crate::{
    common::{
        ClientError, Result, now_ms,
        types::{ChannelId, GuildId},
    },
    configs::{Config, NodeOptions},
    node::{Node, NodeIdentity},
    player::{DEFAULT_VOLUME, Player},
    protocol::{
        OP_EVENT, OP_PLAYER_UPDATE, OP_STATS, OutgoingMessage, PlayerUpdate, VoiceServerUpdate,
        VoiceStateEvent, VoiceStateUpdate, op_of,
    },
};

/// What [`PlayerManager::route_message`] did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered and consumed by a subscriber.
    Handled,
    /// Delivered to a player but nobody was subscribed.
    Unhandled,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingOp,
    UnknownOp(String),
    /// Consumed by the node itself (stats).
    NodeScoped,
    MissingGuild,
    NoPlayer(GuildId),
}

/// Owns the node connections and the player registry, and bridges chat
/// gateway voice events to players.
pub struct PlayerManager {
    me: Weak<PlayerManager>,
    identity: NodeIdentity,
    nodes: DashMap<String, Arc<Node>>,
    players: PlayerStore,
    gateway: Arc<dyn GatewaySender>,
    voice_session_id: RwLock<Option<String>>,
}

impl PlayerManager {
    pub fn new(identity: NodeIdentity, gateway: Arc<dyn GatewaySender>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            identity,
            nodes: DashMap::new(),
            players: PlayerStore::new(),
            gateway,
            voice_session_id: RwLock::new(None),
        })
    }

    /// Builds a manager with every node listed in `config` registered.
    pub fn from_config(config: &Config, gateway: Arc<dyn GatewaySender>) -> Result<Arc<Self>> {
        config.validate()?;
        let manager = Self::new(
            NodeIdentity {
                user_id: config.user_id,
                shards: config.shards,
            },
            gateway,
        );
        for options in &config.nodes {
            manager.create_node(options.clone())?;
        }
        Ok(manager)
    }

    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    /// Connects every registered node, returning the hosts that failed.
    pub async fn connect_nodes(&self) -> Vec<(String, ClientError)> {
        let nodes = self.nodes();
        let results = futures::future::join_all(nodes.iter().map(|node| node.connect())).await;

        nodes
            .iter()
            .zip(results)
            .filter_map(|(node, result)| {
                result.err().map(|e| {
                    error!("[{}] Failed to connect node: {}", node.host(), e);
                    (node.host().to_string(), e)
                })
            })
            .collect()
    }

    /// Registers a node keyed by its host and wires its listeners into the
    /// manager. The node is not connected.
    pub fn create_node(&self, options: NodeOptions) -> Result<Arc<Node>> {
        let host = options.host.clone();
        if self.nodes.contains_key(&host) {
            return Err(ClientError::DuplicateNode(host));
        }

        let node = Node::new(options, self.identity);

        let me = self.me.clone();
        node.on_message(move |doc| {
            if let Some(manager) = me.upgrade() {
                manager.route_message(doc);
            }
        });

        let error_host = host.clone();
        node.on_error(move |e| error!("[{}] Node error: {}", error_host, e));

        let ready_host = host.clone();
        node.on_ready(move |_| info!("[{}] Node ready", ready_host));

        let me = self.me.clone();
        let disconnect_host = host.clone();
        node.on_disconnect(move |reason| {
            if let Some(manager) = me.upgrade() {
                manager.handle_node_disconnect(&disconnect_host, reason);
            }
        });

        match self.nodes.entry(host) {
            Entry::Occupied(entry) => {
                node.remove_all_listeners();
                Err(ClientError::DuplicateNode(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                entry.insert(node.clone());
                Ok(node)
            }
        }
    }

    fn handle_node_disconnect(&self, host: &str, reason: &str) {
        let remaining = self
            .nodes
            .iter()
            .filter(|entry| entry.key() != host && !entry.value().is_destroyed())
            .count();

        if remaining == 0 {
            warn!("[{}] No available voice nodes: {}", host, reason);
        } else {
            info!(
                "[{}] Node disconnected ({}); {} node(s) still available",
                host, reason, remaining
            );
        }

        for player in self.players.all() {
            let bound_here = player.node().is_some_and(|node| node.host() == host);
            if bound_here {
                player.disconnect(reason);
            }
        }
    }

    /// Unregisters a node, detaching its listeners and closing it for good.
    pub fn remove_node(&self, host: &str) -> bool {
        let Some((_, node)) = self.nodes.remove(host) else {
            return false;
        };
        node.remove_all_listeners();
        node.destroy();
        info!("[{}] Node removed", host);
        true
    }

    pub fn node(&self, host: &str) -> Option<Arc<Node>> {
        self.nodes.get(host).map(|entry| entry.value().clone())
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn player(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.get(guild_id)
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.all()
    }

    /// Session id of the bot's own voice connection, once reported.
    pub fn voice_session_id(&self) -> Option<String> {
        self.voice_session_id.read().clone()
    }

    /// Dispatches one inbound node frame to the player it names.
    ///
    /// Frames without an `op`, with an unknown `op`, or for a guild without a
    /// player are ignored, never treated as errors.
    pub fn route_message(&self, doc: &Value) -> RouteOutcome {
        let outcome = self.route(doc);
        if let RouteOutcome::Ignored(reason) = &outcome {
            debug!("Ignored node frame: {:?}", reason);
        }
        outcome
    }

    fn route(&self, doc: &Value) -> RouteOutcome {
        let Some(op) = op_of(doc) else {
            return RouteOutcome::Ignored(IgnoreReason::MissingOp);
        };

        match op {
            OP_EVENT => {
                let player = match self.player_for(doc) {
                    Ok(player) => player,
                    Err(reason) => return RouteOutcome::Ignored(reason),
                };
                if player.handle_event(doc) {
                    RouteOutcome::Handled
                } else {
                    RouteOutcome::Unhandled
                }
            }
            OP_PLAYER_UPDATE => {
                let player = match self.player_for(doc) {
                    Ok(player) => player,
                    Err(reason) => return RouteOutcome::Ignored(reason),
                };
                match serde_json::from_value::<PlayerUpdate>(doc.clone()) {
                    Ok(update) => {
                        player.apply_update(&update.state);
                        RouteOutcome::Handled
                    }
                    Err(e) => {
                        debug!("[{}] Unreadable playerUpdate: {}", player.guild_id(), e);
                        RouteOutcome::Unhandled
                    }
                }
            }
            OP_STATS => RouteOutcome::Ignored(IgnoreReason::NodeScoped),
            other => RouteOutcome::Ignored(IgnoreReason::UnknownOp(other.to_string())),
        }
    }

    fn player_for(&self, doc: &Value) -> std::result::Result<Arc<Player>, IgnoreReason> {
        let guild_id = doc
            .get("guildId")
            .and_then(GuildId::from_json)
            .ok_or(IgnoreReason::MissingGuild)?;
        self.players
            .get(guild_id)
            .ok_or(IgnoreReason::NoPlayer(guild_id))
    }

    /// Asks the chat gateway to join `channel_id` and registers a player for
    /// the guild bound to the node at `host`.
    ///
    /// If the guild already has a player it is reused and its channel updated.
    pub fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        host: &str,
        muted: bool,
        deafened: bool,
    ) -> Result<Arc<Player>> {
        let node = self.resolve_node(host)?;

        self.gateway.send_voice_state(&VoiceStateUpdate::join(
            guild_id, channel_id, muted, deafened,
        ));

        let (player, inserted) = self.players.get_or_insert_with(guild_id, || {
            Player::new(guild_id, channel_id, Some(node.clone()), self.gateway.clone())
        });
        if !inserted {
            player.switch_channel(channel_id, false);
            if player.node().is_none() {
                player.set_node(node);
            }
        } else {
            debug!("[{}] Player created on node {}", guild_id, host);
        }
        Ok(player)
    }

    /// Returns the guild's player, creating one bound to `host` if needed.
    pub fn spawn_player(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        host: &str,
    ) -> Result<Arc<Player>> {
        if let Some(player) = self.players.get(guild_id) {
            if player.node().is_none() {
                player.set_node(self.resolve_node(host)?);
            }
            return Ok(player);
        }

        let node = self.resolve_node(host)?;
        let (player, _) = self.players.get_or_insert_with(guild_id, || {
            Player::new(guild_id, channel_id, Some(node), self.gateway.clone())
        });
        Ok(player)
    }

    /// Leaves the guild's voice channel and tears its player down.
    ///
    /// The leave frame is sent even when no player exists; returns whether a
    /// player was removed.
    pub fn leave(&self, guild_id: GuildId) -> bool {
        self.gateway
            .send_voice_state(&VoiceStateUpdate::leave(guild_id));

        let Some(player) = self.players.remove(guild_id) else {
            return false;
        };
        player.remove_all_listeners();
        player.destroy();
        debug!("[{}] Player removed", guild_id);
        true
    }

    /// Moves a player to the node at `host`, replaying its voice handshake and
    /// resuming the current track from its last known position.
    ///
    /// Returns `Ok(false)` if the guild has no player.
    pub fn move_player(&self, guild_id: GuildId, host: &str) -> Result<bool> {
        let target = self.resolve_node(host)?;
        let Some(player) = self.players.get(guild_id) else {
            return Ok(false);
        };

        if let Some(current) = player.node() {
            if Arc::ptr_eq(&current, &target) {
                return Ok(true);
            }
            current.send(&OutgoingMessage::Destroy { guild_id });
        }
        player.set_node(target);

        let state = player.state();
        if let Some(voice) = &state.voice {
            player.connect(&voice.session_id, &voice.event);
        }
        if let Some(track) = state.track.as_deref().filter(|_| state.playing) {
            player.play(track, Some(state.estimated_position(now_ms())), None);
            if state.paused {
                player.pause(true);
            }
        }
        if state.volume != DEFAULT_VOLUME {
            player.set_volume(state.volume);
        }

        info!("[{}] Player moved to node {}", guild_id, host);
        Ok(true)
    }

    /// Chat gateway reported a voice state change. Only the bot's own state
    /// matters; its session id is recorded for the next voice server update.
    pub fn handle_voice_state_update(&self, event: &VoiceStateEvent) -> bool {
        if event.user_id != self.identity.user_id {
            return false;
        }
        *self.voice_session_id.write() = Some(event.session_id.clone());

        let player = event.guild_id.and_then(|guild_id| self.players.get(guild_id));
        if let (Some(player), Some(channel_id)) = (player, event.channel_id) {
            player.switch_channel(channel_id, false);
        }
        true
    }

    /// Chat gateway assigned a voice server; forwards the handshake to the
    /// guild's player. Ignored without a player, a session id or an endpoint.
    pub fn handle_voice_server_update(&self, event: &VoiceServerUpdate) -> bool {
        let Some(player) = self.players.get(event.guild_id) else {
            return false;
        };
        let Some(session_id) = self.voice_session_id() else {
            debug!("[{}] Voice server update before session id", event.guild_id);
            return false;
        };
        if event.endpoint.is_none() {
            debug!("[{}] Voice server update without endpoint", event.guild_id);
            return false;
        }
        player.connect(&session_id, event)
    }

    fn resolve_node(&self, host: &str) -> Result<Arc<Node>> {
        self.node(host)
            .ok_or_else(|| ClientError::InvalidHost(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::types::UserId,
        testing::{RecordingGateway, drain_frames},
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const OWN_USER: UserId = UserId(7);

    fn manager() -> (Arc<PlayerManager>, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let manager = PlayerManager::new(
            NodeIdentity {
                user_id: OWN_USER,
                shards: 1,
            },
            gateway.clone(),
        );
        (manager, gateway)
    }

    #[test]
    fn test_create_node_rejects_duplicate_host() {
        let (manager, _) = manager();
        manager.create_node(NodeOptions::new("a", 1)).unwrap();
        assert!(matches!(
            manager.create_node(NodeOptions::new("a", 2)),
            Err(ClientError::DuplicateNode(_))
        ));
        assert_eq!(manager.nodes().len(), 1);
    }

    #[test]
    fn test_spawn_player_unknown_host() {
        let (manager, _) = manager();
        let err = manager
            .spawn_player(GuildId(1), ChannelId(1), "nowhere")
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "INVALID_HOST: No available node with nowhere");
    }

    #[test]
    fn test_spawn_player_is_idempotent() {
        let (manager, _) = manager();
        manager.create_node(NodeOptions::new("a", 1)).unwrap();
        let first = manager.spawn_player(GuildId(1), ChannelId(1), "a").unwrap();
        let second = manager.spawn_player(GuildId(1), ChannelId(2), "a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.channel_id(), ChannelId(1));
    }

    #[test]
    fn test_join_sends_frame_and_registers_player() {
        let (manager, gateway) = manager();
        manager.create_node(NodeOptions::new("a", 1)).unwrap();

        let player = manager
            .join(GuildId(5), ChannelId(9), "a", true, false)
            .unwrap();
        assert!(player.node().is_some());
        assert_eq!(
            gateway.frames(),
            vec![json!({
                "op": 4,
                "d": {"guild_id": "5", "channel_id": "9", "self_mute": true, "self_deaf": false}
            })]
        );
        assert!(Arc::ptr_eq(&manager.player(GuildId(5)).unwrap(), &player));
    }

    #[test]
    fn test_leave() {
        let (manager, gateway) = manager();
        let node = manager.create_node(NodeOptions::new("a", 1)).unwrap();
        let (_, rx) = node.attach_test_socket();
        manager.spawn_player(GuildId(5), ChannelId(9), "a").unwrap();

        assert!(manager.leave(GuildId(5)));
        assert!(manager.player(GuildId(5)).is_none());
        assert_eq!(drain_frames(&rx), vec![json!({"op": "destroy", "guildId": "5"})]);

        assert!(!manager.leave(GuildId(5)));
        let frames = gateway.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1]["d"]["channel_id"], Value::Null);
    }

    #[test]
    fn test_route_stuck_event_stops_player() {
        let (manager, _) = manager();
        let node = manager.create_node(NodeOptions::new("a", 1)).unwrap();
        let (_, rx) = node.attach_test_socket();
        let player = manager.spawn_player(GuildId(8), ChannelId(1), "a").unwrap();
        player.play("abc", None, None);

        let ends = Arc::new(AtomicUsize::new(0));
        let counter = ends.clone();
        player.on_end(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let outcome = manager.route_message(&json!({
            "op": "event",
            "guildId": "8",
            "type": "TrackStuckEvent",
            "thresholdMs": 10000
        }));
        assert_eq!(outcome, RouteOutcome::Handled);
        assert!(!player.is_playing());
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert_eq!(drain_frames(&rx).last().unwrap()["op"], "stop");
    }

    #[test]
    fn test_route_ignores_misses() {
        let (manager, _) = manager();
        assert_eq!(
            manager.route_message(&json!({"guildId": "1"})),
            RouteOutcome::Ignored(IgnoreReason::MissingOp)
        );
        assert_eq!(
            manager.route_message(&json!({"op": "ready"})),
            RouteOutcome::Ignored(IgnoreReason::UnknownOp("ready".into()))
        );
        assert_eq!(
            manager.route_message(&json!({"op": "event", "type": "TrackEndEvent"})),
            RouteOutcome::Ignored(IgnoreReason::MissingGuild)
        );
        assert_eq!(
            manager.route_message(&json!({"op": "event", "guildId": 3, "type": "TrackEndEvent"})),
            RouteOutcome::Ignored(IgnoreReason::NoPlayer(GuildId(3)))
        );
        assert_eq!(
            manager.route_message(&json!({"op": "stats", "players": 0})),
            RouteOutcome::Ignored(IgnoreReason::NodeScoped)
        );
    }

    #[test]
    fn test_route_player_update() {
        let (manager, _) = manager();
        manager.create_node(NodeOptions::new("a", 1)).unwrap();
        let player = manager.spawn_player(GuildId(8), ChannelId(1), "a").unwrap();

        let outcome = manager.route_message(&json!({
            "op": "playerUpdate",
            "guildId": "8",
            "state": {"time": 1000, "position": 4200, "connected": true}
        }));
        assert_eq!(outcome, RouteOutcome::Handled);
        let state = player.state();
        assert_eq!(state.position, 4200);
        assert_eq!(state.last_update, Some(1000));
        assert_eq!(state.connected, Some(true));
    }

    #[test]
    fn test_voice_bridge() {
        let (manager, _) = manager();
        let node = manager.create_node(NodeOptions::new("a", 1)).unwrap();
        let (_, rx) = node.attach_test_socket();
        manager.spawn_player(GuildId(5), ChannelId(9), "a").unwrap();

        let server = VoiceServerUpdate {
            token: "tok".into(),
            guild_id: GuildId(5),
            endpoint: Some("voice.example:443".into()),
        };
        // No session id yet.
        assert!(!manager.handle_voice_server_update(&server));

        let foreign = VoiceStateEvent {
            guild_id: Some(GuildId(5)),
            user_id: UserId(99),
            channel_id: Some(ChannelId(9)),
            session_id: "theirs".into(),
        };
        assert!(!manager.handle_voice_state_update(&foreign));
        assert_eq!(manager.voice_session_id(), None);

        let own = VoiceStateEvent {
            user_id: OWN_USER,
            session_id: "ours".into(),
            channel_id: Some(ChannelId(10)),
            ..foreign
        };
        assert!(manager.handle_voice_state_update(&own));
        assert_eq!(manager.player(GuildId(5)).unwrap().channel_id(), ChannelId(10));

        assert!(manager.handle_voice_server_update(&server));
        let frames = drain_frames(&rx);
        assert_eq!(frames[0]["op"], "voiceUpdate");
        assert_eq!(frames[0]["sessionId"], "ours");

        let no_player = VoiceServerUpdate {
            guild_id: GuildId(6),
            ..server
        };
        assert!(!manager.handle_voice_server_update(&no_player));
    }

    #[test]
    fn test_move_player_replays_handshake_and_track() {
        let (manager, _) = manager();
        let a = manager.create_node(NodeOptions::new("a", 1)).unwrap();
        let b = manager.create_node(NodeOptions::new("b", 1)).unwrap();
        let (_, rx_a) = a.attach_test_socket();
        let (_, rx_b) = b.attach_test_socket();

        let player = manager.spawn_player(GuildId(5), ChannelId(9), "a").unwrap();
        player.connect(
            "sess",
            &VoiceServerUpdate {
                token: "tok".into(),
                guild_id: GuildId(5),
                endpoint: Some("voice.example:443".into()),
            },
        );
        player.play("abc", None, None);
        drain_frames(&rx_a);

        assert!(manager.move_player(GuildId(5), "b").unwrap());
        assert_eq!(drain_frames(&rx_a), vec![json!({"op": "destroy", "guildId": "5"})]);

        let ops: Vec<_> = drain_frames(&rx_b)
            .iter()
            .map(|frame| frame["op"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(ops, ["voiceUpdate", "play"]);
        assert_eq!(player.node().unwrap().host(), "b");
        assert!(!manager.move_player(GuildId(6), "b").unwrap());
    }

    #[test]
    fn test_lost_node_disconnects_its_players_only() {
        let (manager, _) = manager();
        let a = manager.create_node(NodeOptions::new("a", 1)).unwrap();
        let b = manager.create_node(NodeOptions::new("b", 1)).unwrap();
        let (_, _rx_a) = a.attach_test_socket();
        let (_, _rx_b) = b.attach_test_socket();

        let on_a = manager.spawn_player(GuildId(1), ChannelId(1), "a").unwrap();
        let on_b = manager.spawn_player(GuildId(2), ChannelId(2), "b").unwrap();
        on_a.play("abc", None, None);
        on_b.play("def", None, None);

        let reasons = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = reasons.clone();
        on_a.on_disconnect(move |r| sink.lock().push(r.to_string()));
        let untouched = Arc::new(AtomicUsize::new(0));
        let counter = untouched.clone();
        on_b.on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // "b" is still live here.
        a.destroy();
        assert!(!on_a.is_playing());
        assert_eq!(reasons.lock().as_slice(), ["destroy"]);
        assert!(on_b.is_playing());
        assert_eq!(untouched.load(Ordering::SeqCst), 0);

        // Nothing left afterwards.
        b.destroy();
        assert!(!on_b.is_playing());
        assert_eq!(untouched.load(Ordering::SeqCst), 1);
        assert_eq!(reasons.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_nodes_reports_failures() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let (manager, _) = manager();
        manager
            .create_node(NodeOptions::new("127.0.0.1", port))
            .unwrap();

        let failures = manager.connect_nodes().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "127.0.0.1");
        assert!(matches!(failures[0].1, ClientError::Transport(_)));
        assert!(!manager.node("127.0.0.1").unwrap().is_connected());
    }

    #[test]
    fn test_remove_node() {
        let (manager, _) = manager();
        let node = manager.create_node(NodeOptions::new("a", 1)).unwrap();
        assert!(manager.remove_node("a"));
        assert!(!manager.remove_node("a"));
        assert!(node.is_destroyed());
        assert!(node.listeners().message.is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = Config::from_toml(
            r#"
            user_id = "42"
            shards = 2

            [[nodes]]
            host = "one"
            port = 2333

            [[nodes]]
            host = "two"
            port = 2334
            "#,
        )
        .unwrap();
        let gateway: Arc<dyn GatewaySender> = Arc::new(|_: &VoiceStateUpdate| {});
        let manager = PlayerManager::from_config(&config, gateway).unwrap();
        assert_eq!(manager.nodes().len(), 2);
        assert_eq!(manager.identity().shards, 2);
        assert!(manager.node("two").is_some());
    }
}
