use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

pub mod state;

pub use state::{DEFAULT_VOLUME, MAX_VOLUME, PlayerState, VoiceSession};

use crate::{
    common::{
        ListenerId, Listeners, now_ms,
        types::{ChannelId, GuildId},
    },
    manager::GatewaySender,
    node::Node,
    protocol::{
        EndCause, OutgoingMessage, PlayerUpdateState, TrackEnd, TrackError, TrackEndReason,
        TrackEvent, VoiceServerUpdate, VoiceStateUpdate,
    },
};

/// Subscriber lists of one player.
#[derive(Default)]
pub struct PlayerListeners {
    pub end: Listeners<TrackEnd>,
    pub error: Listeners<TrackError>,
    pub warn: Listeners<str>,
    pub disconnect: Listeners<str>,
}

impl PlayerListeners {
    pub fn clear(&self) {
        self.end.clear();
        self.error.clear();
        self.warn.clear();
        self.disconnect.clear();
    }
}

/// Playback state machine for one guild.
///
/// Commands update local state first and then queue the matching frame on
/// the bound node; they return whether the frame was queued. Once destroyed
/// the player ignores every command.
pub struct Player {
    guild_id: GuildId,
    node: RwLock<Option<Arc<Node>>>,
    gateway: Arc<dyn GatewaySender>,
    state: Mutex<PlayerState>,
    listeners: PlayerListeners,
    destroyed: AtomicBool,
}

impl Player {
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        node: Option<Arc<Node>>,
        gateway: Arc<dyn GatewaySender>,
    ) -> Self {
        Self {
            guild_id,
            node: RwLock::new(node),
            gateway,
            state: Mutex::new(PlayerState::new(channel_id)),
            listeners: PlayerListeners::default(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.state.lock().channel_id
    }

    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.read().clone()
    }

    pub fn set_node(&self, node: Arc<Node>) {
        *self.node.write() = Some(node);
    }

    pub fn state(&self) -> PlayerState {
        self.state.lock().clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn track(&self) -> Option<String> {
        self.state.lock().track.clone()
    }

    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn listeners(&self) -> &PlayerListeners {
        &self.listeners
    }

    pub fn on_end<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&TrackEnd) + Send + Sync + 'static,
    {
        self.listeners.end.add(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&TrackError) + Send + Sync + 'static,
    {
        self.listeners.error.add(callback)
    }

    pub fn on_warn<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.warn.add(callback)
    }

    pub fn on_disconnect<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.disconnect.add(callback)
    }

    pub fn remove_all_listeners(&self) {
        self.listeners.clear();
    }

    /// Forwards the voice server handshake to the node and remembers it.
    pub fn connect(&self, session_id: &str, event: &VoiceServerUpdate) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.state.lock().voice = Some(VoiceSession {
            session_id: session_id.to_string(),
            event: event.clone(),
        });
        self.dispatch(OutgoingMessage::VoiceUpdate {
            guild_id: self.guild_id,
            session_id: session_id.to_string(),
            event: event.clone(),
        })
    }

    pub fn play(&self, track: &str, start_time: Option<u64>, end_time: Option<u64>) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.state.lock().start(track, start_time, now_ms());
        self.dispatch(OutgoingMessage::Play {
            guild_id: self.guild_id,
            track: track.to_string(),
            start_time,
            end_time,
        })
    }

    pub fn stop(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.state.lock().clear_track();
        self.dispatch(OutgoingMessage::Stop {
            guild_id: self.guild_id,
        })
    }

    /// Sends nothing when `pause` already matches the current state.
    pub fn pause(&self, pause: bool) -> bool {
        if self.is_destroyed() {
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.paused == pause {
                return false;
            }
            state.paused = pause;
        }
        self.dispatch(OutgoingMessage::Pause {
            guild_id: self.guild_id,
            pause,
        })
    }

    pub fn resume(&self) -> bool {
        self.pause(false)
    }

    /// Volume is clamped to `0..=MAX_VOLUME`.
    pub fn set_volume(&self, volume: u16) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let volume = volume.min(MAX_VOLUME);
        self.state.lock().volume = volume;
        self.dispatch(OutgoingMessage::Volume {
            guild_id: self.guild_id,
            volume,
        })
    }

    pub fn seek(&self, position: u64) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.dispatch(OutgoingMessage::Seek {
            guild_id: self.guild_id,
            position,
        })
    }

    /// Tells the node to drop this player. The caller is responsible for
    /// removing it from the registry.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.lock().clear_track();
        self.listeners.clear();
        self.send(OutgoingMessage::Destroy {
            guild_id: self.guild_id,
        })
    }

    /// Stops playback and notifies disconnect subscribers.
    pub fn disconnect(&self, reason: &str) -> bool {
        self.stop();
        self.listeners.disconnect.emit(reason)
    }

    /// Records a channel change. Returns `false` if `channel_id` is already the
    /// bound channel; with `reactive` the gateway is asked to move as well.
    pub fn switch_channel(&self, channel_id: ChannelId, reactive: bool) -> bool {
        if self.is_destroyed() {
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.channel_id == channel_id {
                return false;
            }
            state.channel_id = channel_id;
        }
        if reactive {
            self.update_voice_state(Some(channel_id), false, false);
        }
        true
    }

    /// Sends a voice state update for this guild to the chat gateway.
    pub fn update_voice_state(&self, channel_id: Option<ChannelId>, muted: bool, deafened: bool) {
        if self.is_destroyed() {
            return;
        }
        let update = match channel_id {
            Some(channel_id) => VoiceStateUpdate::join(self.guild_id, channel_id, muted, deafened),
            None => VoiceStateUpdate::leave(self.guild_id),
        };
        self.gateway.send_voice_state(&update);
    }

    /// Applies a `playerUpdate` report from the node.
    pub fn apply_update(&self, update: &PlayerUpdateState) {
        self.state.lock().apply_update(update);
    }

    /// Reacts to an `op: "event"` frame. Returns whether a subscriber
    /// consumed the resulting notification. A destroyed player consumes
    /// nothing.
    pub fn handle_event(&self, doc: &Value) -> bool {
        if self.is_destroyed() {
            return false;
        }
        match TrackEvent::parse(doc) {
            TrackEvent::End { track, reason } => {
                if reason != TrackEndReason::Replaced {
                    self.state.lock().clear_track();
                }
                self.listeners.end.emit(&TrackEnd {
                    guild_id: self.guild_id,
                    track,
                    cause: EndCause::Ended(reason),
                    payload: doc.clone(),
                })
            }
            TrackEvent::Exception { track, message } => {
                debug!("[{}] Track exception: {}", self.guild_id, message);
                self.listeners.error.emit(&TrackError {
                    guild_id: self.guild_id,
                    track,
                    message,
                    payload: doc.clone(),
                })
            }
            TrackEvent::Stuck {
                track,
                threshold_ms,
            } => {
                self.stop();
                self.listeners.end.emit(&TrackEnd {
                    guild_id: self.guild_id,
                    track,
                    cause: EndCause::Stuck { threshold_ms },
                    payload: doc.clone(),
                })
            }
            TrackEvent::Unknown { event_type } => {
                let event_type = event_type.unwrap_or_else(|| "<missing>".to_string());
                warn!("[{}] Unexpected event type: {}", self.guild_id, event_type);
                self.listeners
                    .warn
                    .emit(&format!("Unexpected event type: {event_type}"))
            }
        }
    }

    fn dispatch(&self, message: OutgoingMessage) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.send(message)
    }

    fn send(&self, message: OutgoingMessage) -> bool {
        let node = self.node.read().clone();
        match node {
            Some(node) => node.send(&message),
            None => {
                debug!(
                    "[{}] No node bound; dropping {}",
                    self.guild_id,
                    message.op()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::NodeOptions,
        node::NodeIdentity,
        testing::{RecordingGateway, drain_frames},
    };
    use crate::common::types::UserId;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn bound_player() -> (Player, flume::Receiver<tokio_tungstenite::tungstenite::Message>, Arc<RecordingGateway>) {
        let node = Node::new(
            NodeOptions::new("local", 2333),
            NodeIdentity {
                user_id: UserId(7),
                shards: 1,
            },
        );
        let (_, rx) = node.attach_test_socket();
        let gateway = Arc::new(RecordingGateway::default());
        let player = Player::new(GuildId(1), ChannelId(10), Some(node), gateway.clone());
        (player, rx, gateway)
    }

    #[test]
    fn test_pause_twice_sends_once() {
        let (player, rx, _) = bound_player();
        assert!(player.pause(true));
        assert!(!player.pause(true));

        let frames = drain_frames(&rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], json!({"op": "pause", "guildId": "1", "pause": true}));

        assert!(player.resume());
        assert!(!player.is_paused());
    }

    #[test]
    fn test_stop_clears_track() {
        let (player, rx, _) = bound_player();
        player.play("a", None, None);
        player.pause(true);
        player.stop();

        let state = player.state();
        assert!(!state.playing);
        assert!(state.track.is_none());
        assert_eq!(drain_frames(&rx).last().unwrap()["op"], "stop");
    }

    #[test]
    fn test_play_replaces_track_and_end_clears_it() {
        let (player, rx, _) = bound_player();
        player.play("trackA", None, None);
        player.play("trackB", Some(1_000), None);
        assert_eq!(player.track().as_deref(), Some("trackB"));

        let frames = drain_frames(&rx);
        assert_eq!(
            frames[1],
            json!({"op": "play", "guildId": "1", "track": "trackB", "startTime": 1000})
        );

        player.handle_event(&json!({"op": "event", "type": "TrackEndEvent", "reason": "FINISHED"}));
        assert!(player.track().is_none());
        assert!(!player.is_playing());
    }

    #[test]
    fn test_replaced_end_keeps_track() {
        let (player, _rx, _) = bound_player();
        player.play("trackA", None, None);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        player.on_end(move |end| {
            assert_eq!(end.cause, EndCause::Ended(TrackEndReason::Replaced));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handled = player.handle_event(&json!({"type": "TrackEndEvent", "reason": "replaced"}));
        assert!(handled);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(player.is_playing());
        assert_eq!(player.track().as_deref(), Some("trackA"));
    }

    #[test]
    fn test_unhandled_event_without_subscribers() {
        let (player, _rx, _) = bound_player();
        assert!(!player.handle_event(&json!({"type": "TrackExceptionEvent", "error": "x"})));
        assert!(!player.handle_event(&json!({"type": "WebSocketClosedEvent"})));
    }

    #[test]
    fn test_unknown_event_warns() {
        let (player, _rx, _) = bound_player();
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        player.on_warn(move |msg| sink.lock().push(msg.to_string()));

        assert!(player.handle_event(&json!({"type": "WebSocketClosedEvent"})));
        assert_eq!(
            warnings.lock().as_slice(),
            ["Unexpected event type: WebSocketClosedEvent"]
        );
    }

    #[test]
    fn test_exception_does_not_touch_playback() {
        let (player, _rx, _) = bound_player();
        player.play("a", None, None);
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        player.on_error(move |e| sink.lock().push(e.message.clone()));

        assert!(player.handle_event(&json!({
            "type": "TrackExceptionEvent",
            "exception": {"message": "decode failed", "severity": "common"}
        })));
        assert_eq!(messages.lock().as_slice(), ["decode failed"]);
        assert!(player.is_playing());
    }

    #[test]
    fn test_switch_channel() {
        let (player, _rx, gateway) = bound_player();
        assert!(!player.switch_channel(ChannelId(10), true));
        assert!(player.switch_channel(ChannelId(11), false));
        assert_eq!(player.channel_id(), ChannelId(11));
        assert!(gateway.frames().is_empty());

        assert!(player.switch_channel(ChannelId(12), true));
        assert_eq!(gateway.frames()[0]["d"]["channel_id"], "12");
    }

    #[test]
    fn test_volume_is_clamped() {
        let (player, rx, _) = bound_player();
        player.set_volume(5_000);
        assert_eq!(player.volume(), MAX_VOLUME);
        assert_eq!(drain_frames(&rx)[0]["volume"], 1000);
    }

    #[test]
    fn test_no_node_fails_but_keeps_going() {
        let gateway = Arc::new(RecordingGateway::default());
        let player = Player::new(GuildId(3), ChannelId(1), None, gateway);
        assert!(!player.play("a", None, None));
        assert!(!player.seek(10));
    }

    #[test]
    fn test_commands_after_destroy_send_nothing() {
        let (player, rx, gateway) = bound_player();
        let ends = Arc::new(AtomicUsize::new(0));
        let counter = ends.clone();
        player.on_end(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(player.destroy());
        assert!(!player.destroy());
        assert!(player.listeners().end.is_empty());
        assert!(!player.play("a", None, None));
        assert!(!player.set_volume(50));

        let handled =
            player.handle_event(&json!({"type": "TrackEndEvent", "reason": "FINISHED"}));
        assert!(!handled);
        assert_eq!(ends.load(Ordering::SeqCst), 0);

        let frames = drain_frames(&rx);
        assert_eq!(frames, vec![json!({"op": "destroy", "guildId": "1"})]);

        assert!(!player.switch_channel(ChannelId(99), true));
        player.update_voice_state(None, false, false);
        assert_eq!(player.channel_id(), ChannelId(10));
        assert!(gateway.frames().is_empty());
    }

    #[test]
    fn test_connect_remembers_voice_session() {
        let (player, rx, _) = bound_player();
        let event = VoiceServerUpdate {
            token: "tok".into(),
            guild_id: GuildId(1),
            endpoint: Some("us-east1.example:443".into()),
        };
        assert!(player.connect("sess", &event));
        assert_eq!(player.state().voice.unwrap().session_id, "sess");
        assert_eq!(
            drain_frames(&rx)[0],
            json!({
                "op": "voiceUpdate",
                "guildId": "1",
                "sessionId": "sess",
                "event": {"token": "tok", "guild_id": "1", "endpoint": "us-east1.example:443"}
            })
        );
    }

    #[test]
    fn test_disconnect_stops_and_notifies() {
        let (player, rx, _) = bound_player();
        player.play("a", None, None);
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = reasons.clone();
        player.on_disconnect(move |r| sink.lock().push(r.to_string()));

        assert!(player.disconnect("kicked"));
        assert!(!player.is_playing());
        assert_eq!(reasons.lock().as_slice(), ["kicked"]);
        assert_eq!(drain_frames(&rx).last().unwrap()["op"], "stop");
    }
}
