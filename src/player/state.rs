use crate::{
    common::types::ChannelId,
    protocol::{PlayerUpdateState, VoiceServerUpdate},
};

pub const DEFAULT_VOLUME: u16 = 100;
/// Highest volume the node accepts.
pub const MAX_VOLUME: u16 = 1000;

/// Last voice handshake forwarded to the node, kept so it can be replayed
/// when the player moves to another node.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSession {
    pub session_id: String,
    pub event: VoiceServerUpdate,
}

/// Snapshot of a player's local state.
///
/// `playing == false` implies `track == None`; `paused` is only meaningful
/// while playing.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub channel_id: ChannelId,
    pub playing: bool,
    pub paused: bool,
    pub track: Option<String>,
    /// Unix millis of the last `play`.
    pub timestamp: Option<u64>,
    pub volume: u16,
    /// Last position reported by the node, in milliseconds.
    pub position: u64,
    /// Unix millis of the node report carrying `position`.
    pub last_update: Option<u64>,
    pub connected: Option<bool>,
    pub ping: Option<i64>,
    pub voice: Option<VoiceSession>,
}

impl PlayerState {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            playing: false,
            paused: false,
            track: None,
            timestamp: None,
            volume: DEFAULT_VOLUME,
            position: 0,
            last_update: None,
            connected: None,
            ping: None,
            voice: None,
        }
    }

    pub(crate) fn start(&mut self, track: &str, start_time: Option<u64>, now: u64) {
        self.track = Some(track.to_string());
        self.playing = true;
        self.paused = false;
        self.timestamp = Some(now);
        self.position = start_time.unwrap_or(0);
        self.last_update = None;
    }

    pub(crate) fn clear_track(&mut self) {
        self.playing = false;
        self.paused = false;
        self.track = None;
    }

    pub(crate) fn apply_update(&mut self, update: &PlayerUpdateState) {
        // Reports can arrive out of order after a reconnect.
        if self.last_update.is_some_and(|last| update.time < last) {
            return;
        }
        self.position = update.position;
        self.last_update = Some(update.time);
        if update.connected.is_some() {
            self.connected = update.connected;
        }
        if update.ping.is_some() {
            self.ping = update.ping;
        }
    }

    /// Position extrapolated to `now` from the last node report.
    pub fn estimated_position(&self, now: u64) -> u64 {
        match self.last_update {
            Some(at) if self.playing && !self.paused => {
                self.position + now.saturating_sub(at)
            }
            _ => self.position,
        }
    }
}
