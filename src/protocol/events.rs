use serde::Deserialize;
use serde_json::Value;

use crate::common::types::GuildId;

pub const OP_EVENT: &str = "event";
pub const OP_PLAYER_UPDATE: &str = "playerUpdate";
pub const OP_STATS: &str = "stats";

/// Reads the top-level `op` tag of an inbound frame.
pub fn op_of(doc: &Value) -> Option<&str> {
    doc.get("op").and_then(Value::as_str)
}

/// `op: "playerUpdate"` frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub guild_id: GuildId,
    #[serde(default)]
    pub state: PlayerUpdateState,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerUpdateState {
    /// Unix timestamp in milliseconds.
    pub time: u64,
    /// Playback position in milliseconds.
    pub position: u64,
    pub connected: Option<bool>,
    pub ping: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
    Other(String),
}

impl TrackEndReason {
    /// Matches both the v3 (`REPLACED`) and v4 (`replaced`) spellings.
    pub fn parse(reason: &str) -> Self {
        match reason.to_ascii_uppercase().as_str() {
            "FINISHED" => Self::Finished,
            "LOAD_FAILED" | "LOADFAILED" => Self::LoadFailed,
            "STOPPED" => Self::Stopped,
            "REPLACED" => Self::Replaced,
            "CLEANUP" => Self::Cleanup,
            _ => Self::Other(reason.to_string()),
        }
    }
}

/// Why the end listeners fired.
#[derive(Debug, Clone, PartialEq)]
pub enum EndCause {
    Ended(TrackEndReason),
    /// The node reported the track stuck; the player stopped it.
    Stuck { threshold_ms: Option<u64> },
}

/// Delivered to player end listeners.
#[derive(Debug, Clone)]
pub struct TrackEnd {
    pub guild_id: GuildId,
    pub track: Option<String>,
    pub cause: EndCause,
    /// The frame as received.
    pub payload: Value,
}

/// Delivered to player error listeners.
#[derive(Debug, Clone)]
pub struct TrackError {
    pub guild_id: GuildId,
    pub track: Option<String>,
    pub message: String,
    pub payload: Value,
}

/// Parsed `op: "event"` frame, keyed by its `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    End {
        track: Option<String>,
        reason: TrackEndReason,
    },
    Exception {
        track: Option<String>,
        message: String,
    },
    Stuck {
        track: Option<String>,
        threshold_ms: Option<u64>,
    },
    Unknown {
        event_type: Option<String>,
    },
}

impl TrackEvent {
    pub fn parse(doc: &Value) -> Self {
        let track = track_of(doc);
        match doc.get("type").and_then(Value::as_str) {
            Some("TrackEndEvent") => Self::End {
                track,
                reason: TrackEndReason::parse(
                    doc.get("reason").and_then(Value::as_str).unwrap_or_default(),
                ),
            },
            Some("TrackExceptionEvent") => Self::Exception {
                track,
                message: exception_message(doc),
            },
            Some("TrackStuckEvent") => Self::Stuck {
                track,
                threshold_ms: doc.get("thresholdMs").and_then(Value::as_u64),
            },
            other => Self::Unknown {
                event_type: other.map(str::to_string),
            },
        }
    }
}

/// v3 sends the encoded track as a string, v4 as an object with `encoded`.
fn track_of(doc: &Value) -> Option<String> {
    match doc.get("track")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("encoded").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn exception_message(doc: &Value) -> String {
    doc.get("exception")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| doc.get("error").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| doc.to_string())
}
