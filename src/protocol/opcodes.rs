use serde::Serialize;

use crate::{common::types::GuildId, protocol::voice::VoiceServerUpdate};

/// Messages sent from client to node over the WebSocket.
///
/// Optional fields are omitted rather than sent as `null`; the node's parser
/// rejects explicit nulls on these operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutgoingMessage {
    VoiceUpdate {
        guild_id: GuildId,
        session_id: String,
        event: VoiceServerUpdate,
    },
    Play {
        guild_id: GuildId,
        track: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
    },
    Stop {
        guild_id: GuildId,
    },
    Pause {
        guild_id: GuildId,
        pause: bool,
    },
    Volume {
        guild_id: GuildId,
        volume: u16,
    },
    Seek {
        guild_id: GuildId,
        position: u64,
    },
    Destroy {
        guild_id: GuildId,
    },
}

impl OutgoingMessage {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::VoiceUpdate { guild_id, .. }
            | Self::Play { guild_id, .. }
            | Self::Stop { guild_id }
            | Self::Pause { guild_id, .. }
            | Self::Volume { guild_id, .. }
            | Self::Seek { guild_id, .. }
            | Self::Destroy { guild_id } => *guild_id,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Self::VoiceUpdate { .. } => "voiceUpdate",
            Self::Play { .. } => "play",
            Self::Stop { .. } => "stop",
            Self::Pause { .. } => "pause",
            Self::Volume { .. } => "volume",
            Self::Seek { .. } => "seek",
            Self::Destroy { .. } => "destroy",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
