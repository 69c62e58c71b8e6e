use serde::{Deserialize, Serialize};

use crate::common::types::{ChannelId, GuildId, UserId};

/// Chat gateway opcode for a voice state update.
pub const VOICE_STATE_UPDATE_OP: u8 = 4;

/// Voice server assignment relayed to the node inside `voiceUpdate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: GuildId,
    /// `None` while the chat platform is still allocating a server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// The bot's own voice state as reported by the chat gateway.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VoiceStateEvent {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub user_id: UserId,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    pub session_id: String,
}

/// Payload of an outbound voice state update frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    /// `None` leaves the voice channel; it must serialize as `null`.
    pub channel_id: Option<ChannelId>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl VoiceStateUpdate {
    pub fn join(guild_id: GuildId, channel_id: ChannelId, muted: bool, deafened: bool) -> Self {
        Self {
            guild_id,
            channel_id: Some(channel_id),
            self_mute: muted,
            self_deaf: deafened,
        }
    }

    pub fn leave(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        }
    }

    /// Wraps the payload in the gateway dispatch envelope.
    pub fn to_frame(&self) -> GatewayFrame<'_> {
        GatewayFrame {
            op: VOICE_STATE_UPDATE_OP,
            d: self,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GatewayFrame<'a> {
    pub op: u8,
    pub d: &'a VoiceStateUpdate,
}
