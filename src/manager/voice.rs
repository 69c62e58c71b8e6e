use crate::protocol::VoiceStateUpdate;

/// Outbound half of the chat gateway: delivers voice state update frames
/// (`{"op": 4, "d": ...}`) on the bot's gateway connection.
pub trait GatewaySender: Send + Sync {
    fn send_voice_state(&self, update: &VoiceStateUpdate);
}

impl<F> GatewaySender for F
where
    F: Fn(&VoiceStateUpdate) + Send + Sync,
{
    fn send_voice_state(&self, update: &VoiceStateUpdate) {
        self(update)
    }
}
