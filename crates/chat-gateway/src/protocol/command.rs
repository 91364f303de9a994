//! Outbound application commands

use super::{GatewayFrame, OpCode, RequestGuildMembers, UpdatePresence, UpdateVoiceState};
use serde_json::Value;

/// A frame the application asks a shard to send
///
/// Commands submitted before the shard is ready are held and sent once it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    UpdatePresence(UpdatePresence),
    RequestGuildMembers(RequestGuildMembers),
    UpdateVoiceState(UpdateVoiceState),
}

impl GatewayCommand {
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        match self {
            Self::UpdatePresence(_) => OpCode::PresenceUpdate,
            Self::RequestGuildMembers(_) => OpCode::RequestGuildMembers,
            Self::UpdateVoiceState(_) => OpCode::VoiceStateUpdate,
        }
    }

    #[must_use]
    pub fn to_frame(&self) -> GatewayFrame {
        let d = match self {
            Self::UpdatePresence(p) => serde_json::to_value(p),
            Self::RequestGuildMembers(r) => serde_json::to_value(r),
            Self::UpdateVoiceState(v) => serde_json::to_value(v),
        };
        GatewayFrame::new(self.opcode(), d.unwrap_or(Value::Null))
    }
}

impl From<UpdatePresence> for GatewayCommand {
    fn from(presence: UpdatePresence) -> Self {
        Self::UpdatePresence(presence)
    }
}

impl From<RequestGuildMembers> for GatewayCommand {
    fn from(request: RequestGuildMembers) -> Self {
        Self::RequestGuildMembers(request)
    }
}

impl From<UpdateVoiceState> for GatewayCommand {
    fn from(state: UpdateVoiceState) -> Self {
        Self::UpdateVoiceState(state)
    }
}
