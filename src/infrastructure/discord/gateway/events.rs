use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::codec::ControlFrame;
use super::error::{GatewayError, GatewayResult};
use crate::domain::entities::{
    GuildMembersRequest, PresenceUpdate, ShardInfo, Snowflake, VoiceStateUpdate,
};

/// Commands the facade queues for the supervisor. Written only while connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    UpdatePresence(PresenceUpdate),
    UpdateVoiceState(VoiceStateUpdate),
    RequestGuildMembers(GuildMembersRequest),
}

impl GatewayCommand {
    #[must_use]
    pub fn into_frame(self) -> ControlFrame {
        match self {
            Self::UpdatePresence(presence) => ControlFrame::PresenceUpdate(presence),
            Self::UpdateVoiceState(voice) => ControlFrame::VoiceStateUpdate(voice),
            Self::RequestGuildMembers(request) => ControlFrame::RequestGuildMembers(request),
        }
    }
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Connected {
        session_id: String,
        resume_url: Option<String>,
    },
    Ready {
        session_id: String,
        user_id: Snowflake,
        shard: Option<ShardInfo>,
    },
    Resumed,
    Disconnected {
        reason: String,
        can_resume: bool,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    HeartbeatAck {
        latency_ms: u64,
    },
    Error {
        message: String,
        recoverable: bool,
    },
}

impl GatewayEvent {
    #[must_use]
    pub const fn is_connection_event(&self) -> bool {
        matches!(
            self,
            Self::Connected { .. } | Self::Disconnected { .. } | Self::Reconnecting { .. }
        )
    }
}

/// A dispatch as handed to handlers: the event name and the raw `d` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEvent {
    pub name: String,
    pub sequence: Option<u64>,
    pub payload: Bytes,
}

impl DispatchEvent {
    pub fn parse<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| GatewayError::decode(format!("invalid {} payload: {e}", self.name)))
    }
}

/// Session details taken from a `READY` dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInfo {
    pub session_id: String,
    pub resume_url: Option<String>,
    pub user_id: Snowflake,
    pub shard: Option<ShardInfo>,
}
