use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::constants::GatewayOpcode;
use super::error::{GatewayError, GatewayResult};
use super::payloads::{Identify, OutboundFrame, Resume};
use crate::domain::entities::{GuildMembersRequest, PresenceUpdate, VoiceStateUpdate};

const NULL_PAYLOAD: &[u8] = b"null";

/// A decoded inbound frame. `payload` holds the raw JSON text of `d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub op: u8,
    pub sequence: Option<u64>,
    pub event_name: Option<String>,
    pub payload: Bytes,
}

impl Envelope {
    #[must_use]
    pub const fn opcode(&self) -> Option<GatewayOpcode> {
        GatewayOpcode::from_u8(self.op)
    }

    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        self.opcode() == Some(GatewayOpcode::Dispatch)
    }

    /// Deserializes the `d` field.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            GatewayError::decode(format!("invalid payload for opcode {}: {e}", self.op))
        })
    }
}

/// Frames the client writes to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Heartbeat { sequence: Option<u64> },
    Identify(Box<Identify>),
    Resume(Resume),
    PresenceUpdate(PresenceUpdate),
    VoiceStateUpdate(VoiceStateUpdate),
    RequestGuildMembers(GuildMembersRequest),
}

impl ControlFrame {
    #[must_use]
    pub const fn opcode(&self) -> GatewayOpcode {
        match self {
            Self::Heartbeat { .. } => GatewayOpcode::Heartbeat,
            Self::Identify(_) => GatewayOpcode::Identify,
            Self::Resume(_) => GatewayOpcode::Resume,
            Self::PresenceUpdate(_) => GatewayOpcode::PresenceUpdate,
            Self::VoiceStateUpdate(_) => GatewayOpcode::VoiceStateUpdate,
            Self::RequestGuildMembers(_) => GatewayOpcode::RequestGuildMembers,
        }
    }
}

#[derive(Deserialize)]
struct RawFrame<'a> {
    op: u8,
    #[serde(borrow)]
    d: Option<&'a RawValue>,
    s: Option<u64>,
    t: Option<String>,
}

pub struct FrameCodec;

impl FrameCodec {
    pub fn encode(frame: &ControlFrame) -> GatewayResult<String> {
        let op = frame.opcode().as_u8();
        match frame {
            ControlFrame::Heartbeat { sequence } => Self::wrap(op, sequence),
            ControlFrame::Identify(identify) => Self::wrap(op, identify.as_ref()),
            ControlFrame::Resume(resume) => Self::wrap(op, resume),
            ControlFrame::PresenceUpdate(presence) => Self::wrap(op, presence),
            ControlFrame::VoiceStateUpdate(voice) => Self::wrap(op, voice),
            ControlFrame::RequestGuildMembers(request) => Self::wrap(op, request),
        }
    }

    /// Decodes one complete text frame. Unknown opcodes and event names pass through.
    pub fn decode(frame: &[u8]) -> GatewayResult<Envelope> {
        let raw: RawFrame<'_> =
            serde_json::from_slice(frame).map_err(|e| GatewayError::decode(e.to_string()))?;

        let payload = raw.d.map_or_else(
            || Bytes::from_static(NULL_PAYLOAD),
            |d| Bytes::copy_from_slice(d.get().as_bytes()),
        );

        Ok(Envelope {
            op: raw.op,
            sequence: raw.s,
            event_name: raw.t,
            payload,
        })
    }

    fn wrap<T: Serialize>(op: u8, d: &T) -> GatewayResult<String> {
        serde_json::to_string(&OutboundFrame { op, d })
            .map_err(|e| GatewayError::serialization(e.to_string()))
    }
}
