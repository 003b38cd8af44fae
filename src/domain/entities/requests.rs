//! Outbound gateway requests other than presence.

use serde::Serialize;

use super::Snowflake;

/// Joins, moves or leaves a voice channel (opcode 4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceStateUpdate {
    pub guild_id: Snowflake,
    /// `None` disconnects from voice.
    pub channel_id: Option<Snowflake>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl VoiceStateUpdate {
    #[must_use]
    pub const fn join(guild_id: Snowflake, channel_id: Snowflake) -> Self {
        Self {
            guild_id,
            channel_id: Some(channel_id),
            self_mute: false,
            self_deaf: false,
        }
    }

    #[must_use]
    pub const fn leave(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        }
    }

    #[must_use]
    pub const fn muted(mut self, self_mute: bool) -> Self {
        self.self_mute = self_mute;
        self
    }

    #[must_use]
    pub const fn deafened(mut self, self_deaf: bool) -> Self {
        self.self_deaf = self_deaf;
        self
    }
}

/// Member chunk request (opcode 8). Results arrive as `GUILD_MEMBERS_CHUNK` dispatches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildMembersRequest {
    pub guild_id: Snowflake,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub limit: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub presences: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<Snowflake>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl GuildMembersRequest {
    /// Members whose username starts with `query`; an empty query with limit 0 asks for everyone.
    #[must_use]
    pub fn by_query(guild_id: Snowflake, query: impl Into<String>, limit: u32) -> Self {
        Self {
            guild_id,
            query: Some(query.into()),
            limit,
            presences: false,
            user_ids: Vec::new(),
            nonce: None,
        }
    }

    #[must_use]
    pub fn by_ids(guild_id: Snowflake, user_ids: Vec<Snowflake>) -> Self {
        Self {
            guild_id,
            query: None,
            limit: 0,
            presences: false,
            user_ids,
            nonce: None,
        }
    }

    #[must_use]
    pub fn with_presences(mut self) -> Self {
        self.presences = true;
        self
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }
}
