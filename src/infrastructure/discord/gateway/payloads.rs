use serde::{Deserialize, Serialize, Serializer};

use super::constants::{
    CLIENT_PROPERTIES_BROWSER, CLIENT_PROPERTIES_DEVICE, CLIENT_PROPERTIES_OS, GatewayIntents,
    LARGE_THRESHOLD,
};
use crate::domain::entities::{BotToken, PresenceUpdate, ShardInfo, Snowflake};

/// Outbound `{ "op": .., "d": .. }` wrapper.
#[derive(Debug, Serialize)]
pub struct OutboundFrame<'a, T: Serialize> {
    pub op: u8,
    pub d: &'a T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identify {
    #[serde(serialize_with = "serialize_token")]
    pub token: BotToken,
    pub properties: IdentifyProperties,
    pub compress: bool,
    pub large_threshold: u16,
    #[serde(serialize_with = "serialize_intents")]
    pub intents: GatewayIntents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdate>,
}

impl Identify {
    #[must_use]
    pub fn new(token: BotToken, intents: GatewayIntents) -> Self {
        Self {
            token,
            properties: IdentifyProperties::default(),
            compress: false,
            large_threshold: LARGE_THRESHOLD,
            intents,
            shard: None,
            presence: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: CLIENT_PROPERTIES_OS.to_string(),
            browser: CLIENT_PROPERTIES_BROWSER.to_string(),
            device: CLIENT_PROPERTIES_DEVICE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resume {
    #[serde(serialize_with = "serialize_token")]
    pub token: BotToken,
    pub session_id: String,
    pub seq: u64,
}

fn serialize_token<S>(token: &BotToken, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(token.as_str())
}

fn serialize_intents<S>(intents: &GatewayIntents, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u32(intents.bits())
}

#[derive(Debug, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    pub resume_gateway_url: Option<String>,
    pub user: ReadyUser,
    #[serde(default)]
    pub shard: Option<ShardInfo>,
    #[serde(default)]
    pub guilds: Vec<ReadyGuild>,
}

#[derive(Debug, Deserialize)]
pub struct ReadyUser {
    pub id: Snowflake,
}

#[derive(Debug, Deserialize)]
pub struct ReadyGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}
