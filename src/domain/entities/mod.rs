//! Domain entity definitions.

mod presence;
mod requests;
mod shard;
mod snowflake;
mod token;

pub use presence::{Activity, ActivityKind, PresenceStatus, PresenceUpdate};
pub use requests::{GuildMembersRequest, VoiceStateUpdate};
pub use shard::ShardInfo;
pub use snowflake::Snowflake;
pub use token::BotToken;
