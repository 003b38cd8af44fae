//! Domain layer with value objects and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{BotToken, PresenceUpdate, ShardInfo, Snowflake};
pub use errors::HttpError;
pub use ports::{GatewayBotInfo, GatewayInfoPort};
