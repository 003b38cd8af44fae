//! Infrastructure layer with external service adapters.

/// Demo binary configuration.
pub mod config;
/// Discord gateway engine and REST adapter.
pub mod discord;

pub use config::{AppConfig, CliArgs, ConfigError, LogLevel, StorageManager};
pub use discord::{
    DiscordHttpClient, DispatchEvent, Gateway, GatewayConfig, GatewayError, GatewayEvent,
    GatewayIntents,
};
