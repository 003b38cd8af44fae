//! Discord API client.

mod client;
mod dto;
pub mod gateway;

pub use client::DiscordHttpClient;
pub use gateway::{
    DispatchEvent, Gateway, GatewayConfig, GatewayError, GatewayEvent, GatewayIntents,
};
