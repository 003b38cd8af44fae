//! Demo binary configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{AppConfig, GatewaySettings, LogLevel, PresenceSettings};
pub use args::CliArgs;
pub use storage::{ConfigError, StorageManager};
