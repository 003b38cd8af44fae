//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::entities::{Activity, ActivityKind, PresenceStatus, PresenceUpdate, ShardInfo};
use crate::infrastructure::discord::{GatewayConfig, GatewayIntents};

pub(super) const APP_NAME: &str = "oxigate";
pub(super) const APP_QUALIFIER: &str = "com";
pub(super) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and merged with CLI flags.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Gateway connection settings.
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Presence announced on Identify.
    #[serde(default)]
    pub presence: Option<PresenceSettings>,
}

/// Gateway section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Intents as `"GUILDS | GUILD_MESSAGES"`.
    #[serde(default = "GatewayIntents::default_bot")]
    pub intents: GatewayIntents,

    /// Request zlib-stream compression.
    #[serde(default = "default_true")]
    pub compress: bool,

    /// `[shard_id, num_shards]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardInfo>,

    /// Skips the `/gateway/bot` lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// REST base used for the gateway lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            intents: GatewayIntents::default_bot(),
            compress: true,
            shard: None,
            url: None,
            api_base_url: None,
        }
    }
}

/// Presence section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSettings {
    #[serde(default)]
    pub status: PresenceStatus,

    /// Activity text; a custom status when `activity_kind` is unset.
    #[serde(default)]
    pub activity: Option<String>,

    /// One of `playing`, `listening`, `watching`, `competing`, `custom`.
    #[serde(default)]
    pub activity_kind: Option<String>,
}

impl PresenceSettings {
    /// Builds the presence payload.
    #[must_use]
    pub fn to_presence(&self) -> PresenceUpdate {
        let presence = PresenceUpdate::new(self.status);
        let Some(text) = self.activity.as_deref() else {
            return presence;
        };

        let activity = match self.activity_kind.as_deref().map(str::to_lowercase).as_deref() {
            Some("playing") => Activity::playing(text),
            Some("listening") => Activity::listening(text),
            Some("watching") => Activity::watching(text),
            Some("competing") => Activity::new(ActivityKind::Competing, text),
            _ => Activity::custom(text),
        };
        presence.with_activity(activity)
    }
}

fn default_true() -> bool {
    true
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if args.no_compress {
            self.gateway.compress = false;
        }
        if let Some(url) = &args.gateway_url {
            self.gateway.url = Some(url.clone());
        }
        if let Some(shard) = args.shard() {
            self.gateway.shard = Some(shard);
        }
    }

    /// Translates the file settings into a gateway configuration.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::new()
            .with_intents(self.gateway.intents)
            .with_compression(self.gateway.compress);

        if let Some(shard) = self.gateway.shard {
            config = config.with_shard(shard);
        }
        if let Some(url) = &self.gateway.url {
            config = config.with_gateway_url(url);
        }
        if let Some(presence) = &self.presence {
            config = config.with_presence(presence.to_presence());
        }
        config
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("oxigate.log"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            gateway: GatewaySettings::default(),
            presence: None,
        }
    }
}
