use super::app_config::LogLevel;
use crate::domain::entities::ShardInfo;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "oxigate",
    version,
    about = "Connects a bot to the Discord gateway and logs what it sees",
    long_about = None
)]
pub struct CliArgs {
    /// Bot token.
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Disable zlib-stream transport compression.
    #[arg(long)]
    pub no_compress: bool,

    /// Gateway URL, skipping the `/gateway/bot` lookup.
    #[arg(long, value_name = "URL")]
    pub gateway_url: Option<String>,

    /// Shard id to identify as.
    #[arg(long, requires = "shard_count")]
    pub shard: Option<u32>,

    /// Total number of shards.
    #[arg(long, requires = "shard")]
    pub shard_count: Option<u32>,
}

impl CliArgs {
    /// Shard pair from `--shard`/`--shard-count`, if both are valid.
    #[must_use]
    pub fn shard(&self) -> Option<ShardInfo> {
        ShardInfo::new(self.shard?, self.shard_count?)
    }
}
