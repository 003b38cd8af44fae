//! Gateway discovery port definition.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::errors::HttpError;

/// Session start quota returned with the gateway URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    pub reset_after: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

const fn default_max_concurrency() -> u32 {
    1
}

/// Result of the `/gateway/bot` lookup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayBotInfo {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Port for resolving where and how to open the gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayInfoPort: Send + Sync {
    /// Fetches the recommended gateway URL, shard count and start quota.
    async fn gateway_bot(&self) -> Result<GatewayBotInfo, HttpError>;
}
