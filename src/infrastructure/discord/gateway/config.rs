use std::time::Duration;

use super::backoff::BackoffPolicy;
use super::constants::{
    CONNECTION_TIMEOUT, GatewayIntents, HELLO_TIMEOUT, IDENTIFY_TIMEOUT, INVALID_SESSION_DELAY,
    INVALID_SESSION_RESUME_RETRIES, LARGE_THRESHOLD, PROTOCOL_FAILURE_BUDGET,
};
use crate::domain::entities::{PresenceUpdate, ShardInfo};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub intents: GatewayIntents,
    pub shard: Option<ShardInfo>,
    /// Overrides the URL from the info port.
    pub gateway_url: Option<String>,
    /// Requests zlib-stream transport compression.
    pub compress: bool,
    pub large_threshold: u16,
    /// Presence sent with the first Identify.
    pub presence: Option<PresenceUpdate>,
    pub connect_timeout: Duration,
    pub hello_timeout: Duration,
    /// Time allowed between Identify/Resume and the first dispatch.
    pub handshake_timeout: Duration,
    pub invalid_session_delay: Duration,
    pub backoff: BackoffPolicy,
    pub invalid_session_resume_retries: u32,
    pub protocol_failure_budget: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            intents: GatewayIntents::default_bot(),
            shard: None,
            gateway_url: None,
            compress: true,
            large_threshold: LARGE_THRESHOLD,
            presence: None,
            connect_timeout: CONNECTION_TIMEOUT,
            hello_timeout: HELLO_TIMEOUT,
            handshake_timeout: IDENTIFY_TIMEOUT,
            invalid_session_delay: INVALID_SESSION_DELAY,
            backoff: BackoffPolicy::default(),
            invalid_session_resume_retries: INVALID_SESSION_RESUME_RETRIES,
            protocol_failure_budget: PROTOCOL_FAILURE_BUDGET,
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_intents(mut self, intents: GatewayIntents) -> Self {
        self.intents = intents;
        self
    }

    #[must_use]
    pub const fn with_shard(mut self, shard: ShardInfo) -> Self {
        self.shard = Some(shard);
        self
    }

    #[must_use]
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    #[must_use]
    pub const fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    #[must_use]
    pub const fn with_large_threshold(mut self, threshold: u16) -> Self {
        self.large_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_presence(mut self, presence: PresenceUpdate) -> Self {
        self.presence = Some(presence);
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_invalid_session_delay(mut self, delay: Duration) -> Self {
        self.invalid_session_delay = delay;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_invalid_session_resume_retries(mut self, retries: u32) -> Self {
        self.invalid_session_resume_retries = retries;
        self
    }

    #[must_use]
    pub const fn with_protocol_failure_budget(mut self, budget: u32) -> Self {
        self.protocol_failure_budget = budget;
        self
    }
}
