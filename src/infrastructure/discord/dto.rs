use serde::Deserialize;

/// Discord API error response structure.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// Error message from Discord.
    pub message: String,
    /// Discord JSON error code.
    #[serde(default)]
    pub code: u32,
}

/// Body of a 429 response.
#[derive(Debug, Deserialize)]
pub struct RateLimitResponse {
    /// Seconds to wait, fractional.
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}
