//! Discord API HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use tracing::{debug, warn};

use super::dto::{ErrorResponse, RateLimitResponse};
use crate::domain::entities::BotToken;
use crate::domain::errors::HttpError;
use crate::domain::ports::{GatewayBotInfo, GatewayInfoPort};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/linuxmobile/oxigate, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(5);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Discord API client for the request/response side of the platform.
pub struct DiscordHttpClient {
    client: Client,
    base_url: String,
    token: BotToken,
}

impl DiscordHttpClient {
    /// Creates new client with default base URL.
    ///
    /// # Errors
    /// Returns error if HTTP client creation fails.
    pub fn new(token: BotToken) -> Result<Self, HttpError> {
        Self::with_base_url(token, DISCORD_API_BASE)
    }

    /// Creates client with custom base URL.
    ///
    /// # Errors
    /// Returns error if the URL is malformed or HTTP client creation fails.
    pub fn with_base_url(token: BotToken, base_url: impl Into<String>) -> Result<Self, HttpError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        url::Url::parse(&base_url).map_err(|e| HttpError::InvalidUrl {
            message: format!("{base_url}: {e}"),
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HttpError::network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0;

        loop {
            let response = self
                .client
                .get(&url)
                .header(header::AUTHORIZATION, self.token.authorization_header())
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %e, "Failed to reach Discord API");
                    if e.is_timeout() {
                        HttpError::network("request timed out")
                    } else if e.is_connect() {
                        HttpError::network("failed to connect to Discord")
                    } else {
                        HttpError::network(e.to_string())
                    }
                })?;

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = retry_after(response).await;
                attempt += 1;

                if attempt > MAX_RATE_LIMIT_RETRIES {
                    return Err(HttpError::RateLimited {
                        retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    });
                }

                warn!(
                    path,
                    attempt,
                    retry_after_ms = retry_after.as_millis(),
                    "Rate limited, waiting before retry"
                );
                tokio::time::sleep(retry_after).await;
                continue;
            }

            if !status.is_success() {
                return Err(error_from_response(status, response).await);
            }

            return response.json::<T>().await.map_err(|e| {
                warn!(error = %e, path, "Failed to parse response");
                HttpError::invalid_response(e.to_string())
            });
        }
    }
}

/// Wait time from the JSON body, falling back to the `Retry-After` header.
async fn retry_after(response: reqwest::Response) -> Duration {
    let header_secs = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok());

    let body_secs = response
        .json::<RateLimitResponse>()
        .await
        .ok()
        .map(|body| {
            if body.global {
                debug!("Hit the global rate limit");
            }
            body.retry_after
        });

    retry_delay(body_secs, header_secs)
}

/// The server's wait hint, preferring the body. Unusable hints fall back to a
/// fixed delay and huge ones are capped.
fn retry_delay(body_secs: Option<f64>, header_secs: Option<f64>) -> Duration {
    body_secs
        .or(header_secs)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map_or(FALLBACK_RETRY_AFTER, |delay| delay.min(MAX_RETRY_AFTER))
}

async fn error_from_response(status: StatusCode, response: reqwest::Response) -> HttpError {
    let error_message = match response.json::<ErrorResponse>().await {
        Ok(error) => error.message,
        Err(_) => format!("HTTP {status}"),
    };

    match status {
        StatusCode::UNAUTHORIZED => HttpError::unauthorized("invalid or expired token"),
        StatusCode::FORBIDDEN => HttpError::unauthorized(format!("access denied: {error_message}")),
        _ => HttpError::unexpected_status(status.as_u16(), error_message),
    }
}

#[async_trait]
impl GatewayInfoPort for DiscordHttpClient {
    async fn gateway_bot(&self) -> Result<GatewayBotInfo, HttpError> {
        debug!("Fetching gateway info");

        let info: GatewayBotInfo = self.get_json("/gateway/bot").await?;

        debug!(
            url = %info.url,
            shards = info.shards,
            remaining = info.session_start_limit.remaining,
            "Gateway info received"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn gateway_body() -> serde_json::Value {
        json!({
            "url": "wss://gateway.discord.gg",
            "shards": 2,
            "session_start_limit": {
                "total": 1000,
                "remaining": 998,
                "reset_after": 3_600_000,
                "max_concurrency": 1
            }
        })
    }

    fn client_for(server: &MockServer) -> DiscordHttpClient {
        DiscordHttpClient::with_base_url(BotToken::new_unchecked("test-token"), server.uri())
            .unwrap()
    }

    #[test_case(Some(1.5), Some(9.0), Duration::from_millis(1_500) ; "body_wins")]
    #[test_case(None, Some(2.0), Duration::from_secs(2) ; "header_fallback")]
    #[test_case(None, None, FALLBACK_RETRY_AFTER ; "no_hint")]
    #[test_case(Some(-1.0), None, FALLBACK_RETRY_AFTER ; "negative")]
    #[test_case(Some(f64::NAN), None, FALLBACK_RETRY_AFTER ; "nan")]
    #[test_case(Some(f64::INFINITY), None, FALLBACK_RETRY_AFTER ; "infinite")]
    #[test_case(Some(1e20), None, MAX_RETRY_AFTER ; "overflowing")]
    #[test_case(Some(3_600.0), None, MAX_RETRY_AFTER ; "capped")]
    fn test_retry_delay(body_secs: Option<f64>, header_secs: Option<f64>, expected: Duration) {
        assert_eq!(retry_delay(body_secs, header_secs), expected);
    }

    #[test]
    fn test_client_creation() {
        let client = DiscordHttpClient::new(BotToken::new_unchecked("test-token"));
        assert!(client.is_ok());
    }

    #[test]
    fn test_rejects_malformed_base_url() {
        let client =
            DiscordHttpClient::with_base_url(BotToken::new_unchecked("test-token"), "not a url");
        assert!(matches!(client, Err(HttpError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_gateway_bot_sends_bot_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/bot"))
            .and(header("authorization", "Bot test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gateway_body()))
            .expect(1)
            .mount(&server)
            .await;

        let info = client_for(&server).gateway_bot().await.unwrap();

        assert_eq!(info.url, "wss://gateway.discord.gg");
        assert_eq!(info.shards, 2);
        assert_eq!(info.session_start_limit.remaining, 998);
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/bot"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(json!({"message": "You are being rate limited.", "retry_after": 0.05, "global": false})),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gateway/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gateway_body()))
            .expect(1)
            .mount(&server)
            .await;

        let info = client_for(&server).gateway_bot().await.unwrap();
        assert_eq!(info.shards, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/bot"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0.01"))
            .expect(u64::from(MAX_RATE_LIMIT_RETRIES) + 1)
            .mount(&server)
            .await;

        let result = client_for(&server).gateway_bot().await;
        assert!(matches!(
            result,
            Err(HttpError::RateLimited { retry_after_ms: 10 })
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/bot"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "401: Unauthorized", "code": 0})),
            )
            .mount(&server)
            .await;

        let result = client_for(&server).gateway_bot().await;
        assert!(matches!(result, Err(HttpError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_server_error_is_recoverable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/bot"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let error = client_for(&server).gateway_bot().await.unwrap_err();
        assert!(matches!(
            error,
            HttpError::UnexpectedStatus { status: 502, .. }
        ));
        assert!(error.is_recoverable());
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gateway/bot"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = client_for(&server).gateway_bot().await;
        assert!(matches!(result, Err(HttpError::InvalidResponse { .. })));
    }
}
