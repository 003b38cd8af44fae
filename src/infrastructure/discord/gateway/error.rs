use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("invalid gateway url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("connection closed with code {code:?}: {reason}")]
    ConnectionClosed { code: Option<u16>, reason: String },

    #[error("websocket error: {message}")]
    WebSocket { message: String },

    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("gateway closed the session with fatal code {code}: {reason}")]
    FatalClose { code: u16, reason: String },

    #[error("heartbeat timeout: no acknowledgment received")]
    HeartbeatTimeout,

    #[error("gave up after {failures} consecutive protocol failures")]
    ProtocolBudgetExhausted { failures: u32 },

    #[error("compression error: {message}")]
    CompressionError { message: String },

    #[error("serialization error: {message}")]
    SerializationError { message: String },

    #[error("failed to decode frame: {message}")]
    Decode { message: String },

    #[error("protocol error: {message}")]
    ProtocolError { message: String },

    #[error("timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("gateway task panicked: {message}")]
    TaskPanicked { message: String },

    #[error("channel closed")]
    ChannelClosed,

    #[error("not connected to gateway")]
    NotConnected,

    #[error("already connecting or connected")]
    AlreadyConnected,

    #[error("gateway shutting down")]
    ShuttingDown,
}

impl GatewayError {
    #[must_use]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn compression(message: impl Into<String>) -> Self {
        Self::CompressionError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Builds the terminal error for a fatal close code.
    #[must_use]
    pub fn from_fatal_close(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if GatewayCloseCode::from_u16(code) == Some(GatewayCloseCode::AuthenticationFailed) {
            Self::auth_failed(if reason.is_empty() {
                "gateway rejected the token".to_string()
            } else {
                reason
            })
        } else {
            Self::FatalClose { code, reason }
        }
    }

    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionClosed { .. }
                | Self::WebSocket { .. }
                | Self::HeartbeatTimeout
                | Self::Timeout { .. }
                | Self::CompressionError { .. }
                | Self::Decode { .. }
        )
    }

    /// Whether the supervisor should try again after this error.
    #[must_use]
    pub const fn should_reconnect(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. }
            | Self::ConnectionClosed { .. }
            | Self::WebSocket { .. }
            | Self::HeartbeatTimeout
            | Self::Timeout { .. }
            | Self::CompressionError { .. }
            | Self::ProtocolError { .. } => true,

            Self::InvalidUrl { .. }
            | Self::AuthenticationFailed { .. }
            | Self::FatalClose { .. }
            | Self::ProtocolBudgetExhausted { .. }
            | Self::SerializationError { .. }
            | Self::Decode { .. }
            | Self::TaskPanicked { .. }
            | Self::ChannelClosed
            | Self::NotConnected
            | Self::AlreadyConnected
            | Self::ShuttingDown => false,
        }
    }

    /// Whether the session may be resumed after this error.
    #[must_use]
    pub fn can_resume(&self) -> bool {
        match self {
            Self::ConnectionClosed { code, .. } => {
                CloseDisposition::classify(*code) == CloseDisposition::Resume
            }
            Self::ConnectionFailed { .. }
            | Self::WebSocket { .. }
            | Self::HeartbeatTimeout
            | Self::Timeout { .. }
            | Self::CompressionError { .. } => true,
            _ => false,
        }
    }

    #[must_use]
    pub const fn close_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClosed { code, .. } => *code,
            Self::FatalClose { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCloseCode {
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    InvalidSequence = 4007,
    RateLimited = 4008,
    SessionTimedOut = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
    InvalidIntents = 4013,
    DisallowedIntents = 4014,
}

impl GatewayCloseCode {
    #[must_use]
    pub const fn from_u16(code: u16) -> Option<Self> {
        match code {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimedOut),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_resumable(self) -> bool {
        matches!(
            self,
            Self::UnknownError
                | Self::UnknownOpcode
                | Self::DecodeError
                | Self::NotAuthenticated
                | Self::AlreadyAuthenticated
                | Self::RateLimited
        )
    }

    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed
                | Self::InvalidShard
                | Self::ShardingRequired
                | Self::InvalidApiVersion
                | Self::InvalidIntents
                | Self::DisallowedIntents
        )
    }
}

impl From<GatewayCloseCode> for u16 {
    fn from(code: GatewayCloseCode) -> Self {
        code as Self
    }
}

/// What a connection closure means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Keep the session and send Resume on the next connection.
    Resume,
    /// Clear the session and send Identify on the next connection.
    Reidentify,
    /// Clear the session and stop.
    Fatal,
}

impl CloseDisposition {
    /// Classifies a close code. `None` means the socket dropped without a close frame.
    #[must_use]
    pub const fn classify(code: Option<u16>) -> Self {
        let Some(code) = code else {
            return Self::Resume;
        };

        // Standard WebSocket codes are network-level closes.
        if code >= 1000 && code <= 1015 {
            return Self::Resume;
        }

        match GatewayCloseCode::from_u16(code) {
            Some(known) if known.is_fatal() => Self::Fatal,
            Some(known) if known.is_resumable() => Self::Resume,
            _ => Self::Reidentify,
        }
    }

    #[must_use]
    pub const fn keeps_session(self) -> bool {
        matches!(self, Self::Resume)
    }
}
