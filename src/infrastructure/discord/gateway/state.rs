use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

/// Lifecycle of the gateway connection, as published to `Gateway::state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Connected,
    Closing,
    Reconnecting {
        attempt: u32,
    },
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Identify or Resume sent, first dispatch not yet seen.
    #[must_use]
    pub const fn is_handshaking(&self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming)
    }

    /// Only a connected session may carry queued commands.
    #[must_use]
    pub const fn can_send(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::AwaitingHello => f.write_str("awaiting hello"),
            Self::Identifying => f.write_str("identifying"),
            Self::Resuming => f.write_str("resuming"),
            Self::Connected => f.write_str("connected"),
            Self::Closing => f.write_str("closing"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// The supervisor's view of the connection: the published state plus the
/// heartbeat timing and reconnect counter that go with it.
pub struct GatewayState {
    connection: ConnectionState,
    publisher: Arc<watch::Sender<ConnectionState>>,
    last_heartbeat_sent: Option<Instant>,
    reconnect_attempts: u32,
}

impl GatewayState {
    /// Starts `Idle` and publishes every transition to `publisher`.
    #[must_use]
    pub fn new(publisher: Arc<watch::Sender<ConnectionState>>) -> Self {
        Self {
            connection: ConnectionState::Idle,
            publisher,
            last_heartbeat_sent: None,
            reconnect_attempts: 0,
        }
    }

    #[must_use]
    pub const fn connection(&self) -> ConnectionState {
        self.connection
    }

    fn set(&mut self, next: ConnectionState) {
        if self.connection != next {
            info!(from = %self.connection, to = %next, "Gateway state changed");
        }
        self.connection = next;
        self.publisher.send_replace(next);
    }

    pub fn transition_to_connecting(&mut self) {
        self.last_heartbeat_sent = None;
        self.set(ConnectionState::Connecting);
    }

    pub fn transition_to_awaiting_hello(&mut self) {
        self.set(ConnectionState::AwaitingHello);
    }

    pub fn transition_to_identifying(&mut self) {
        self.set(ConnectionState::Identifying);
    }

    pub fn transition_to_resuming(&mut self) {
        self.set(ConnectionState::Resuming);
    }

    pub fn transition_to_connected(&mut self) {
        self.reconnect_attempts = 0;
        self.set(ConnectionState::Connected);
    }

    pub fn transition_to_closing(&mut self) {
        self.set(ConnectionState::Closing);
    }

    /// Bumps the attempt counter and returns it.
    pub fn transition_to_reconnecting(&mut self) -> u32 {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.set(ConnectionState::Reconnecting {
            attempt: self.reconnect_attempts,
        });
        self.reconnect_attempts
    }

    pub fn transition_to_idle(&mut self) {
        self.last_heartbeat_sent = None;
        self.set(ConnectionState::Idle);
    }

    pub fn record_heartbeat_sent(&mut self) {
        self.last_heartbeat_sent = Some(Instant::now());
    }

    /// Round-trip time of the last heartbeat, if one was sent on this socket.
    #[allow(clippy::cast_possible_truncation)]
    pub fn record_heartbeat_ack(&mut self) -> Option<u64> {
        self.last_heartbeat_sent
            .take()
            .map(|sent| sent.elapsed().as_millis() as u64)
    }
}
