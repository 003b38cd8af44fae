mod backoff;
mod client;
mod codec;
mod compression;
mod config;
mod connection;
mod constants;
mod error;
mod events;
mod heartbeat;
mod payloads;
mod router;
mod session;
mod state;
mod supervisor;
#[cfg(test)]
mod testing;

pub use backoff::BackoffPolicy;
pub use client::{Gateway, GatewayBuilder};
pub use codec::{ControlFrame, Envelope, FrameCodec};
pub use config::GatewayConfig;
pub use connection::{ConnectionFactory, GatewayConnection, WebSocketConnection};
pub use constants::{GATEWAY_URL, GATEWAY_VERSION, GatewayIntents, GatewayOpcode};
pub use error::{CloseDisposition, GatewayCloseCode, GatewayError, GatewayResult};
pub use events::{DispatchEvent, GatewayCommand, GatewayEvent, ReadyInfo};
pub use heartbeat::{HeartbeatScheduler, HeartbeatSignal};
pub use router::{DispatchHandler, DispatchRouter, HandlerError, HandlerTable, RouteOutcome};
pub use session::{SequenceUpdate, SessionState};
pub use state::ConnectionState;
pub use supervisor::{ConnectionSupervisor, SupervisorExit, SupervisorParts};
