use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::codec::Envelope;
use super::events::{DispatchEvent, ReadyInfo};
use super::payloads::ReadyPayload;
use super::session::{SequenceUpdate, SessionState};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer of one dispatch event name.
#[async_trait]
pub trait DispatchHandler: Send + Sync {
    async fn handle(&self, event: DispatchEvent) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> DispatchHandler for F
where
    F: Fn(DispatchEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: DispatchEvent) -> Result<(), HandlerError> {
        (self)(event).await
    }
}

/// Event name to handler map, shared between the facade and the router.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn DispatchHandler>>>>,
}

impl HandlerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_name`, returning whether one was replaced.
    pub fn insert(&self, event_name: impl Into<String>, handler: Arc<dyn DispatchHandler>) -> bool {
        self.handlers
            .write()
            .insert(event_name.into(), handler)
            .is_some()
    }

    pub fn remove(&self, event_name: &str) -> bool {
        self.handlers.write().remove(event_name).is_some()
    }

    #[must_use]
    pub fn get(&self, event_name: &str) -> Option<Arc<dyn DispatchHandler>> {
        self.handlers.read().get(event_name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

/// Session transition a dispatch carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMilestone {
    Ready(ReadyInfo),
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Sequence at or below the last applied one; nothing was delivered.
    Stale { current: u64 },
    Routed {
        delivered: bool,
        milestone: Option<SessionMilestone>,
    },
}

impl RouteOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Routed { .. })
    }
}

struct Delivery {
    handler: Arc<dyn DispatchHandler>,
    event: DispatchEvent,
}

/// Applies dispatch sequences and hands events to their handler in wire order.
pub struct DispatchRouter {
    handlers: HandlerTable,
    delivery_tx: mpsc::UnboundedSender<Delivery>,
}

impl DispatchRouter {
    /// Creates the router and spawns its delivery worker. The worker drains
    /// pending deliveries and exits once the router is dropped.
    #[must_use]
    pub fn spawn(handlers: HandlerTable) -> (Self, JoinHandle<()>) {
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_delivery(delivery_rx));

        (
            Self {
                handlers,
                delivery_tx,
            },
            worker,
        )
    }

    pub fn route(&self, session: &mut SessionState, envelope: Envelope) -> RouteOutcome {
        let name = envelope.event_name.unwrap_or_default();

        match session.apply_sequence(envelope.sequence) {
            SequenceUpdate::Stale { current } => {
                warn!(
                    event = %name,
                    sequence = ?envelope.sequence,
                    current,
                    "Dropping stale dispatch"
                );
                return RouteOutcome::Stale { current };
            }
            SequenceUpdate::Advanced { previous } => {
                if let (Some(previous), Some(sequence)) = (previous, envelope.sequence)
                    && sequence > previous + 1
                {
                    debug!(previous, sequence, "Sequence gap in dispatch stream");
                }
            }
            SequenceUpdate::Missing => {}
        }

        let event = DispatchEvent {
            name,
            sequence: envelope.sequence,
            payload: envelope.payload,
        };

        let milestone = match event.name.as_str() {
            "READY" => Self::apply_ready(session, &event).map(SessionMilestone::Ready),
            "RESUMED" => Some(SessionMilestone::Resumed),
            _ => None,
        };

        let delivered = match self.handlers.get(&event.name) {
            Some(handler) => {
                trace!(event = %event.name, sequence = ?event.sequence, "Routing dispatch");
                self.delivery_tx.send(Delivery { handler, event }).is_ok()
            }
            None => {
                trace!(event = %event.name, "No handler registered");
                false
            }
        };

        RouteOutcome::Routed {
            delivered,
            milestone,
        }
    }

    fn apply_ready(session: &mut SessionState, event: &DispatchEvent) -> Option<ReadyInfo> {
        let ready: ReadyPayload = match event.parse() {
            Ok(ready) => ready,
            Err(e) => {
                warn!(error = %e, "Failed to parse READY payload");
                return None;
            }
        };

        session.begin_session(
            ready.session_id.clone(),
            ready.resume_gateway_url.clone(),
            Some(ready.user.id.to_string()),
        );

        debug!(
            session_id = %ready.session_id,
            guilds = ready.guilds.len(),
            "Session established"
        );

        Some(ReadyInfo {
            session_id: ready.session_id,
            resume_url: ready.resume_gateway_url,
            user_id: ready.user.id,
            shard: ready.shard,
        })
    }
}

async fn run_delivery(mut delivery_rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(Delivery { handler, event }) = delivery_rx.recv().await {
        let name = event.name.clone();

        match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(event = %name, error = %e, "Dispatch handler failed");
            }
            Err(panic_info) => {
                let panic_msg = panic_message(panic_info.as_ref());
                error!(event = %name, panic = %panic_msg, "Dispatch handler panicked");
            }
        }
    }

    debug!("Delivery worker stopped");
}

pub(super) fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
