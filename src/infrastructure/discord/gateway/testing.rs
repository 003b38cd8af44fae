//! In-memory transport for driving the gateway through protocol scenarios.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

use super::connection::{ConnectionFactory, GatewayConnection};
use super::error::{GatewayError, GatewayResult};

const WAIT_LIMIT: Duration = Duration::from_secs(600);

pub enum ServerFrame {
    Text(Bytes),
    Close { code: Option<u16>, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Text(Value),
    Close(u16),
}

struct ClientSide {
    inbound: mpsc::UnboundedReceiver<ServerFrame>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

/// Client half, handed to the supervisor.
pub struct InMemoryConnection {
    accept_tx: mpsc::UnboundedSender<ServerSocket>,
    faults: Faults,
    current: Option<ClientSide>,
}

/// Failures injected into the next operations of every connection.
#[derive(Clone, Default)]
struct Faults {
    refusals: Arc<AtomicU32>,
    stalls: Arc<AtomicU32>,
    send_failures: Arc<AtomicU32>,
}

impl Faults {
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Server half: yields one `ServerSocket` per successful `connect`.
pub struct InMemoryGateway {
    accept_tx: mpsc::UnboundedSender<ServerSocket>,
    accept_rx: mpsc::UnboundedReceiver<ServerSocket>,
    faults: Faults,
}

impl InMemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Self {
            accept_tx,
            accept_rx,
            faults: Faults::default(),
        }
    }

    #[must_use]
    pub fn connection(&self) -> InMemoryConnection {
        InMemoryConnection {
            accept_tx: self.accept_tx.clone(),
            faults: self.faults.clone(),
            current: None,
        }
    }

    #[must_use]
    pub fn factory(&self) -> ConnectionFactory {
        let accept_tx = self.accept_tx.clone();
        let faults = self.faults.clone();
        Arc::new(move || {
            Box::new(InMemoryConnection {
                accept_tx: accept_tx.clone(),
                faults: faults.clone(),
                current: None,
            }) as Box<dyn GatewayConnection>
        })
    }

    /// Makes the next `count` connection attempts fail.
    pub fn refuse_next(&self, count: u32) {
        self.faults.refusals.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` connection attempts hang until cancelled.
    pub fn stall_next(&self, count: u32) {
        self.faults.stalls.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail as if the peer vanished mid-write.
    pub fn fail_next_sends(&self, count: u32) {
        self.faults.send_failures.store(count, Ordering::SeqCst);
    }

    pub async fn accept(&mut self) -> ServerSocket {
        timeout(WAIT_LIMIT, self.accept_rx.recv())
            .await
            .expect("no connection attempt")
            .expect("gateway closed")
    }

    pub fn try_accept(&mut self) -> Option<ServerSocket> {
        self.accept_rx.try_recv().ok()
    }
}

pub struct ServerSocket {
    pub url: Url,
    to_client: mpsc::UnboundedSender<ServerFrame>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

impl ServerSocket {
    pub fn send_raw(&self, text: &str) {
        let _ = self
            .to_client
            .send(ServerFrame::Text(Bytes::copy_from_slice(text.as_bytes())));
    }

    pub fn send_json(&self, value: &Value) {
        self.send_raw(&value.to_string());
    }

    pub fn op(&self, op: u8, d: Value) {
        self.send_json(&json!({"op": op, "d": d}));
    }

    pub fn hello(&self, interval_ms: u64) {
        self.op(10, json!({"heartbeat_interval": interval_ms}));
    }

    pub fn ack(&self) {
        self.op(11, Value::Null);
    }

    pub fn dispatch(&self, name: &str, sequence: u64, d: Value) {
        self.send_json(&json!({"op": 0, "s": sequence, "t": name, "d": d}));
    }

    pub fn ready(&self, sequence: u64, session_id: &str) {
        self.dispatch(
            "READY",
            sequence,
            json!({
                "v": 10,
                "session_id": session_id,
                "resume_gateway_url": "wss://resume.gateway.test",
                "user": {"id": "42", "username": "bot"},
                "guilds": []
            }),
        );
    }

    pub fn close(&self, code: Option<u16>) {
        let _ = self.to_client.send(ServerFrame::Close {
            code,
            reason: String::new(),
        });
    }

    pub async fn next_frame(&mut self) -> ClientFrame {
        timeout(WAIT_LIMIT, self.from_client.recv())
            .await
            .expect("client sent nothing")
            .expect("client dropped the socket")
    }

    /// Next text frame other than a heartbeat.
    pub async fn next_payload(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                ClientFrame::Text(value) if value["op"] == 1 => {}
                ClientFrame::Text(value) => return value,
                ClientFrame::Close(code) => panic!("client closed with {code}"),
            }
        }
    }

    pub async fn next_heartbeat(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                ClientFrame::Text(value) if value["op"] == 1 => return value,
                ClientFrame::Text(_) => {}
                ClientFrame::Close(code) => panic!("client closed with {code}"),
            }
        }
    }

    /// Skips text frames until the client closes.
    pub async fn next_close(&mut self) -> u16 {
        loop {
            if let ClientFrame::Close(code) = self.next_frame().await {
                return code;
            }
        }
    }

    pub fn try_next_frame(&mut self) -> Option<ClientFrame> {
        self.from_client.try_recv().ok()
    }
}

#[async_trait]
impl GatewayConnection for InMemoryConnection {
    async fn connect(&mut self, url: &Url) -> GatewayResult<()> {
        self.current = None;

        if Faults::take(&self.faults.refusals) {
            return Err(GatewayError::connection_failed("connection refused"));
        }
        if Faults::take(&self.faults.stalls) {
            std::future::pending::<()>().await;
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();

        self.accept_tx
            .send(ServerSocket {
                url: url.clone(),
                to_client,
                from_client,
            })
            .map_err(|_| GatewayError::connection_failed("gateway is gone"))?;

        self.current = Some(ClientSide { inbound, outbound });
        Ok(())
    }

    async fn disconnect(&mut self, code: u16) -> GatewayResult<()> {
        if let Some(side) = self.current.take() {
            let _ = side.outbound.send(ClientFrame::Close(code));
        }
        Ok(())
    }

    async fn send(&mut self, frame: String) -> GatewayResult<()> {
        if self.current.is_some() && Faults::take(&self.faults.send_failures) {
            self.current = None;
            return Err(GatewayError::websocket("peer went away"));
        }

        let side = self.current.as_ref().ok_or(GatewayError::NotConnected)?;
        let value = serde_json::from_str(&frame)
            .map_err(|e| GatewayError::serialization(e.to_string()))?;
        side.outbound
            .send(ClientFrame::Text(value))
            .map_err(|_| GatewayError::websocket("peer went away"))
    }

    async fn receive(&mut self) -> GatewayResult<Bytes> {
        let side = self.current.as_mut().ok_or(GatewayError::NotConnected)?;

        match side.inbound.recv().await {
            Some(ServerFrame::Text(bytes)) => Ok(bytes),
            Some(ServerFrame::Close { code, reason }) => {
                self.current = None;
                Err(GatewayError::closed(code, reason))
            }
            None => {
                self.current = None;
                Err(GatewayError::closed(None, "stream ended"))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.current.is_some()
    }
}
