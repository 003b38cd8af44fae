use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::backoff::BackoffPolicy;
use super::codec::{ControlFrame, Envelope, FrameCodec};
use super::config::GatewayConfig;
use super::connection::GatewayConnection;
use super::constants::{GATEWAY_VERSION, GatewayOpcode, NORMAL_CLOSE_CODE, RESUMABLE_CLOSE_CODE};
use super::error::{CloseDisposition, GatewayError, GatewayResult};
use super::events::{GatewayCommand, GatewayEvent};
use super::heartbeat::{HeartbeatScheduler, HeartbeatSignal};
use super::payloads::{HelloPayload, Identify, Resume};
use super::router::{DispatchRouter, HandlerTable, RouteOutcome, SessionMilestone};
use super::session::SessionState;
use super::state::{ConnectionState, GatewayState};
use crate::domain::entities::{BotToken, PresenceUpdate};

const HEARTBEAT_CHANNEL_CAPACITY: usize = 4;
const DELIVERY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a supervisor run is built from.
pub struct SupervisorParts {
    pub config: GatewayConfig,
    pub token: BotToken,
    pub base_url: String,
    pub connection: Box<dyn GatewayConnection>,
    pub handlers: HandlerTable,
    /// Latest presence, reused for every Identify.
    pub presence: Arc<Mutex<Option<PresenceUpdate>>>,
    pub commands: mpsc::UnboundedReceiver<GatewayCommand>,
    pub events: mpsc::UnboundedSender<GatewayEvent>,
    pub state: Arc<watch::Sender<ConnectionState>>,
    pub cancel: CancellationToken,
    /// Resolved with the first `Connected` or the terminal error.
    pub ready: oneshot::Sender<GatewayResult<()>>,
}

/// What a finished run hands back to its owner.
pub struct SupervisorExit {
    /// `Ok` when cancelled, the terminal error otherwise.
    pub result: GatewayResult<()>,
    /// The command queue, so commands sent after the run survive into the next one.
    pub commands: mpsc::UnboundedReceiver<GatewayCommand>,
}

/// Owns the transport and the session for one gateway run and decides when
/// to identify, resume, reconnect or give up.
pub struct ConnectionSupervisor {
    config: GatewayConfig,
    token: BotToken,
    base_url: String,
    connection: Box<dyn GatewayConnection>,
    session: SessionState,
    state: GatewayState,
    sequence_tx: watch::Sender<Option<u64>>,
    router: DispatchRouter,
    delivery_worker: JoinHandle<()>,
    backoff: BackoffPolicy,
    presence: Arc<Mutex<Option<PresenceUpdate>>>,
    commands: mpsc::UnboundedReceiver<GatewayCommand>,
    /// Taken off the queue but not yet written; retried on the next connected socket.
    pending_command: Option<GatewayCommand>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    cancel: CancellationToken,
    ready: Option<oneshot::Sender<GatewayResult<()>>>,
    protocol_failures: u32,
    resume_retries: u32,
    handshake_deadline: Option<Instant>,
}

impl ConnectionSupervisor {
    /// Must be called inside a tokio runtime: spawns the delivery worker.
    #[must_use]
    pub fn new(parts: SupervisorParts) -> Self {
        let (router, delivery_worker) = DispatchRouter::spawn(parts.handlers);
        let (sequence_tx, _) = watch::channel(None);
        let backoff = parts.config.backoff.clone();

        Self {
            config: parts.config,
            token: parts.token,
            base_url: parts.base_url,
            connection: parts.connection,
            session: SessionState::new(),
            state: GatewayState::new(parts.state),
            sequence_tx,
            router,
            delivery_worker,
            backoff,
            presence: parts.presence,
            commands: parts.commands,
            pending_command: None,
            events: parts.events,
            cancel: parts.cancel,
            ready: Some(parts.ready),
            protocol_failures: 0,
            resume_retries: 0,
            handshake_deadline: None,
        }
    }

    pub async fn run(mut self) -> SupervisorExit {
        let result = self.run_loop().await;

        if result.is_ok() {
            self.state.transition_to_closing();
            if let Err(e) = self.connection.disconnect(NORMAL_CLOSE_CODE).await {
                debug!(error = %e, "Error while closing socket");
            }
            self.emit(GatewayEvent::Disconnected {
                reason: "disconnect requested".to_string(),
                can_resume: false,
            });
            info!("Gateway disconnected");
        }

        self.state.transition_to_idle();

        if let Some(ready) = self.ready.take() {
            let outcome = result.as_ref().err().cloned().unwrap_or(GatewayError::ShuttingDown);
            let _ = ready.send(Err(outcome));
        }

        let Self {
            router,
            delivery_worker,
            commands,
            ..
        } = self;
        drop(router);
        if timeout(DELIVERY_DRAIN_TIMEOUT, delivery_worker).await.is_err() {
            warn!("Delivery worker did not finish in time");
        }

        SupervisorExit { result, commands }
    }

    async fn run_loop(&mut self) -> GatewayResult<()> {
        loop {
            let error = match self.run_connection().await {
                Ok(never) => match never {},
                Err(e) => e,
            };

            if matches!(error, GatewayError::ShuttingDown) {
                return Ok(());
            }

            self.handle_closure(error).await?;

            let attempt = self.state.transition_to_reconnecting();
            let delay = self.backoff.next_delay();

            info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to gateway"
            );
            self.emit(GatewayEvent::Reconnecting { attempt, delay });

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = sleep(delay) => {}
            }
        }
    }

    /// One socket lifetime. Only ever returns the reason it ended.
    async fn run_connection(&mut self) -> GatewayResult<Infallible> {
        let resuming = self.session.can_resume();
        let url = self.connection_url(resuming)?;

        self.state.transition_to_connecting();
        info!(
            host = url.host_str().unwrap_or_default(),
            resuming, "Connecting to gateway"
        );

        tokio::select! {
            () = self.cancel.cancelled() => return Err(GatewayError::ShuttingDown),
            result = timeout(self.config.connect_timeout, self.connection.connect(&url)) => {
                result.map_err(|_| GatewayError::timeout("connection"))??;
            }
        }

        self.state.transition_to_awaiting_hello();
        let interval = self.await_hello().await?;

        if resuming {
            self.send_resume().await?;
        } else {
            self.send_identify().await?;
        }

        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel(HEARTBEAT_CHANNEL_CAPACITY);
        let heartbeat =
            HeartbeatScheduler::start(interval, self.sequence_tx.subscribe(), heartbeat_tx);

        self.read_loop(&heartbeat, &mut heartbeat_rx).await
    }

    fn connection_url(&self, resuming: bool) -> GatewayResult<Url> {
        if resuming && let Some(resume_url) = self.session.resume_url() {
            match self.build_url(resume_url) {
                Ok(url) => return Ok(url),
                Err(e) => warn!(error = %e, "Ignoring malformed resume url"),
            }
        }

        self.build_url(&self.base_url)
    }

    fn build_url(&self, base: &str) -> GatewayResult<Url> {
        let mut url =
            Url::parse(base).map_err(|e| GatewayError::invalid_url(base, e.to_string()))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(GatewayError::invalid_url(base, "expected a ws or wss url"));
        }

        {
            let mut query = url.query_pairs_mut();
            query
                .clear()
                .append_pair("v", &GATEWAY_VERSION.to_string())
                .append_pair("encoding", "json");
            if self.config.compress {
                query.append_pair("compress", "zlib-stream");
            }
        }

        Ok(url)
    }

    async fn await_hello(&mut self) -> GatewayResult<Duration> {
        let frame = tokio::select! {
            () = self.cancel.cancelled() => return Err(GatewayError::ShuttingDown),
            frame = timeout(self.config.hello_timeout, self.connection.receive()) => {
                frame.map_err(|_| GatewayError::timeout("Hello"))??
            }
        };

        let hello = FrameCodec::decode(&frame)
            .ok()
            .filter(|envelope| envelope.opcode() == Some(GatewayOpcode::Hello))
            .and_then(|envelope| envelope.parse_payload::<HelloPayload>().ok())
            .filter(|hello| hello.heartbeat_interval > 0);

        let Some(hello) = hello else {
            warn!("First frame was not a valid Hello");
            self.reset_session();
            self.note_protocol_failure()?;
            return Err(GatewayError::protocol("expected Hello as the first frame"));
        };

        debug!(interval_ms = hello.heartbeat_interval, "Received Hello");
        self.session.set_heartbeat_interval(hello.heartbeat_interval);
        Ok(Duration::from_millis(hello.heartbeat_interval))
    }

    async fn send_identify(&mut self) -> GatewayResult<()> {
        let interval = self.session.heartbeat_interval_ms();
        self.reset_session();
        if let Some(interval) = interval {
            self.session.set_heartbeat_interval(interval);
        }

        let mut identify = Identify::new(self.token.clone(), self.config.intents);
        identify.large_threshold = self.config.large_threshold;
        identify.shard = self.config.shard;
        identify.presence = self.presence.lock().clone();

        self.state.transition_to_identifying();
        self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout);

        info!(
            intents = self.config.intents.bits(),
            shard = ?self.config.shard,
            "Identifying"
        );
        self.send_frame(ControlFrame::Identify(Box::new(identify)))
            .await
    }

    async fn send_resume(&mut self) -> GatewayResult<()> {
        let (Some(session_id), Some(seq)) = (self.session.session_id(), self.session.sequence())
        else {
            return self.send_identify().await;
        };

        let resume = Resume {
            token: self.token.clone(),
            session_id: session_id.to_string(),
            seq,
        };

        self.state.transition_to_resuming();
        self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout);

        info!(session_id = %resume.session_id, seq, "Resuming session");
        self.send_frame(ControlFrame::Resume(resume)).await
    }

    async fn read_loop(
        &mut self,
        heartbeat: &HeartbeatScheduler,
        heartbeat_rx: &mut mpsc::Receiver<HeartbeatSignal>,
    ) -> GatewayResult<Infallible> {
        loop {
            let can_send = self.state.connection().can_send();
            let deadline = self.handshake_deadline;

            if can_send {
                self.flush_pending_command().await?;
            }

            tokio::select! {
                () = self.cancel.cancelled() => return Err(GatewayError::ShuttingDown),
                frame = self.connection.receive() => {
                    let frame = frame?;
                    self.handle_frame(&frame, heartbeat).await?;
                }
                Some(signal) = heartbeat_rx.recv() => {
                    self.handle_heartbeat_signal(signal).await?;
                }
                Some(command) = self.commands.recv(), if can_send => {
                    self.pending_command = Some(command);
                    self.flush_pending_command().await?;
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!("Handshake was not answered in time");
                    return Err(GatewayError::timeout("handshake"));
                }
            }
        }
    }

    async fn flush_pending_command(&mut self) -> GatewayResult<()> {
        let Some(command) = self.pending_command.take() else {
            return Ok(());
        };

        trace!(command = ?command, "Sending queued command");
        if let Err(e) = self.send_frame(command.clone().into_frame()).await {
            debug!(error = %e, "Command write failed, keeping it for the next session");
            self.pending_command = Some(command);
            return Err(e);
        }
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: &[u8],
        heartbeat: &HeartbeatScheduler,
    ) -> GatewayResult<()> {
        let envelope = match FrameCodec::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "Skipping malformed frame");
                return Ok(());
            }
        };

        match envelope.opcode() {
            Some(GatewayOpcode::Dispatch) => {
                self.handle_dispatch(envelope);
                Ok(())
            }
            Some(GatewayOpcode::Heartbeat) => {
                debug!("Gateway requested a heartbeat");
                self.send_frame(ControlFrame::Heartbeat {
                    sequence: self.session.sequence(),
                })
                .await
            }
            Some(GatewayOpcode::Reconnect) => {
                info!("Gateway requested reconnect");
                Err(GatewayError::closed(
                    Some(RESUMABLE_CLOSE_CODE),
                    "reconnect requested",
                ))
            }
            Some(GatewayOpcode::InvalidSession) => self.handle_invalid_session(&envelope).await,
            Some(GatewayOpcode::HeartbeatAck) => {
                heartbeat.acknowledge();
                if let Some(latency_ms) = self.state.record_heartbeat_ack() {
                    trace!(latency_ms, "Heartbeat acknowledged");
                    self.emit(GatewayEvent::HeartbeatAck { latency_ms });
                }
                Ok(())
            }
            opcode => {
                debug!(op = envelope.op, opcode = ?opcode, "Ignoring frame");
                Ok(())
            }
        }
    }

    fn handle_dispatch(&mut self, envelope: Envelope) {
        let RouteOutcome::Routed { milestone, .. } =
            self.router.route(&mut self.session, envelope)
        else {
            return;
        };

        self.sequence_tx.send_replace(self.session.sequence());

        if self.state.connection().is_handshaking() {
            self.mark_connected();
        }

        match milestone {
            Some(SessionMilestone::Ready(ready)) => {
                info!(
                    session_id = %ready.session_id,
                    user_id = %ready.user_id,
                    "Gateway ready"
                );
                self.emit(GatewayEvent::Ready {
                    session_id: ready.session_id,
                    user_id: ready.user_id,
                    shard: ready.shard,
                });
            }
            Some(SessionMilestone::Resumed) => {
                info!("Session resumed");
                self.emit(GatewayEvent::Resumed);
            }
            None => {}
        }
    }

    fn mark_connected(&mut self) {
        self.state.transition_to_connected();
        self.handshake_deadline = None;
        self.backoff.reset();
        self.protocol_failures = 0;
        self.resume_retries = 0;

        info!(session_id = ?self.session.session_id(), "Gateway connected");
        self.emit(GatewayEvent::Connected {
            session_id: self.session.session_id().unwrap_or_default().to_string(),
            resume_url: self.session.resume_url().map(str::to_string),
        });

        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(()));
        }
    }

    async fn handle_invalid_session(&mut self, envelope: &Envelope) -> GatewayResult<()> {
        let resumable = envelope.parse_payload::<bool>().unwrap_or(false);
        warn!(resumable, "Gateway invalidated the session");

        tokio::select! {
            () = self.cancel.cancelled() => return Err(GatewayError::ShuttingDown),
            () = sleep(self.config.invalid_session_delay) => {}
        }

        if resumable
            && self.session.can_resume()
            && self.resume_retries < self.config.invalid_session_resume_retries
        {
            self.resume_retries += 1;
            debug!(retry = self.resume_retries, "Retrying resume");
            return self.send_resume().await;
        }

        if !resumable {
            self.note_protocol_failure()?;
        }
        self.send_identify().await
    }

    async fn handle_heartbeat_signal(&mut self, signal: HeartbeatSignal) -> GatewayResult<()> {
        match signal {
            HeartbeatSignal::Beat { sequence } => {
                self.send_frame(ControlFrame::Heartbeat { sequence }).await?;
                self.state.record_heartbeat_sent();
                debug!(sequence = ?sequence, "Sent heartbeat");
                Ok(())
            }
            HeartbeatSignal::Zombied => {
                warn!("Connection zombied, reconnecting");
                Err(GatewayError::HeartbeatTimeout)
            }
        }
    }

    /// Tears down the socket after `error` and decides whether the run continues.
    async fn handle_closure(&mut self, error: GatewayError) -> GatewayResult<()> {
        let error = match error {
            GatewayError::ConnectionClosed {
                code: Some(code),
                reason,
            } if CloseDisposition::classify(Some(code)) == CloseDisposition::Fatal => {
                GatewayError::from_fatal_close(code, reason)
            }
            other => other,
        };

        self.state.transition_to_closing();
        self.handshake_deadline = None;

        if !error.should_reconnect() {
            error!(error = %error, "Gateway connection failed permanently");
            self.reset_session();
            self.close_socket(NORMAL_CLOSE_CODE).await;
            self.emit(GatewayEvent::Disconnected {
                reason: error.to_string(),
                can_resume: false,
            });
            self.emit(GatewayEvent::Error {
                message: error.to_string(),
                recoverable: false,
            });
            return Err(error);
        }

        let keep_session = error.can_resume();
        if !keep_session {
            self.reset_session();
        }
        self.close_socket(if keep_session {
            RESUMABLE_CLOSE_CODE
        } else {
            NORMAL_CLOSE_CODE
        })
        .await;

        let can_resume = self.session.can_resume();
        warn!(error = %error, can_resume, "Gateway connection lost");
        self.emit(GatewayEvent::Disconnected {
            reason: error.to_string(),
            can_resume,
        });

        Ok(())
    }

    async fn close_socket(&mut self, code: u16) {
        if let Err(e) = self.connection.disconnect(code).await {
            debug!(error = %e, code, "Error while closing socket");
        }
    }

    async fn send_frame(&mut self, frame: ControlFrame) -> GatewayResult<()> {
        let opcode = frame.opcode();
        let text = FrameCodec::encode(&frame)?;
        trace!(opcode = ?opcode, len = text.len(), "Sending frame");
        self.connection.send(text).await
    }

    fn note_protocol_failure(&mut self) -> GatewayResult<()> {
        self.protocol_failures += 1;
        if self.protocol_failures > self.config.protocol_failure_budget {
            return Err(GatewayError::ProtocolBudgetExhausted {
                failures: self.protocol_failures,
            });
        }

        debug!(
            failures = self.protocol_failures,
            budget = self.config.protocol_failure_budget,
            "Protocol failure recorded"
        );
        Ok(())
    }

    fn reset_session(&mut self) {
        self.session.clear();
        self.sequence_tx.send_replace(None);
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }
}
