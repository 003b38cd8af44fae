use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::GatewayConfig;
use super::connection::{ConnectionFactory, GatewayConnection, WebSocketConnection};
use super::constants::GATEWAY_URL;
use super::error::{GatewayError, GatewayResult};
use super::events::{GatewayCommand, GatewayEvent};
use super::router::{DispatchHandler, HandlerTable, panic_message};
use super::state::ConnectionState;
use super::supervisor::{ConnectionSupervisor, SupervisorExit, SupervisorParts};
use crate::domain::entities::{BotToken, GuildMembersRequest, PresenceUpdate, VoiceStateUpdate};
use crate::domain::errors::HttpError;
use crate::domain::ports::GatewayInfoPort;

/// Commands queue across runs: the receiver goes back into the slot when a run ends.
struct CommandQueue {
    tx: mpsc::UnboundedSender<GatewayCommand>,
    rx: Option<mpsc::UnboundedReceiver<GatewayCommand>>,
}

impl CommandQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }

    fn take_receiver(&mut self) -> mpsc::UnboundedReceiver<GatewayCommand> {
        self.rx.take().unwrap_or_else(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            self.tx = tx;
            rx
        })
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct GatewayBuilder {
    token: BotToken,
    config: GatewayConfig,
    info_port: Option<Arc<dyn GatewayInfoPort>>,
    connection_factory: Option<ConnectionFactory>,
}

impl GatewayBuilder {
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Port used to look up the gateway URL when the config has no override.
    #[must_use]
    pub fn info_port(mut self, port: Arc<dyn GatewayInfoPort>) -> Self {
        self.info_port = Some(port);
        self
    }

    /// Replaces the WebSocket transport.
    #[must_use]
    pub fn connection_factory(mut self, factory: ConnectionFactory) -> Self {
        self.connection_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn build(self) -> Gateway {
        let connection_factory = self.connection_factory.unwrap_or_else(|| {
            Arc::new(|| Box::new(WebSocketConnection::new()) as Box<dyn GatewayConnection>)
        });
        let presence = self.config.presence.clone();

        Gateway {
            token: self.token,
            config: self.config,
            info_port: self.info_port,
            connection_factory,
            handlers: HandlerTable::new(),
            state: Arc::new(watch::Sender::new(ConnectionState::Idle)),
            outcome: Arc::new(watch::Sender::new(Some(Ok(())))),
            presence: Arc::new(Mutex::new(presence)),
            commands: Arc::new(Mutex::new(CommandQueue::new())),
            running: Mutex::new(None),
        }
    }
}

/// Entry point: owns the handler table and at most one running supervisor.
pub struct Gateway {
    token: BotToken,
    config: GatewayConfig,
    info_port: Option<Arc<dyn GatewayInfoPort>>,
    connection_factory: ConnectionFactory,
    handlers: HandlerTable,
    state: Arc<watch::Sender<ConnectionState>>,
    outcome: Arc<watch::Sender<Option<GatewayResult<()>>>>,
    presence: Arc<Mutex<Option<PresenceUpdate>>>,
    commands: Arc<Mutex<CommandQueue>>,
    running: Mutex<Option<Running>>,
}

impl Gateway {
    #[must_use]
    pub fn builder(token: BotToken) -> GatewayBuilder {
        GatewayBuilder {
            token,
            config: GatewayConfig::default(),
            info_port: None,
            connection_factory: None,
        }
    }

    /// Registers `handler` for dispatches named `event_name`, replacing any
    /// previous one. Returns whether a handler was replaced.
    pub fn on<H>(&self, event_name: impl Into<String>, handler: H) -> bool
    where
        H: DispatchHandler + 'static,
    {
        self.handlers.insert(event_name, Arc::new(handler))
    }

    pub fn off(&self, event_name: &str) -> bool {
        self.handlers.remove(event_name)
    }

    /// Starts the gateway and waits for the first `Connected`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::AlreadyConnected` if a run is active, or the
    /// terminal error if the gateway gave up before connecting.
    pub async fn connect(&self) -> GatewayResult<mpsc::UnboundedReceiver<GatewayEvent>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        {
            let mut running = self.running.lock();
            if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
                return Err(GatewayError::AlreadyConnected);
            }

            let cancel = CancellationToken::new();
            self.outcome.send_replace(None);

            let run = GatewayRun {
                parts: SupervisorParts {
                    config: self.config.clone(),
                    token: self.token.clone(),
                    base_url: String::new(),
                    connection: (self.connection_factory)(),
                    handlers: self.handlers.clone(),
                    presence: self.presence.clone(),
                    commands: self.commands.lock().take_receiver(),
                    events: events_tx,
                    state: self.state.clone(),
                    cancel: cancel.clone(),
                    ready: ready_tx,
                },
                info_port: self.info_port.clone(),
            };

            let task = tokio::spawn(supervise(
                run,
                self.commands.clone(),
                self.outcome.clone(),
            ));
            *running = Some(Running { cancel, task });
        }

        let ready = match ready_rx.await {
            Ok(ready) => ready,
            Err(_) => Err(self
                .closed()
                .await
                .err()
                .unwrap_or(GatewayError::ChannelClosed)),
        };

        if let Err(e) = ready {
            self.disconnect().await;
            return Err(e);
        }

        Ok(events_rx)
    }

    /// Stops the running supervisor and waits for it to finish. Idempotent.
    pub async fn disconnect(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "Gateway task did not shut down cleanly");
        }
        debug!("Gateway run finished");
    }

    /// Sets the presence now and for every future Identify.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ChannelClosed` if the command queue is gone.
    pub fn update_presence(&self, presence: PresenceUpdate) -> GatewayResult<()> {
        *self.presence.lock() = Some(presence.clone());
        self.queue(GatewayCommand::UpdatePresence(presence))
    }

    /// # Errors
    ///
    /// Returns `GatewayError::ChannelClosed` if the command queue is gone.
    pub fn update_voice_state(&self, voice: VoiceStateUpdate) -> GatewayResult<()> {
        self.queue(GatewayCommand::UpdateVoiceState(voice))
    }

    /// # Errors
    ///
    /// Returns `GatewayError::ChannelClosed` if the command queue is gone.
    pub fn request_guild_members(&self, request: GuildMembersRequest) -> GatewayResult<()> {
        self.queue(GatewayCommand::RequestGuildMembers(request))
    }

    fn queue(&self, command: GatewayCommand) -> GatewayResult<()> {
        self.commands
            .lock()
            .tx
            .send(command)
            .map_err(|_| GatewayError::ChannelClosed)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Waits for the current run to end and returns how it ended. Returns
    /// `Ok(())` right away when nothing is running.
    ///
    /// # Errors
    ///
    /// Returns the terminal error of the run.
    pub async fn closed(&self) -> GatewayResult<()> {
        let mut outcome = self.outcome.subscribe();
        let result = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| GatewayError::ChannelClosed)?
            .clone();
        result.unwrap_or(Ok(()))
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

struct GatewayRun {
    parts: SupervisorParts,
    info_port: Option<Arc<dyn GatewayInfoPort>>,
}

impl GatewayRun {
    async fn execute(mut self) -> SupervisorExit {
        let lookup = tokio::select! {
            () = self.parts.cancel.cancelled() => Err(GatewayError::ShuttingDown),
            url = resolve_gateway_url(&self.parts.config, self.info_port.as_deref()) => url,
        };

        match lookup {
            Ok(url) => {
                self.parts.base_url = url;
                ConnectionSupervisor::new(self.parts).run().await
            }
            Err(e) => {
                let result = if matches!(e, GatewayError::ShuttingDown) {
                    Ok(())
                } else {
                    error!(error = %e, "Could not resolve the gateway url");
                    Err(e.clone())
                };
                let _ = self.parts.ready.send(Err(e));
                SupervisorExit {
                    result,
                    commands: self.parts.commands,
                }
            }
        }
    }
}

async fn supervise(
    run: GatewayRun,
    commands: Arc<Mutex<CommandQueue>>,
    outcome: Arc<watch::Sender<Option<GatewayResult<()>>>>,
) {
    let state = run.parts.state.clone();
    let events = run.parts.events.clone();

    let result = match AssertUnwindSafe(run.execute()).catch_unwind().await {
        Ok(exit) => {
            commands.lock().rx = Some(exit.commands);
            exit.result
        }
        Err(panic_info) => {
            let panic_msg = panic_message(panic_info.as_ref());
            error!(panic = %panic_msg, "Gateway task panicked");

            state.send_replace(ConnectionState::Idle);
            let _ = events.send(GatewayEvent::Error {
                message: format!("Gateway task panicked: {panic_msg}"),
                recoverable: false,
            });
            Err(GatewayError::TaskPanicked { message: panic_msg })
        }
    };

    info!(ok = result.is_ok(), "Gateway loop terminated");
    outcome.send_replace(Some(result));
}

async fn resolve_gateway_url(
    config: &GatewayConfig,
    info_port: Option<&dyn GatewayInfoPort>,
) -> GatewayResult<String> {
    if let Some(url) = &config.gateway_url {
        return Ok(url.clone());
    }

    let Some(port) = info_port else {
        return Ok(GATEWAY_URL.to_string());
    };

    match port.gateway_bot().await {
        Ok(info) => {
            let limit = &info.session_start_limit;
            if limit.remaining == 0 {
                warn!(
                    reset_after_ms = limit.reset_after,
                    "Session start limit exhausted"
                );
            }
            info!(
                url = %info.url,
                shards = info.shards,
                remaining_starts = limit.remaining,
                "Resolved gateway url"
            );
            Ok(info.url)
        }
        Err(HttpError::Unauthorized { message }) => Err(GatewayError::auth_failed(message)),
        Err(e) => {
            warn!(error = %e, "Gateway lookup failed, using the default url");
            Ok(GATEWAY_URL.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::domain::entities::{PresenceStatus, Snowflake};
    use crate::domain::ports::mocks::MockGatewayInfoPort;
    use crate::domain::ports::{GatewayBotInfo, SessionStartLimit};
    use crate::infrastructure::discord::gateway::events::DispatchEvent;
    use crate::infrastructure::discord::gateway::router::HandlerError;
    use crate::infrastructure::discord::gateway::testing::{InMemoryGateway, ServerSocket};

    const WAIT: Duration = Duration::from_secs(600);

    fn test_config() -> GatewayConfig {
        GatewayConfig::new()
            .with_compression(false)
            .with_gateway_url("wss://gateway.test")
    }

    fn gateway(server: &InMemoryGateway, config: GatewayConfig) -> Gateway {
        Gateway::builder(BotToken::new_unchecked("test-token"))
            .config(config)
            .connection_factory(server.factory())
            .build()
    }

    /// Accepts one socket and answers Identify with `READY`.
    fn serve_identify(mut server: InMemoryGateway) -> JoinHandle<(InMemoryGateway, ServerSocket)> {
        tokio::spawn(async move {
            let mut socket = server.accept().await;
            socket.hello(45_000);
            let identify = socket.next_payload().await;
            assert_eq!(identify["op"], 2);
            socket.ready(1, "session-1");
            (server, socket)
        })
    }

    fn bot_info(url: &str) -> GatewayBotInfo {
        GatewayBotInfo {
            url: url.to_string(),
            shards: 1,
            session_start_limit: SessionStartLimit {
                total: 1000,
                remaining: 999,
                reset_after: 0,
                max_concurrency: 1,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_for_connected() {
        let server = InMemoryGateway::new();
        let client = gateway(&server, test_config());
        let _script = serve_identify(server);

        let mut events = client.connect().await.unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(client.is_running());
        assert!(matches!(
            events.recv().await,
            Some(GatewayEvent::Connected { session_id, .. }) if session_id == "session-1"
        ));
        assert!(matches!(
            events.recv().await,
            Some(GatewayEvent::Ready { user_id: Snowflake(42), .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_is_rejected() {
        let server = InMemoryGateway::new();
        let client = gateway(&server, test_config());
        let _script = serve_identify(server);

        let _events = client.connect().await.unwrap();
        let second = client.connect().await;

        assert!(matches!(second, Err(GatewayError::AlreadyConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let server = InMemoryGateway::new();
        let client = gateway(&server, test_config());
        let script = serve_identify(server);

        let _events = client.connect().await.unwrap();
        let (_server, mut socket) = script.await.unwrap();

        client.disconnect().await;
        client.disconnect().await;

        assert_eq!(socket.next_close().await, 1000);
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(!client.is_running());
        assert!(client.closed().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_handler_receives_dispatch() {
        let server = InMemoryGateway::new();
        let client = gateway(&server, test_config());
        let script = serve_identify(server);

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!client.on("MESSAGE_CREATE", move |event: DispatchEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
                Ok::<(), HandlerError>(())
            }
        }));

        let _events = client.connect().await.unwrap();
        let (_server, socket) = script.await.unwrap();
        socket.dispatch("MESSAGE_CREATE", 2, json!({"content": "hi"}));

        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.name, "MESSAGE_CREATE");
        assert_eq!(event.sequence, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_is_sent_and_remembered_for_identify() {
        let server = InMemoryGateway::new();
        let client = gateway(&server, test_config());
        let script = serve_identify(server);

        let _events = client.connect().await.unwrap();
        let (mut server, mut socket) = script.await.unwrap();

        client
            .update_presence(PresenceUpdate::new(PresenceStatus::DoNotDisturb))
            .unwrap();
        let update = socket.next_payload().await;
        assert_eq!(update["op"], 3);
        assert_eq!(update["d"]["status"], "dnd");

        socket.close(Some(4009));

        let mut socket = server.accept().await;
        socket.hello(45_000);
        let identify = socket.next_payload().await;
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["presence"]["status"], "dnd");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_close_fails_connect_and_allows_retry() {
        let mut server = InMemoryGateway::new();
        let client = gateway(&server, test_config());

        let script = tokio::spawn(async move {
            let mut socket = server.accept().await;
            socket.hello(45_000);
            socket.next_payload().await;
            socket.close(Some(4004));
            server
        });

        let result = client.connect().await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed { .. })));
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(matches!(
            client.closed().await,
            Err(GatewayError::AuthenticationFailed { .. })
        ));

        let server = script.await.unwrap();
        let _script = serve_identify(server);
        assert!(client.connect().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_info_port_url_is_used() {
        let mut server = InMemoryGateway::new();
        let mut port = MockGatewayInfoPort::new();
        port.expect_gateway_bot()
            .times(1)
            .returning(|| Ok(bot_info("wss://from-port.test")));

        let client = Gateway::builder(BotToken::new_unchecked("test-token"))
            .config(GatewayConfig::new().with_compression(false))
            .info_port(Arc::new(port))
            .connection_factory(server.factory())
            .build();

        let connect = tokio::spawn(async move { client.connect().await.map(|_| ()) });
        let socket = server.accept().await;
        assert_eq!(socket.url.host_str(), Some("from-port.test"));
        connect.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_url_overrides_info_port() {
        let mut server = InMemoryGateway::new();
        let mut port = MockGatewayInfoPort::new();
        port.expect_gateway_bot().never();

        let client = Gateway::builder(BotToken::new_unchecked("test-token"))
            .config(test_config())
            .info_port(Arc::new(port))
            .connection_factory(server.factory())
            .build();

        let connect = tokio::spawn(async move { client.connect().await.map(|_| ()) });
        let socket = server.accept().await;
        assert_eq!(socket.url.host_str(), Some("gateway.test"));
        connect.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_during_lookup_fails_connect() {
        let mut server = InMemoryGateway::new();
        let mut port = MockGatewayInfoPort::new();
        port.expect_gateway_bot()
            .times(1)
            .returning(|| Err(HttpError::unauthorized("401: Unauthorized")));

        let client = Gateway::builder(BotToken::new_unchecked("test-token"))
            .config(GatewayConfig::new())
            .info_port(Arc::new(port))
            .connection_factory(server.factory())
            .build();

        let result = client.connect().await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed { .. })));
        assert!(server.try_accept().is_none());
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back_to_default_url() {
        let mut port = MockGatewayInfoPort::new();
        port.expect_gateway_bot()
            .returning(|| Err(HttpError::network("connection reset")));

        let url = resolve_gateway_url(&GatewayConfig::new(), Some(&port))
            .await
            .unwrap();
        assert_eq!(url, GATEWAY_URL);

        let url = resolve_gateway_url(&GatewayConfig::new(), None).await.unwrap();
        assert_eq!(url, GATEWAY_URL);
    }

    #[tokio::test]
    async fn test_commands_queue_while_idle() {
        let server = InMemoryGateway::new();
        let client = gateway(&server, test_config());

        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(client.update_voice_state(VoiceStateUpdate::leave(Snowflake(1))).is_ok());
        assert!(client.closed().await.is_ok());
    }
}
