use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use oxigate::domain::entities::BotToken;
use oxigate::infrastructure::discord::gateway::HandlerError;
use oxigate::infrastructure::{
    AppConfig, CliArgs, DiscordHttpClient, DispatchEvent, Gateway, GatewayEvent, StorageManager,
};

#[derive(Debug, Deserialize)]
struct MessageCreate {
    channel_id: String,
    content: String,
    author: Author,
}

#[derive(Debug, Deserialize)]
struct Author {
    username: String,
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = match &args.config {
        Some(path) => StorageManager::with_dir(
            path.parent()
                .map(std::path::Path::to_path_buf)
                .unwrap_or_default(),
        ),
        None => StorageManager::new()?,
    };

    let mut config = storage
        .load_config(args.config.as_deref())
        .wrap_err("failed to load configuration")?;
    config.merge_with_args(args);
    Ok(config)
}

async fn log_message(event: DispatchEvent) -> Result<(), HandlerError> {
    let message: MessageCreate = event.parse()?;
    info!(
        channel_id = %message.channel_id,
        author = %message.author.username,
        content = %message.content,
        "Message received"
    );
    Ok(())
}

fn build_gateway(args: &CliArgs, config: &AppConfig) -> Result<Gateway> {
    let raw_token = args
        .token
        .clone()
        .ok_or_else(|| eyre!("no token given; pass --token or set DISCORD_TOKEN"))?;
    let token = BotToken::new(raw_token).ok_or_else(|| eyre!("token is not a valid bot token"))?;

    let http = match &config.gateway.api_base_url {
        Some(base_url) => DiscordHttpClient::with_base_url(token.clone(), base_url.clone())?,
        None => DiscordHttpClient::new(token.clone())?,
    };

    let gateway = Gateway::builder(token)
        .config(config.gateway_config())
        .info_port(Arc::new(http))
        .build();

    gateway.on("MESSAGE_CREATE", log_message);
    Ok(gateway)
}

fn log_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::Ready {
            session_id,
            user_id,
            shard,
        } => info!(%session_id, %user_id, ?shard, "Ready"),
        GatewayEvent::Resumed => info!("Session resumed"),
        GatewayEvent::Connected { session_id, .. } => info!(%session_id, "Connected"),
        GatewayEvent::Disconnected { reason, can_resume } => {
            warn!(%reason, can_resume, "Disconnected");
        }
        GatewayEvent::Reconnecting { attempt, delay } => {
            info!(attempt, delay_ms = delay.as_millis(), "Reconnecting");
        }
        GatewayEvent::HeartbeatAck { latency_ms } => {
            debug!(latency_ms, "Heartbeat acknowledged");
        }
        GatewayEvent::Error {
            message,
            recoverable,
        } => error!(%message, recoverable, "Gateway error"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = oxigate::VERSION, "Starting {}", oxigate::NAME);

    let gateway = build_gateway(&args, &config)?;
    let mut events = gateway.connect().await?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupted, closing the gateway");
                gateway.disconnect().await;
                break;
            }
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
        }
    }

    gateway.closed().await?;
    Ok(())
}
