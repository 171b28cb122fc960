use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use provider_core::{gateway::GatewayConnector, ProviderEvent, Supervisor};
use server::{load_settings, AppState, DEFAULT_SETTINGS_FILE};
use storage::FileSessionStore;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[arg(long)]
    bot_name: Option<String>,
    #[arg(long)]
    gateway_url: Option<String>,
    #[arg(long)]
    pairing_code: bool,
    #[arg(long)]
    phone: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if let Some(bot_name) = args.bot_name {
        settings.bot_name = bot_name;
    }
    if let Some(gateway_url) = args.gateway_url {
        settings.gateway_url = gateway_url;
    }
    if args.pairing_code {
        settings.use_pairing_code = true;
    }
    if args.phone.is_some() {
        settings.phone_number = args.phone;
    }

    let connector = GatewayConnector::new(&settings.gateway_url)?;
    let store = FileSessionStore::new(&settings.session_root, &settings.bot_name);
    info!(
        bot = %settings.bot_name,
        session_dir = %store.session_dir().display(),
        gateway = %settings.gateway_url,
        "bot: starting"
    );

    let supervisor = Supervisor::new(
        settings.provider_config(),
        Arc::new(store),
        Arc::new(connector),
    );
    let state = AppState::new(
        settings.bot_name.clone(),
        supervisor.qr_artifact().path(),
        supervisor.events(),
    );
    state.spawn_listener();
    tokio::spawn(log_events(supervisor.subscribe_events()));

    supervisor.spawn().await;

    let control = tokio::spawn({
        let bind = settings.http_bind.clone();
        async move { server::serve(&bind, state).await }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!("bot: failed to listen for shutdown signal: {err}");
            }
            info!("bot: shutdown requested");
        }
        result = control => {
            match result {
                Ok(Ok(())) => warn!("bot: control plane stopped"),
                Ok(Err(err)) => error!("bot: control plane failed: {err:#}"),
                Err(err) => error!("bot: control plane task failed: {err}"),
            }
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<ProviderEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "bot: event log lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ProviderEvent::Ready(ready) => info!(ready, "bot: ready"),
            ProviderEvent::Host(host) => info!(phone = %host.phone, "bot: linked"),
            ProviderEvent::RequireAction {
                title,
                instructions,
                ..
            }
            | ProviderEvent::Notice {
                title,
                instructions,
            } => info!("bot: {title}\n  {}", instructions.join("\n  ")),
            ProviderEvent::AuthFailure(instructions) => {
                error!("bot: authentication failed: {}", instructions.join("; "))
            }
            ProviderEvent::Message(message) => info!(
                from = %message.remote_id,
                class = ?message.media_class,
                "bot: message received"
            ),
        }
    }
}
