use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use herald_server::{HandlerState, ServerConfig};
use herald_session::{
    CommandGateway, EventHub, GatewayLimits, ReconnectPolicy, SessionController, SidecarClient,
    SidecarConfig,
};
use herald_settings::{HeraldSettings, LoggingSettings};
use herald_store::SqliteCredentialStore;
use herald_telemetry::{LogFormat, TelemetryConfig};

/// Messaging session service: keeps one account connected and fans its
/// events out to dashboards.
#[derive(Debug, Parser)]
#[command(name = "herald", version)]
struct Cli {
    /// Settings file (defaults to ~/.herald/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Listen port, overriding settings.
    #[arg(long)]
    port: Option<u16>,

    /// Do not start connecting at launch.
    #[arg(long)]
    no_connect: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut HeraldSettings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.no_connect {
            settings.connect_on_start = false;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn telemetry_config(logging: &LoggingSettings) -> anyhow::Result<TelemetryConfig> {
    let level = herald_telemetry::parse_level(&logging.level)
        .ok_or_else(|| anyhow!("invalid log level: {}", logging.level))?;
    Ok(TelemetryConfig {
        level,
        format: if logging.json { LogFormat::Json } else { LogFormat::Compact },
        journal: logging
            .persist_warnings
            .then(|| herald_settings::resolve_path(&logging.log_db_path)),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => herald_settings::load_settings_from_path(path),
        None => herald_settings::load_settings(),
    }
    .context("failed to load settings")?;
    cli.apply(&mut settings);

    let telemetry = herald_telemetry::init_telemetry(telemetry_config(&settings.logging)?);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting herald");

    let db_path = herald_settings::resolve_path(&settings.store.db_path);
    let key_path = settings
        .store
        .encrypt
        .then(|| herald_settings::resolve_path(&settings.store.key_path));
    if key_path.is_none() {
        tracing::warn!("credential encryption disabled, storing session material in plaintext");
    }
    let store = SqliteCredentialStore::open(&db_path, key_path.as_deref())
        .with_context(|| format!("failed to open credential store at {}", db_path.display()))?;

    let client = SidecarClient::new(SidecarConfig::from(&settings.bridge));
    let hub = Arc::new(EventHub::new(settings.server.max_send_queue));
    let controller = SessionController::spawn(
        Arc::new(client),
        Arc::new(store),
        hub,
        ReconnectPolicy::from(&settings.reconnect),
    );
    let gateway = CommandGateway::new(controller.clone(), GatewayLimits::from(&settings.gateway));
    let handlers = Arc::new(
        HandlerState::new(controller.clone(), gateway).with_logs(telemetry.log_sink()),
    );

    let server = herald_server::start(ServerConfig::from(&settings.server), handlers)
        .await
        .context("failed to start server")?;
    tracing::info!(port = server.port(), "herald ready");

    if settings.connect_on_start {
        let state = controller
            .request_connect()
            .await
            .context("session controller unavailable")?;
        tracing::info!(state = %state, "initial connect requested");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    controller.shutdown().await;
    server.shutdown().await;
    Ok(())
}
