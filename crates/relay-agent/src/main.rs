//! # relay-agent
//!
//! `tutor-relay` binary: resolves settings, picks the pub/sub backend and
//! runs one relay instance until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_pubsub::{ChannelTransport, MemoryHub, MemoryTransport};
use relay_server::RelayServer;
use relay_settings::{Environment, RelaySettings, TransportKind, TransportSettings};
use tracing::{info, warn};

/// Tutor relay server.
#[derive(Parser, Debug)]
#[command(name = "tutor-relay", about = "Tutor WebSocket relay")]
struct Cli {
    /// Deployment environment: local, development or production.
    /// Overrides `RELAY_ENV`.
    #[arg(long)]
    env: Option<String>,

    /// JSON settings file merged over the environment defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind both listeners on.
    #[arg(long)]
    host: Option<String>,

    /// Tutor socket port (0 for auto-assign).
    #[arg(long)]
    socket_port: Option<u16>,

    /// Control-plane port (0 for auto-assign).
    #[arg(long)]
    rest_port: Option<u16>,

    /// Pub/sub backend: memory or redis.
    #[arg(long, value_parser = parse_transport)]
    transport: Option<TransportKind>,

    /// Redis connection URL.
    #[arg(long)]
    redis_url: Option<String>,
}

fn parse_transport(value: &str) -> Result<TransportKind, String> {
    TransportKind::parse(value).ok_or_else(|| format!("unknown transport `{value}`"))
}

impl Cli {
    fn environment(&self) -> Result<Environment> {
        match &self.env {
            Some(name) => name.parse().context("invalid --env"),
            None => relay_settings::resolve_environment().context("invalid RELAY_ENV"),
        }
    }

    /// Flags win over the settings file and `RELAY_*` variables.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.host.clone_from(host);
        }
        if let Some(port) = self.socket_port {
            settings.socket.port = port;
        }
        if let Some(port) = self.rest_port {
            settings.rest.port = port;
        }
        if let Some(kind) = self.transport {
            settings.transport.kind = kind;
        }
        if let Some(url) = &self.redis_url {
            settings.transport.redis_url.clone_from(url);
        }
    }

    /// Loaded settings with flags applied, not yet validated.
    fn load(&self) -> Result<RelaySettings> {
        let env = self.environment()?;
        let mut settings = relay_settings::load_settings(env, self.config.as_deref())
            .with_context(|| format!("failed to load {env} settings"))?;
        self.apply(&mut settings);
        Ok(settings)
    }
}

async fn build_transport(settings: &TransportSettings) -> Result<Arc<dyn ChannelTransport>> {
    match settings.kind {
        TransportKind::Memory => {
            warn!("memory transport: messages reach only tutors on this process");
            Ok(Arc::new(MemoryTransport::connect(&MemoryHub::new())))
        }
        TransportKind::Redis => redis_transport(&settings.redis_url).await,
    }
}

#[cfg(feature = "redis")]
async fn redis_transport(url: &str) -> Result<Arc<dyn ChannelTransport>> {
    let transport = relay_pubsub::redis::RedisTransport::connect(url)
        .await
        .with_context(|| format!("failed to connect to redis at {url}"))?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "redis"))]
#[allow(clippy::unused_async)]
async fn redis_transport(_url: &str) -> Result<Arc<dyn ChannelTransport>> {
    anyhow::bail!("redis transport requested but tutor-relay was built without the `redis` feature")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Loader warnings go to stderr until the configured subscriber exists.
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    let mut settings = tracing::subscriber::with_default(bootstrap, || cli.load())?;

    relay_core::init_subscriber(&settings.logging.level, settings.logging.format);
    settings.validate().context("invalid settings")?;
    info!(environment = %settings.environment, "tutor relay starting");

    let metrics = match relay_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let transport = build_transport(&settings.transport).await?;
    let mut server = RelayServer::new(settings, transport);
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }

    let handle = server.listen().await.context("failed to start relay")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    server.shutdown().graceful_shutdown(handle.tasks, None).await;
    info!("shutdown complete");
    Ok(())
}
