//! PresenceKit agent
//!
//! Runs a simulated presence session against the in-memory stores and logs
//! every presence transition it observes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use tracing_subscriber::{EnvFilter, fmt};

use presencekit_core::clock::{SharedClock, SystemClock};
use presencekit_core::config::{AppConfig, LoggingConfig};
use presencekit_core::traits::{DurablePresenceMirror, EphemeralPresenceStore};
use presencekit_realtime::{AppLifecycle, PresenceService, PresenceStores};
use presencekit_store::{MemoryDurableMirror, MemoryEphemeralStore, MemoryPresenceServer};

/// Scripted session to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Transport flaps, including one drop inside the settle window.
    Flap,
    /// Long outage with store cleanup, then recovery.
    Outage,
    /// Foreground/background bursts followed by termination.
    Lifecycle,
}

#[derive(Debug, Parser)]
#[command(name = "presence-agent", version, about = "Simulated presence session")]
struct Cli {
    /// Configuration environment; loads `config/{env}.toml` over the defaults
    #[arg(long, default_value = "development")]
    env: String,

    /// User id to sign in as
    #[arg(long, default_value = "demo@presencekit.dev")]
    user: String,

    /// Scenario to run
    #[arg(long, value_enum, default_value_t = Scenario::Flap)]
    scenario: Scenario,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.env).context("Failed to load configuration")?;

    init_logging(&config.logging);
    tracing::info!(env = %cli.env, scenario = ?cli.scenario, "Starting presence agent v{}", env!("CARGO_PKG_VERSION"));

    run(cli, config).await
}

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);
    let server = MemoryPresenceServer::new(clock.clone());
    let durable = Arc::new(MemoryDurableMirror::new(clock.clone()));

    let client = Arc::new(server.client());
    let service = Arc::new(
        PresenceService::new(
            &cli.user,
            stores(&client, &durable),
            config.presence.clone(),
            clock.clone(),
        )
        .context("Failed to start presence")?,
    );

    let viewer_client = Arc::new(server.client());
    let viewer = PresenceService::new(
        "observer@presencekit.dev",
        stores(&viewer_client, &durable),
        config.presence.clone(),
        clock,
    )
    .context("Failed to start observer")?;

    let mut feed = viewer.presence_stream(&cli.user);
    let watcher = tokio::spawn(async move {
        while let Some(record) = feed.next().await {
            match record {
                Some(record) => tracing::info!(
                    online = record.online,
                    sessions = record.connections.len(),
                    last_seen = %record.last_seen,
                    "Presence update"
                ),
                None => tracing::info!("Presence record absent"),
            }
        }
    });

    service.initialize().await;
    pause(config.presence.settle_delay() * 2).await;

    match cli.scenario {
        Scenario::Flap => flap(&client).await,
        Scenario::Outage => outage(&client, &viewer, &cli.user).await,
        Scenario::Lifecycle => lifecycle(&service, &config).await,
    }

    tracing::info!(
        online = viewer.is_online(&cli.user).await,
        last_seen = ?viewer.get_last_seen(&cli.user).await,
        connection = ?service.connection_state(),
        "Final presence"
    );
    tracing::info!(metrics = ?service.metrics(), "Session metrics");

    service.sign_out().await;
    viewer.dispose();
    watcher.await.context("Presence watcher panicked")?;
    Ok(())
}

fn stores(client: &Arc<MemoryEphemeralStore>, durable: &Arc<MemoryDurableMirror>) -> PresenceStores {
    let ephemeral: Arc<dyn EphemeralPresenceStore> = client.clone();
    let durable: Arc<dyn DurablePresenceMirror> = durable.clone();
    PresenceStores::new(ephemeral, durable)
}

async fn pause(duration: Duration) {
    tokio::time::sleep(duration).await;
}

async fn flap(client: &MemoryEphemeralStore) {
    tracing::info!("Dropping transport inside the settle window");
    client.drop_connection();
    pause(Duration::from_millis(200)).await;
    client.restore_connection();
    pause(Duration::from_millis(200)).await;
    client.drop_connection();
    pause(Duration::from_millis(200)).await;
    client.restore_connection();
    pause(Duration::from_secs(3)).await;

    tracing::info!("Dropping transport after the connection settled");
    client.drop_connection();
    pause(Duration::from_secs(1)).await;
    client.restore_connection();
    pause(Duration::from_secs(3)).await;
}

async fn outage(client: &MemoryEphemeralStore, viewer: &PresenceService, user: &str) {
    tracing::info!("Transport lost");
    client.drop_connection();
    pause(Duration::from_secs(5)).await;
    tracing::info!(online = viewer.is_online(user).await, "Observed during outage");

    tracing::info!("Transport restored");
    client.restore_connection();
    pause(Duration::from_secs(3)).await;
}

async fn lifecycle(service: &Arc<PresenceService>, config: &AppConfig) {
    for event in [
        AppLifecycle::Background,
        AppLifecycle::Foreground,
        AppLifecycle::Background,
    ] {
        service.handle_lifecycle(event).await;
        pause(Duration::from_millis(300)).await;
    }
    tracing::info!(pending = ?service.pending_lifecycle(), "Waiting for the quiet period");
    pause(config.presence.debounce() + Duration::from_millis(500)).await;

    service.handle_lifecycle(AppLifecycle::Foreground).await;
    pause(Duration::from_millis(300)).await;
    service.handle_lifecycle(AppLifecycle::Terminate).await;
}
