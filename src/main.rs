//! Hunts Server Binary
//!
//! Wires the coordinator to its background tasks: the reconciler,
//! best-effort snapshotting, the statistics observer, and the
//! WebSocket push gateway. The HTTP layer consuming the coordinator's
//! boundary operations is a separate collaborator process.

use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hunts::coordinator::{reconciler, snapshot, stats::StatsObserver};
use hunts::network::push::{GatewayConfig, PushGateway};
use hunts::{Coordinator, HuntConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Hunts Server v{VERSION}");

    // Environment-driven configuration; the defaults suit a field
    // deployment on a LAN.
    let data_dir = PathBuf::from(env_or("HUNTS_DATA_DIR", "data"));
    let bind_addr = env_or("HUNTS_PUSH_BIND", "0.0.0.0:8081");
    let admin_password = match std::env::var("HUNTS_ADMIN_PASSWORD") {
        Ok(password) if !password.is_empty() => password,
        _ => {
            warn!("HUNTS_ADMIN_PASSWORD not set, using the default password");
            "hunt2024!".to_string()
        }
    };

    // The only fatal startup condition besides a bind failure.
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let snapshot_config = snapshot::SnapshotConfig::in_dir(&data_dir);
    let coordinator = match snapshot::load(&snapshot_config.path).await {
        Ok(Some(state)) => {
            info!("Restored state from {}", snapshot_config.path.display());
            Coordinator::restore(state, admin_password)
        }
        Ok(None) => Coordinator::new(HuntConfig::default(), admin_password),
        Err(e) => {
            warn!("Ignoring unreadable snapshot: {e:#}");
            Coordinator::new(HuntConfig::default(), admin_password)
        }
    };

    let stats = StatsObserver::spawn(coordinator.hub());

    let (shutdown_tx, _) = broadcast::channel(1);

    let reconciler_handle = tokio::spawn(reconciler::run(
        coordinator.clone(),
        shutdown_tx.subscribe(),
    ));
    let snapshot_handle = tokio::spawn(snapshot::run(
        coordinator.clone(),
        snapshot_config,
        shutdown_tx.subscribe(),
    ));

    let gateway_config = GatewayConfig {
        bind_addr: bind_addr
            .parse()
            .with_context(|| format!("parsing bind address {bind_addr}"))?,
    };
    let gateway = PushGateway::new(gateway_config, coordinator.clone());
    let gateway_shutdown = shutdown_tx.subscribe();
    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.run(gateway_shutdown).await {
            warn!("Push gateway exited: {e}");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown requested");
    let totals = stats.totals().await;
    info!(
        "Session totals: {} captures, {} escapes, {} sightings",
        totals.captures, totals.escapes, totals.sightings
    );

    let _ = shutdown_tx.send(());
    let _ = tokio::join!(reconciler_handle, snapshot_handle, gateway_handle);

    info!("Goodbye");
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
