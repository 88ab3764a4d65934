//! Best-Effort Snapshotting
//!
//! Periodically serializes the full state to a JSON file so a restart
//! picks up roughly where it left off. Durability beyond this is a
//! non-goal: serialization happens under the read lock, the file
//! write happens outside any lock, and a failed write only logs.
//! Cooldown caches and undelivered push frames are deliberately not
//! part of the snapshot.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::game::state::HuntState;

/// Snapshot configuration.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Snapshot file path.
    pub path: PathBuf,
    /// Write interval.
    pub every: Duration,
}

impl SnapshotConfig {
    /// Conventional layout inside a data directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self { path: dir.join("state.json"), every: Duration::from_secs(30) }
    }
}

/// Load a prior snapshot if one exists.
pub async fn load(path: &Path) -> anyhow::Result<Option<HuntState>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let state = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing snapshot {}", path.display()))?;
            Ok(Some(state))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading snapshot {}", path.display())),
    }
}

/// Write one snapshot: serialize under the read lock, write to a
/// temp file, rename into place.
pub async fn write(coordinator: &Coordinator, path: &Path) -> anyhow::Result<()> {
    let bytes = coordinator.snapshot_json().await.context("serializing state")?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Periodic snapshot loop; writes a final snapshot on shutdown.
pub async fn run(coordinator: Coordinator, config: SnapshotConfig, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(config.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match write(&coordinator, &config.path).await {
                    Ok(()) => debug!("Snapshot written to {}", config.path.display()),
                    Err(e) => warn!("Snapshot failed: {e:#}"),
                }
            }
            _ = shutdown.recv() => {
                if let Err(e) = write(&coordinator, &config.path).await {
                    warn!("Final snapshot failed: {e:#}");
                } else {
                    info!("Final snapshot written");
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::HuntConfig;

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = std::env::temp_dir().join(format!("hunts-snap-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let config = SnapshotConfig::in_dir(&dir);

        let coordinator = Coordinator::new(HuntConfig::default(), "x");
        coordinator.login("T9EF0").await.unwrap();

        write(&coordinator, &config.path).await.unwrap();
        let restored = load(&config.path).await.unwrap().unwrap();
        assert!(restored
            .players
            .contains_key(&crate::core::ids::DeviceId::parse("T9EF0").unwrap()));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let missing = std::env::temp_dir().join("hunts-definitely-missing.json");
        assert!(load(&missing).await.unwrap().is_none());
    }
}
