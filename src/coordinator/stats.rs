//! Statistics Observer
//!
//! Peripheral bookkeeping kept out of the state machine: a task
//! subscribed to the event broadcast tallies running totals. Losing a
//! lagged event only skews a counter, never game state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::game::events::EventData;
use crate::network::push::PushHub;

/// Running totals across the process lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GameStats {
    /// Standard captures.
    pub captures: u64,
    /// Escapes.
    pub escapes: u64,
    /// Infection conversions.
    pub infections: u64,
    /// Photo sightings.
    pub sightings: u64,
    /// Emergencies raised.
    pub emergencies: u64,
    /// Games played to completion.
    pub games_completed: u64,
}

impl GameStats {
    fn apply(&mut self, data: &EventData) {
        match data {
            EventData::Capture { .. } => self.captures += 1,
            EventData::Escape { .. } => self.escapes += 1,
            EventData::Infection { .. } => self.infections += 1,
            EventData::Sighting { .. } => self.sightings += 1,
            EventData::EmergencyTriggered { .. } => self.emergencies += 1,
            EventData::GameEnded { .. } => self.games_completed += 1,
            _ => {}
        }
    }
}

/// Handle to the tallying task.
pub struct StatsObserver {
    totals: Arc<RwLock<GameStats>>,
}

impl StatsObserver {
    /// Subscribe to the hub and start tallying.
    pub fn spawn(hub: &PushHub) -> Self {
        let mut events = hub.subscribe_events();
        let totals = Arc::new(RwLock::new(GameStats::default()));
        let task_totals = totals.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        task_totals.write().await.apply(&event.data);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Stats observer lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { totals }
    }

    /// Current totals.
    pub async fn totals(&self) -> GameStats {
        *self.totals.read().await
    }
}
