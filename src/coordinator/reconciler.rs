//! Background Reconciler
//!
//! Periodic sweep over the shared state: online-timeout detection,
//! auto game-end on deadline expiry, and cooldown-cache pruning. The
//! sweep itself is a synchronous state method so it can be tested
//! with explicit timestamps; the loop here only supplies the clock.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::coordinator::Coordinator;
use crate::core::ids::DeviceId;
use crate::game::events::EventData;
use crate::game::state::{HuntState, Phase, Status};

/// Sweep interval.
pub const RECONCILE_INTERVAL_SECS: u64 = 5;

/// What one sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Players marked offline this sweep.
    pub went_offline: Vec<DeviceId>,
    /// The sweep force-ended the game on deadline expiry.
    pub auto_ended: bool,
    /// Cooldown entries pruned.
    pub pruned_cooldowns: usize,
}

impl HuntState {
    /// One reconciliation sweep.
    pub fn reconcile(&mut self, now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        // 1. Online-timeout detection.
        let timeout = self.config.offline_timeout_secs;
        for (id, player) in self.players.iter_mut() {
            if player.online && (now - player.last_seen).num_seconds() > timeout {
                player.online = false;
                if matches!(player.status, Status::Lobby | Status::Ready) {
                    player.status = Status::Offline;
                }
                report.went_offline.push(id.clone());
            }
        }
        for id in &report.went_offline {
            self.record_event(EventData::PlayerOffline { device: id.clone() }, now);
        }

        // 2. Auto game-end. An active emergency holds the clock.
        let deadline_passed = self.game.deadline.is_some_and(|d| now >= d);
        if self.game.phase == Phase::Running && deadline_passed && !self.game.emergency.active {
            self.end_game(now);
            report.auto_ended = true;
        }

        // 3. Cooldown pruning.
        let ttl = self.config.cooldown_ttl_secs;
        let before = self.capture_cooldowns.len() + self.sighting_cooldowns.len();
        self.capture_cooldowns
            .retain(|_, stamp| (now - *stamp).num_seconds() < ttl);
        self.sighting_cooldowns
            .retain(|_, stamp| (now - *stamp).num_seconds() < ttl);
        report.pruned_cooldowns =
            before - self.capture_cooldowns.len() - self.sighting_cooldowns.len();

        report
    }
}

/// Run the sweep on a fixed interval until shutdown.
pub async fn run(coordinator: Coordinator, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(Duration::from_secs(RECONCILE_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = coordinator.reconcile().await;
                if !report.went_offline.is_empty() {
                    debug!("Reconciler: {} players timed out", report.went_offline.len());
                }
                if report.auto_ended {
                    info!("Reconciler: game deadline passed, hunt ended");
                }
            }
            _ = shutdown.recv() => {
                debug!("Reconciler stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Actor, HuntConfig, Player, Role};
    use chrono::Duration as ChronoDuration;

    fn dev(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    #[test]
    fn test_offline_timeout() {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        let id = dev("T0001");
        let mut p = Player::new(id.clone(), now);
        p.online = true;
        p.status = Status::Lobby;
        s.players.insert(id.clone(), p);

        // Inside the window: untouched.
        let report = s.reconcile(now + ChronoDuration::seconds(30));
        assert!(report.went_offline.is_empty());
        assert!(s.players[&id].online);

        let report = s.reconcile(now + ChronoDuration::seconds(61));
        assert_eq!(report.went_offline, vec![id.clone()]);
        assert!(!s.players[&id].online);
        assert_eq!(s.players[&id].status, Status::Offline);
    }

    #[test]
    fn test_offline_timeout_preserves_captured_status() {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        let id = dev("T0001");
        let mut p = Player::new(id.clone(), now);
        p.online = true;
        p.status = Status::Captured;
        s.players.insert(id.clone(), p);

        s.reconcile(now + ChronoDuration::seconds(120));
        assert!(!s.players[&id].online);
        assert_eq!(s.players[&id].status, Status::Captured);
    }

    #[test]
    fn test_auto_end_on_deadline() {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        s.game.phase = Phase::Running;
        s.game.deadline = Some(now + ChronoDuration::seconds(60));

        assert!(!s.reconcile(now + ChronoDuration::seconds(59)).auto_ended);
        assert_eq!(s.game.phase, Phase::Running);

        assert!(s.reconcile(now + ChronoDuration::seconds(60)).auto_ended);
        assert_eq!(s.game.phase, Phase::Ended);
    }

    #[test]
    fn test_emergency_holds_auto_end() {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        let id = dev("T0001");
        s.players.insert(id.clone(), Player::new(id.clone(), now));
        s.game.phase = Phase::Running;
        s.game.deadline = Some(now + ChronoDuration::seconds(60));
        s.trigger_emergency(&id, "help", now).unwrap();

        // Emergency already paused the game; even a stale deadline
        // must not flip a paused game to ended.
        let report = s.reconcile(now + ChronoDuration::seconds(120));
        assert!(!report.auto_ended);
        assert_eq!(s.game.phase, Phase::Paused);
    }

    #[test]
    fn test_cooldown_pruning() {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        s.capture_cooldowns.insert(dev("T0001"), now - ChronoDuration::seconds(700));
        s.capture_cooldowns.insert(dev("T0002"), now - ChronoDuration::seconds(5));
        s.sighting_cooldowns
            .insert((dev("T0001"), dev("T0002")), now - ChronoDuration::seconds(700));

        let report = s.reconcile(now);
        assert_eq!(report.pruned_cooldowns, 2);
        assert!(s.capture_cooldowns.contains_key(&dev("T0002")));
        assert!(!s.capture_cooldowns.contains_key(&dev("T0001")));
    }

    #[test]
    fn test_reset_then_start_round_trip() {
        // Full cycle ending in a fresh lobby keeps the mode default.
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        for (id, role) in [("T0001", Role::Predator), ("T0002", Role::Prey)] {
            let id = dev(id);
            let mut p = Player::new(id.clone(), now);
            p.role = role;
            p.status = Status::Ready;
            p.online = true;
            s.players.insert(id, p);
        }
        s.start(&Actor::Admin, None, None, now).unwrap();
        s.commit_running(now);
        s.reconcile(now + ChronoDuration::minutes(31));
        assert_eq!(s.game.phase, Phase::Ended);

        s.reset(&Actor::Admin, now + ChronoDuration::minutes(32)).unwrap();
        assert_eq!(s.game.duration_mins, 30);
    }
}
