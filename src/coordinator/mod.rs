//! Coordinator
//!
//! The single authoritative owner of [`HuntState`], shared by inbound
//! request handlers and the background reconciler. One coarse
//! `tokio::sync::RwLock` serializes all mutation, which gives every
//! player a strict total order of state changes (a concurrent capture
//! and auto-escape can never interleave inside one player).
//!
//! No I/O happens while the lock is held: each mutating operation
//! runs a synchronous closure against the state, takes the staged
//! [`Outgoing`] deliveries, releases the lock, and only then hands
//! them to the push hub.
//!
//! Explicitly constructed and dependency-injected; tests build as
//! many isolated instances as they like.

pub mod reconciler;
pub mod snapshot;
pub mod stats;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::ids::{BeaconId, DeviceId};
use crate::core::rssi::Rssi;
use crate::game::beacons::BeaconUpdate;
use crate::game::capture::CaptureOutcome;
use crate::game::error::{GameError, GameResult};
use crate::game::events::{Event, Notification};
use crate::game::modes::ModeKey;
use crate::game::phase::SettingsUpdate;
use crate::game::registry::PlayerUpdate;
use crate::game::scoring::Leaderboard;
use crate::game::state::{Actor, Beacon, Bounty, Emergency, HuntConfig, HuntState, Player, Role, Status};
use crate::network::protocol::{EmergencyInfo, GameView, ModeInfo, PollResponse, TrackerReport};
use crate::network::push::PushHub;

/// Notifications returned per poll; anything older is dropped with
/// the rest of the drained queue.
const POLL_NOTIFICATION_LIMIT: usize = 5;

/// The coordinator handle. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<RwLock<HuntState>>,
    hub: Arc<PushHub>,
    admin_password: Arc<String>,
}

impl Coordinator {
    /// Create a coordinator over a fresh state.
    pub fn new(config: HuntConfig, admin_password: impl Into<String>) -> Self {
        Self::restore(HuntState::new(config), admin_password)
    }

    /// Create a coordinator over an existing state (snapshot restore,
    /// tests).
    pub fn restore(state: HuntState, admin_password: impl Into<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            hub: Arc::new(PushHub::new()),
            admin_password: Arc::new(admin_password.into()),
        }
    }

    /// The push hub this coordinator dispatches through.
    pub fn hub(&self) -> &Arc<PushHub> {
        &self.hub
    }

    /// Run a mutating closure under the write lock, then dispatch
    /// whatever it staged.
    async fn mutate<T>(&self, f: impl FnOnce(&mut HuntState, DateTime<Utc>) -> T) -> T {
        let now = Utc::now();
        let (result, outgoing) = {
            let mut state = self.state.write().await;
            let result = f(&mut state, now);
            let outgoing = state.take_outgoing();
            (result, outgoing)
        };
        self.hub.dispatch(outgoing).await;
        result
    }

    /// Run a read-only closure under the read lock.
    async fn read<T>(&self, f: impl FnOnce(&HuntState, DateTime<Utc>) -> T) -> T {
        let now = Utc::now();
        let state = self.state.read().await;
        f(&state, now)
    }

    // -------------------------------------------------------------------------
    // Auth boundary
    // -------------------------------------------------------------------------

    /// Player login; creates the player on first sight.
    pub async fn login(&self, raw_device_id: &str) -> GameResult<Player> {
        let device = parse_device(raw_device_id)?;
        self.mutate(|state, now| state.login(&device, now)).await
    }

    /// Explicit logout.
    pub async fn logout(&self, raw_device_id: &str) -> GameResult<()> {
        let device = parse_device(raw_device_id)?;
        self.mutate(|state, _| {
            state.logout(&device);
            Ok(())
        })
        .await
    }

    /// Check the admin password. Session issuance is the auth
    /// collaborator's job.
    pub async fn admin_login(&self, password: &str) -> bool {
        password == self.admin_password.as_str()
    }

    // -------------------------------------------------------------------------
    // Firmware boundary
    // -------------------------------------------------------------------------

    /// Process a tracker ping: liveness, signal recording, safe-zone
    /// resolution, and notification drain. Idempotent for identical
    /// input; side effects are bounded to registry/resolver updates
    /// plus the drain.
    pub async fn report_tick(&self, report: TrackerReport) -> GameResult<PollResponse> {
        let device = parse_device(&report.device_id)?;
        let peers = report.player_rssi.map(parse_signal_map::<DeviceId>);
        let beacons = report.beacon_rssi.map(parse_signal_map::<BeaconId>);

        self.mutate(move |state, now| {
            state.touch_tracker(&device, now)?;
            if let Some(peers) = peers {
                state.record_peer_signals(&device, peers);
            }
            if let Some(beacons) = beacons {
                state.update_safe_zone(&device, &beacons, now);
            }

            let phase = state.game.phase;
            let time_remaining_secs = state.game.time_remaining_secs(now);
            let mode = ModeInfo::from(state.game.mode);
            let emergency = EmergencyInfo::from(&state.game.emergency);
            let nearest_contact = state.nearest_contact(&device);
            let active_beacons: Vec<BeaconId> = state
                .beacons
                .values()
                .filter(|b| b.active)
                .map(|b| b.id.clone())
                .collect();

            let player = state
                .players
                .get_mut(&device)
                .ok_or_else(|| GameError::unknown_device(&device))?;
            let drained: Vec<Notification> = player.notifications.drain(..).collect();
            let tail = drained.len().saturating_sub(POLL_NOTIFICATION_LIMIT);

            Ok(PollResponse {
                phase,
                role: player.role,
                status: player.status,
                in_safe_zone: player.in_safe_zone,
                team: player.team.clone(),
                time_remaining_secs,
                nearest_contact,
                notifications: drained[tail..].to_vec(),
                active_beacons,
                mode,
                emergency,
                consent_badge: player.consent.badge(),
            })
        })
        .await
    }

    /// Capture attempt from a tracker or dashboard.
    pub async fn attempt_capture(
        &self,
        raw_pred_id: &str,
        raw_prey_id: &str,
        rssi: Rssi,
    ) -> GameResult<CaptureOutcome> {
        let pred = parse_device(raw_pred_id)?;
        let prey = parse_device(raw_prey_id)?;
        self.mutate(move |state, now| state.attempt_capture(&pred, &prey, rssi, now))
            .await
    }

    /// Record a photo sighting; the blob lives with the upload
    /// collaborator, only its reference reaches the core.
    pub async fn upload_sighting(
        &self,
        raw_spotter_id: &str,
        raw_target_id: &str,
        photo_ref: &str,
    ) -> GameResult<u32> {
        let spotter = parse_device(raw_spotter_id)?;
        let target = parse_device(raw_target_id)?;
        let photo_ref = photo_ref.to_string();
        self.mutate(move |state, now| state.upload_sighting(&spotter, &target, &photo_ref, now))
            .await
    }

    // -------------------------------------------------------------------------
    // Player surface
    // -------------------------------------------------------------------------

    /// Apply a partial player update.
    pub async fn update_player(
        &self,
        actor: Actor,
        raw_device_id: &str,
        update: PlayerUpdate,
    ) -> GameResult<Player> {
        let device = parse_device(raw_device_id)?;
        self.mutate(move |state, now| state.update_player(&actor, &device, update, now))
            .await
    }

    /// Drain a player's full notification queue (push resync).
    pub async fn drain_notifications(&self, device: &DeviceId) -> Vec<Notification> {
        let device = device.clone();
        self.mutate(move |state, _| {
            state
                .players
                .get_mut(&device)
                .map(|p| p.notifications.drain(..).collect())
                .unwrap_or_default()
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Emergency surface
    // -------------------------------------------------------------------------

    /// Player-raised emergency; returns responders ranked nearest
    /// first.
    pub async fn trigger_emergency(
        &self,
        raw_device_id: &str,
        reason: &str,
    ) -> GameResult<Vec<(DeviceId, Rssi)>> {
        let device = parse_device(raw_device_id)?;
        let reason = reason.to_string();
        let result = self
            .mutate(move |state, now| state.trigger_emergency(&device, &reason, now))
            .await;
        if result.is_ok() {
            warn!("Emergency triggered by {raw_device_id}");
        }
        result
    }

    /// Admin/mod emergency with no specific player.
    pub async fn trigger_system_emergency(&self, actor: Actor, reason: &str) -> GameResult<()> {
        let reason = reason.to_string();
        self.mutate(move |state, now| state.trigger_system_emergency(&actor, &reason, now))
            .await
    }

    /// Clear the emergency (does not resume).
    pub async fn clear_emergency(&self, actor: Actor) -> GameResult<()> {
        self.mutate(move |state, now| state.clear_emergency(&actor, now))
            .await
    }

    /// Current emergency sub-state.
    pub async fn emergency_status(&self) -> Emergency {
        self.read(|state, _| state.emergency_status().clone()).await
    }

    // -------------------------------------------------------------------------
    // Admin surface
    // -------------------------------------------------------------------------

    /// Select a mode (lobby only).
    pub async fn set_mode(&self, actor: Actor, mode: ModeKey) -> GameResult<()> {
        self.mutate(move |state, now| state.set_mode(&actor, mode, now))
            .await
    }

    /// Apply a partial settings update.
    pub async fn update_settings(&self, actor: Actor, update: SettingsUpdate) -> GameResult<()> {
        self.mutate(move |state, now| state.update_settings(&actor, update, now))
            .await
    }

    /// Begin the countdown and schedule the delayed running commit.
    pub async fn start(
        &self,
        actor: Actor,
        duration_mins: Option<u32>,
        countdown_secs: Option<u32>,
    ) -> GameResult<u32> {
        let countdown = self
            .mutate(move |state, now| state.start(&actor, duration_mins, countdown_secs, now))
            .await?;

        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(countdown as u64)).await;
            // The commit re-checks the phase; a cancel during the
            // wait turns this into a no-op.
            if coordinator.commit_running().await {
                info!("Countdown elapsed, hunt is running");
            }
        });
        Ok(countdown)
    }

    /// Commit the countdown->running transition if still pending.
    pub async fn commit_running(&self) -> bool {
        self.mutate(|state, now| state.commit_running(now)).await
    }

    /// Pause a running game, or cancel a countdown.
    pub async fn pause(&self, actor: Actor) -> GameResult<()> {
        self.mutate(move |state, now| state.pause(&actor, now)).await
    }

    /// Resume a paused game.
    pub async fn resume(&self, actor: Actor) -> GameResult<()> {
        self.mutate(move |state, now| state.resume(&actor, now)).await
    }

    /// Force the game to end.
    pub async fn end(&self, actor: Actor) -> GameResult<Leaderboard> {
        self.mutate(move |state, now| state.end(&actor, now)).await
    }

    /// Reset to a fresh lobby.
    pub async fn reset(&self, actor: Actor) -> GameResult<()> {
        self.mutate(move |state, now| state.reset(&actor, now)).await
    }

    /// Add a beacon.
    pub async fn add_beacon(
        &self,
        actor: Actor,
        raw_beacon_id: &str,
        name: Option<String>,
        threshold: Option<Rssi>,
    ) -> GameResult<()> {
        let id = parse_beacon(raw_beacon_id)?;
        self.mutate(move |state, now| state.add_beacon(&actor, id, name, threshold, now))
            .await
    }

    /// Update a beacon.
    pub async fn update_beacon(
        &self,
        actor: Actor,
        raw_beacon_id: &str,
        update: BeaconUpdate,
    ) -> GameResult<()> {
        let id = parse_beacon(raw_beacon_id)?;
        self.mutate(move |state, now| state.update_beacon(&actor, &id, update, now))
            .await
    }

    /// Remove a beacon.
    pub async fn remove_beacon(&self, actor: Actor, raw_beacon_id: &str) -> GameResult<()> {
        let id = parse_beacon(raw_beacon_id)?;
        self.mutate(move |state, now| state.remove_beacon(&actor, &id, now))
            .await
    }

    /// Place a bounty.
    pub async fn set_bounty(
        &self,
        actor: Actor,
        raw_target_id: &str,
        points: u32,
        reason: &str,
    ) -> GameResult<()> {
        let target = parse_device(raw_target_id)?;
        let reason = reason.to_string();
        self.mutate(move |state, now| state.set_bounty(&actor, &target, points, &reason, now))
            .await
    }

    /// Withdraw a bounty.
    pub async fn clear_bounty(&self, actor: Actor, raw_target_id: &str) -> GameResult<()> {
        let target = parse_device(raw_target_id)?;
        self.mutate(move |state, _| state.clear_bounty(&actor, &target))
            .await
    }

    /// Grant moderator privilege.
    pub async fn add_moderator(&self, actor: Actor, raw_device_id: &str) -> GameResult<()> {
        let device = parse_device(raw_device_id)?;
        self.mutate(move |state, now| state.add_moderator(&actor, &device, now))
            .await
    }

    /// Revoke moderator privilege.
    pub async fn remove_moderator(&self, actor: Actor, raw_device_id: &str) -> GameResult<()> {
        let device = parse_device(raw_device_id)?;
        self.mutate(move |state, now| state.remove_moderator(&actor, &device, now))
            .await
    }

    /// Unconditional role change.
    pub async fn force_role(&self, actor: Actor, raw_device_id: &str, role: Role) -> GameResult<()> {
        let device = parse_device(raw_device_id)?;
        self.mutate(move |state, now| state.force_role(&actor, &device, role, now))
            .await
    }

    /// Moderation kick with full cascade.
    pub async fn kick(&self, actor: Actor, raw_device_id: &str) -> GameResult<()> {
        let device = parse_device(raw_device_id)?;
        self.mutate(move |state, now| state.kick_player(&actor, &device, now))
            .await
    }

    /// Moderator release of a captured player.
    pub async fn release_captured(&self, actor: Actor, raw_device_id: &str) -> GameResult<()> {
        let device = parse_device(raw_device_id)?;
        self.mutate(move |state, now| state.release_captured(&actor, &device, now))
            .await
    }

    /// Push an announcement to every player.
    pub async fn announce(&self, actor: Actor, message: &str) -> GameResult<()> {
        let message = message.to_string();
        self.mutate(move |state, now| state.announce(&actor, &message, now))
            .await
    }

    // -------------------------------------------------------------------------
    // Read surface
    // -------------------------------------------------------------------------

    /// The most recent `limit` audit events.
    pub async fn events(&self, limit: usize) -> Vec<Event> {
        self.read(|state, _| state.events.recent(limit)).await
    }

    /// Current standings (recomputes derived points).
    pub async fn leaderboard(&self) -> Leaderboard {
        self.mutate(|state, _| state.leaderboard()).await
    }

    /// All players.
    pub async fn players(&self) -> Vec<Player> {
        self.read(|state, _| state.players.values().cloned().collect())
            .await
    }

    /// One player.
    pub async fn player(&self, raw_device_id: &str) -> GameResult<Player> {
        let device = parse_device(raw_device_id)?;
        self.read(move |state, _| {
            state
                .get_player(&device)
                .cloned()
                .ok_or_else(|| GameError::unknown_device(&device))
        })
        .await
    }

    /// All beacons.
    pub async fn beacons(&self) -> Vec<Beacon> {
        self.read(|state, _| state.list_beacons()).await
    }

    /// Open bounties with resolved target names.
    pub async fn bounties(&self) -> Vec<(DeviceId, String, Bounty)> {
        self.read(|state, _| {
            state
                .bounties
                .iter()
                .map(|(id, bounty)| {
                    let name = state
                        .get_player(id)
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| id.to_string());
                    (id.clone(), name, bounty.clone())
                })
                .collect()
        })
        .await
    }

    /// Dashboard/admin game summary.
    pub async fn game_view(&self) -> GameView {
        self.read(|state, now| {
            let assigned = |role: Role| state.players.values().filter(|p| p.role == role).count();
            GameView {
                phase: state.game.phase,
                mode: ModeInfo::from(state.game.mode),
                settings: state.game.settings,
                duration_mins: state.game.duration_mins,
                countdown_secs: state.game.countdown_secs,
                time_remaining_secs: state.game.time_remaining_secs(now),
                player_count: assigned(Role::Predator) + assigned(Role::Prey),
                pred_count: assigned(Role::Predator),
                prey_count: assigned(Role::Prey),
                ready_count: state
                    .players
                    .values()
                    .filter(|p| p.status == Status::Ready)
                    .count(),
                online_count: state.online_count(),
                emergency: EmergencyInfo::from(&state.game.emergency),
            }
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Background hooks
    // -------------------------------------------------------------------------

    /// One reconciliation sweep (called by the background task).
    pub async fn reconcile(&self) -> reconciler::ReconcileReport {
        self.mutate(|state, now| state.reconcile(now)).await
    }

    /// Serialize the full state under the read lock. The caller
    /// writes the bytes outside any lock.
    pub async fn snapshot_json(&self) -> serde_json::Result<Vec<u8>> {
        let state = self.state.read().await;
        serde_json::to_vec_pretty(&*state)
    }
}

fn parse_device(raw: &str) -> GameResult<DeviceId> {
    DeviceId::parse(raw).map_err(|e| GameError::rejected(format!("device id: {e}")))
}

fn parse_beacon(raw: &str) -> GameResult<BeaconId> {
    BeaconId::parse(raw).map_err(|e| GameError::rejected(format!("beacon id: {e}")))
}

/// Parse a raw signal map, silently skipping malformed ids (a noisy
/// radio must never fail the whole report).
fn parse_signal_map<K: ParsedId>(raw: BTreeMap<String, Rssi>) -> BTreeMap<K, Rssi> {
    raw.into_iter()
        .filter_map(|(k, v)| K::parse_id(&k).map(|id| (id, v)))
        .collect()
}

/// Helper trait so both id types share the report-parsing path.
trait ParsedId: Ord + Sized {
    fn parse_id(raw: &str) -> Option<Self>;
}

impl ParsedId for DeviceId {
    fn parse_id(raw: &str) -> Option<Self> {
        DeviceId::parse(raw).ok()
    }
}

impl ParsedId for BeaconId {
    fn parse_id(raw: &str) -> Option<Self> {
        BeaconId::parse(raw).ok()
    }
}
