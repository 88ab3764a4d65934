//! Game Phase Controller
//!
//! Owns the `lobby -> countdown -> running <-> paused -> ended ->
//! (reset) -> lobby` lifecycle, mode selection, settings, bounties,
//! announcements, and the sighting operation's phase gates.
//!
//! The countdown->running transition is committed by a delayed task
//! calling [`HuntState::commit_running`], which re-checks the phase so
//! a cancel during the wait suppresses it.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::core::ids::DeviceId;
use crate::core::rssi::{plausible_threshold, Rssi};
use crate::game::error::{GameError, GameResult};
use crate::game::events::{EventData, NotifyKind};
use crate::game::modes::ModeKey;
use crate::game::scoring::Leaderboard;
use crate::game::state::{Actor, Bounty, HuntState, Phase, Role, Status};

/// Shortest permitted game duration.
pub const MIN_DURATION_MINS: u32 = 5;
/// Longest permitted game duration.
pub const MAX_DURATION_MINS: u32 = 240;
/// Shortest permitted countdown.
pub const MIN_COUNTDOWN_SECS: u32 = 3;
/// Longest permitted countdown.
pub const MAX_COUNTDOWN_SECS: u32 = 120;

/// Team names cycled through during assignment.
const TEAM_NAMES: [&str; 2] = ["crimson", "azure"];

/// Partial settings update.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    /// Toggle the honor system.
    pub honor_system: Option<bool>,
    /// New capture threshold.
    pub capture_rssi: Option<Rssi>,
    /// New default safe-zone threshold.
    pub safezone_rssi: Option<Rssi>,
    /// Allow role change from safe zones mid-game.
    pub allow_role_change: Option<bool>,
}

impl HuntState {
    // -------------------------------------------------------------------------
    // Mode and settings
    // -------------------------------------------------------------------------

    /// Select a mode. Lobby only; selecting a team mode (re)assigns
    /// teams over role-assigned players.
    pub fn set_mode(&mut self, actor: &Actor, mode: ModeKey, now: DateTime<Utc>) -> GameResult<()> {
        self.require_moderator(actor)?;
        if self.game.phase != Phase::Lobby {
            return Err(GameError::InvalidState("mode locked in play".into()));
        }
        self.game.mode = mode;
        self.game.duration_mins = mode.config().duration_mins;
        if mode.config().team {
            self.assign_teams();
        } else {
            for player in self.players.values_mut() {
                player.team = None;
            }
            self.team_scores.clear();
        }
        self.record_event(EventData::ModeChanged { mode }, now);
        Ok(())
    }

    fn assign_teams(&mut self) {
        self.team_scores.clear();
        for name in TEAM_NAMES {
            self.team_scores.insert(name.to_string(), 0);
        }
        let mut next = 0usize;
        for player in self.players.values_mut() {
            if player.role.is_assigned() {
                player.team = Some(TEAM_NAMES[next % TEAM_NAMES.len()].to_string());
                next += 1;
            } else {
                player.team = None;
            }
        }
    }

    /// Apply a partial settings update.
    pub fn update_settings(
        &mut self,
        actor: &Actor,
        update: SettingsUpdate,
        now: DateTime<Utc>,
    ) -> GameResult<()> {
        self.require_admin(actor)?;
        for rssi in [update.capture_rssi, update.safezone_rssi].into_iter().flatten() {
            if !plausible_threshold(rssi) {
                return Err(GameError::rejected("threshold out of range"));
            }
        }
        let settings = &mut self.game.settings;
        if let Some(v) = update.honor_system {
            settings.honor_system = v;
        }
        if let Some(v) = update.capture_rssi {
            settings.capture_rssi = v;
        }
        if let Some(v) = update.safezone_rssi {
            settings.safezone_rssi = v;
        }
        if let Some(v) = update.allow_role_change {
            settings.allow_role_change = v;
        }
        let snapshot = self.game.settings;
        self.record_event(EventData::SettingsUpdated { settings: snapshot }, now);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Begin the countdown.
    ///
    /// Requires the lobby phase, at least one ready player on each
    /// side, and two online players overall. Requested duration and
    /// countdown are clamped into bounds. Returns the effective
    /// countdown in seconds so the caller can schedule
    /// [`HuntState::commit_running`].
    pub fn start(
        &mut self,
        actor: &Actor,
        duration_mins: Option<u32>,
        countdown_secs: Option<u32>,
        now: DateTime<Utc>,
    ) -> GameResult<u32> {
        self.require_moderator(actor)?;
        if self.game.emergency.active {
            return Err(GameError::EmergencyBlocked);
        }
        if self.game.phase != Phase::Lobby {
            return Err(GameError::InvalidState("not in lobby".into()));
        }
        if self.ready_count(Role::Predator) == 0 || self.ready_count(Role::Prey) == 0 {
            return Err(GameError::rejected("need both sides ready"));
        }
        if self.online_count() < 2 {
            return Err(GameError::rejected("need 2 players online"));
        }

        let duration = duration_mins
            .unwrap_or(self.game.mode.config().duration_mins)
            .clamp(MIN_DURATION_MINS, MAX_DURATION_MINS);
        let countdown = countdown_secs
            .unwrap_or(10)
            .clamp(MIN_COUNTDOWN_SECS, MAX_COUNTDOWN_SECS);

        self.game.duration_mins = duration;
        self.game.countdown_secs = countdown;
        self.game.phase = Phase::Countdown;
        self.game.deadline = Some(now + Duration::seconds(countdown as i64));
        self.game.paused_remaining_secs = None;

        for player in self.players.values_mut() {
            if player.status == Status::Ready && player.role.is_assigned() {
                player.status = Status::Active;
            }
        }

        self.record_event(
            EventData::GameStarting { duration_mins: duration, countdown_secs: countdown },
            now,
        );
        self.notify_all(
            &format!("Game starting in {countdown} seconds!"),
            NotifyKind::Warning,
            now,
        );
        Ok(countdown)
    }

    /// Commit the delayed countdown->running transition.
    ///
    /// Returns false (and does nothing) if the phase was externally
    /// changed during the wait.
    pub fn commit_running(&mut self, now: DateTime<Utc>) -> bool {
        if self.game.phase != Phase::Countdown {
            return false;
        }
        let duration = self.game.duration_mins;
        self.game.phase = Phase::Running;
        self.game.started_at = Some(now);
        self.game.deadline = Some(now + Duration::minutes(duration as i64));
        self.record_event(EventData::GameRunning { duration_mins: duration }, now);
        self.notify_all("GAME STARTED! Good luck!", NotifyKind::Success, now);
        true
    }

    /// Pause a running game, or cancel a countdown back to the lobby.
    pub fn pause(&mut self, actor: &Actor, now: DateTime<Utc>) -> GameResult<()> {
        self.require_moderator(actor)?;
        match self.game.phase {
            Phase::Running => {
                self.freeze_remaining(now);
                self.game.phase = Phase::Paused;
                self.record_event(EventData::GamePaused, now);
                self.notify_all("Game PAUSED", NotifyKind::Warning, now);
                Ok(())
            }
            Phase::Countdown => {
                self.game.phase = Phase::Lobby;
                self.game.deadline = None;
                // Players promoted for the aborted start go back to ready.
                for player in self.players.values_mut() {
                    if player.status == Status::Active {
                        player.status = Status::Ready;
                    }
                }
                self.record_event(EventData::CountdownCancelled, now);
                self.notify_all("Start cancelled", NotifyKind::Info, now);
                Ok(())
            }
            _ => Err(GameError::InvalidState("nothing to pause".into())),
        }
    }

    /// Resume a paused game with the preserved remaining time.
    pub fn resume(&mut self, actor: &Actor, now: DateTime<Utc>) -> GameResult<()> {
        self.require_moderator(actor)?;
        if self.game.emergency.active {
            return Err(GameError::EmergencyBlocked);
        }
        if self.game.phase != Phase::Paused {
            return Err(GameError::InvalidState("not paused".into()));
        }
        let remaining = self
            .game
            .paused_remaining_secs
            .take()
            .unwrap_or((self.game.duration_mins as i64) * 60);
        self.game.phase = Phase::Running;
        self.game.deadline = Some(now + Duration::seconds(remaining));
        self.record_event(EventData::GameResumed, now);
        self.notify_all("Game RESUMED!", NotifyKind::Success, now);
        Ok(())
    }

    /// Stash the running clock for later restoration.
    pub(crate) fn freeze_remaining(&mut self, now: DateTime<Utc>) {
        let remaining = self.game.time_remaining_secs(now);
        self.game.paused_remaining_secs = Some(remaining);
    }

    /// Force the game to end from any phase.
    pub fn end(&mut self, actor: &Actor, now: DateTime<Utc>) -> GameResult<Leaderboard> {
        self.require_moderator(actor)?;
        Ok(self.end_game(now))
    }

    /// Terminal transition: compute and broadcast final standings.
    pub(crate) fn end_game(&mut self, now: DateTime<Utc>) -> Leaderboard {
        self.game.phase = Phase::Ended;
        self.game.deadline = None;
        self.game.paused_remaining_secs = None;
        let leaderboard = self.leaderboard();
        self.record_event(EventData::GameEnded { leaderboard: leaderboard.clone() }, now);
        self.notify_all("GAME OVER!", NotifyKind::Info, now);
        leaderboard
    }

    /// Reset everything to a fresh lobby.
    ///
    /// Per-game counters, roles, and teams are zeroed; identity,
    /// profile, and consent survive. Cooldowns, bounties, and any
    /// stale emergency are cleared, and the mode reverts to default.
    pub fn reset(&mut self, actor: &Actor, now: DateTime<Utc>) -> GameResult<()> {
        self.require_admin(actor)?;
        self.game.phase = Phase::Lobby;
        self.game.mode = ModeKey::default();
        self.game.duration_mins = ModeKey::default().config().duration_mins;
        self.game.started_at = None;
        self.game.deadline = None;
        self.game.paused_remaining_secs = None;
        self.game.emergency = Default::default();

        for player in self.players.values_mut() {
            player.reset_for_lobby();
        }
        self.team_scores.clear();
        self.bounties.clear();
        self.capture_cooldowns.clear();
        self.sighting_cooldowns.clear();

        self.record_event(EventData::GameReset, now);
        self.notify_all("Game reset to lobby", NotifyKind::Info, now);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sightings
    // -------------------------------------------------------------------------

    /// Record a photo sighting.
    ///
    /// The photo itself is stored by a collaborator; `photo_ref` is
    /// its reference. Awards the mode's sighting points and unlocks
    /// capture eligibility under photo-required mode.
    pub fn upload_sighting(
        &mut self,
        spotter_id: &DeviceId,
        target_id: &DeviceId,
        photo_ref: &str,
        now: DateTime<Utc>,
    ) -> GameResult<u32> {
        if self.game.phase != Phase::Running {
            return Err(GameError::InvalidState("game not running".into()));
        }
        if self.game.emergency.active {
            return Err(GameError::EmergencyBlocked);
        }
        if spotter_id == target_id {
            return Err(GameError::rejected("cannot spot yourself"));
        }
        let spotter = self
            .players
            .get(spotter_id)
            .ok_or_else(|| GameError::unknown_device(spotter_id))?;
        let target = self
            .players
            .get(target_id)
            .ok_or_else(|| GameError::unknown_device(target_id))?;

        match (spotter.role, target.role) {
            (Role::Predator, Role::Prey) | (Role::Prey, Role::Predator) => {}
            (Role::Unassigned, _) => return Err(GameError::rejected("pick a role first")),
            _ => return Err(GameError::rejected("wrong side to spot")),
        }
        if !target.consent.photo_visible {
            return Err(GameError::rejected("target photos off"));
        }

        let pair = (spotter_id.clone(), target_id.clone());
        if let Some(stamp) = self.sighting_cooldowns.get(&pair) {
            if (now - *stamp).num_seconds() < self.config.sighting_cooldown_secs {
                return Err(GameError::rejected("sighting cooldown"));
            }
        }
        self.sighting_cooldowns.insert(pair, now);

        let points = self.game.mode.config().sighting_points;
        let spotter_name = spotter.name.clone();
        if let Some(spotter) = self.players.get_mut(spotter_id) {
            spotter.sightings += 1;
            spotter.photographed.insert(target_id.clone());
        }

        self.record_event(
            EventData::Sighting {
                spotter: spotter_id.clone(),
                target: target_id.clone(),
                photo: photo_ref.to_string(),
                points,
            },
            now,
        );
        self.notify(
            spotter_id,
            format!("Sighting recorded! +{points} pts"),
            NotifyKind::Success,
            now,
        );
        self.notify(
            target_id,
            format!("You were spotted by {spotter_name}!"),
            NotifyKind::Warning,
            now,
        );
        Ok(points)
    }

    // -------------------------------------------------------------------------
    // Bounties and announcements
    // -------------------------------------------------------------------------

    /// Place (or replace) a bounty on a target.
    pub fn set_bounty(
        &mut self,
        actor: &Actor,
        target: &DeviceId,
        points: u32,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GameResult<()> {
        self.require_moderator(actor)?;
        if !self.players.contains_key(target) {
            return Err(GameError::unknown_device(target));
        }
        self.bounties
            .insert(target.clone(), Bounty { points, reason: reason.to_string() });
        self.record_event(EventData::BountySet { target: target.clone(), points }, now);
        self.notify(
            target,
            format!("Bounty of {points} points placed on you!"),
            NotifyKind::Warning,
            now,
        );
        Ok(())
    }

    /// Withdraw a bounty.
    pub fn clear_bounty(&mut self, actor: &Actor, target: &DeviceId) -> GameResult<()> {
        self.require_moderator(actor)?;
        self.bounties
            .remove(target)
            .map(|_| ())
            .ok_or_else(|| GameError::NotFound(format!("bounty on {target}")))
    }

    /// Push an announcement into every player's queue.
    pub fn announce(&mut self, actor: &Actor, message: &str, now: DateTime<Utc>) -> GameResult<()> {
        self.require_moderator(actor)?;
        self.record_event(EventData::Announcement { message: message.to_string() }, now);
        self.notify_all(message, NotifyKind::Info, now);
        Ok(())
    }
}
