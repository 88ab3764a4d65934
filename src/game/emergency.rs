//! Emergency Subsystem
//!
//! A global flag overlaying the phase machine. Any player can raise
//! it; clearing it never resumes play by itself. While active,
//! captures, sightings, resume, and start are all rejected.

use chrono::{DateTime, Utc};

use crate::core::ids::DeviceId;
use crate::core::rssi::Rssi;
use crate::game::error::{GameError, GameResult};
use crate::game::events::{EventData, NotifyKind};
use crate::game::state::{Actor, Emergency, HuntState, Phase};

impl HuntState {
    /// Raise an emergency on behalf of a player.
    ///
    /// Forces `running -> paused`; on any other phase only the flag is
    /// set. Returns the player's last peer readings ranked strongest
    /// first so responders know who is closest.
    pub fn trigger_emergency(
        &mut self,
        device: &DeviceId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GameResult<Vec<(DeviceId, Rssi)>> {
        let Some(player) = self.players.get(device) else {
            return Err(GameError::unknown_device(device));
        };
        let name = player.name.clone();
        let mut ranked: Vec<(DeviceId, Rssi)> = player
            .last_rssi
            .iter()
            .map(|(id, rssi)| (id.clone(), *rssi))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        self.raise(Some(device.clone()), reason, now);
        self.notify_all(
            &format!("EMERGENCY by {name}: {reason}"),
            NotifyKind::Danger,
            now,
        );
        Ok(ranked)
    }

    /// Raise an emergency with no specific player (admin/mod action).
    pub fn trigger_system_emergency(
        &mut self,
        actor: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GameResult<()> {
        self.require_moderator(actor)?;
        self.raise(None, reason, now);
        self.notify_all(&format!("EMERGENCY: {reason}"), NotifyKind::Danger, now);
        Ok(())
    }

    fn raise(&mut self, by: Option<DeviceId>, reason: &str, now: DateTime<Utc>) {
        self.game.emergency = Emergency {
            active: true,
            by: by.clone(),
            reason: reason.to_string(),
            at: Some(now),
        };
        if self.game.phase == Phase::Running {
            self.freeze_remaining(now);
            self.game.phase = Phase::Paused;
            self.record_event(EventData::GamePaused, now);
        }
        self.record_event(EventData::EmergencyTriggered { by, reason: reason.to_string() }, now);
    }

    /// Clear the emergency. The game stays paused; resuming is a
    /// separate explicit action.
    pub fn clear_emergency(&mut self, actor: &Actor, now: DateTime<Utc>) -> GameResult<()> {
        self.require_moderator(actor)?;
        if !self.game.emergency.active {
            return Ok(());
        }
        self.game.emergency = Emergency::default();
        self.record_event(EventData::EmergencyCleared, now);
        self.notify_all("Emergency cleared", NotifyKind::Info, now);
        Ok(())
    }

    /// Current emergency sub-state.
    pub fn emergency_status(&self) -> &Emergency {
        &self.game.emergency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{HuntConfig, Player, Role, Status};

    fn dev(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    fn setup() -> (HuntState, DeviceId, DateTime<Utc>) {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        let id = dev("T0001");
        let mut p = Player::new(id.clone(), now);
        p.online = true;
        s.players.insert(id.clone(), p);
        (s, id, now)
    }

    #[test]
    fn test_trigger_pauses_running_game() {
        let (mut s, id, now) = setup();
        s.game.phase = Phase::Running;
        s.game.deadline = Some(now + chrono::Duration::seconds(300));

        s.trigger_emergency(&id, "twisted ankle", now).unwrap();

        assert!(s.game.emergency.active);
        assert_eq!(s.game.emergency.by, Some(id));
        assert_eq!(s.game.phase, Phase::Paused);
        // Remaining time is preserved for the eventual resume.
        assert_eq!(s.game.paused_remaining_secs, Some(300));
    }

    #[test]
    fn test_trigger_outside_running_only_sets_flag() {
        let (mut s, id, now) = setup();
        s.trigger_emergency(&id, "help", now).unwrap();
        assert!(s.game.emergency.active);
        assert_eq!(s.game.phase, Phase::Lobby);
    }

    #[test]
    fn test_unknown_device_rejected() {
        let (mut s, _, now) = setup();
        assert!(matches!(
            s.trigger_emergency(&dev("T9999"), "x", now).unwrap_err(),
            GameError::NotFound(_)
        ));
    }

    #[test]
    fn test_ranked_neighbors() {
        let (mut s, id, now) = setup();
        let near = dev("T000A");
        let far = dev("T000B");
        if let Some(p) = s.players.get_mut(&id) {
            p.last_rssi.insert(far.clone(), -90);
            p.last_rssi.insert(near.clone(), -50);
        }
        let ranked = s.trigger_emergency(&id, "help", now).unwrap();
        assert_eq!(ranked[0].0, near);
        assert_eq!(ranked[1].0, far);
    }

    #[test]
    fn test_clear_does_not_resume() {
        let (mut s, id, now) = setup();
        s.game.phase = Phase::Running;
        s.game.deadline = Some(now + chrono::Duration::seconds(120));
        s.trigger_emergency(&id, "help", now).unwrap();

        s.clear_emergency(&Actor::Admin, now).unwrap();
        assert!(!s.game.emergency.active);
        assert_eq!(s.game.phase, Phase::Paused);
    }

    #[test]
    fn test_system_trigger_requires_moderator() {
        let (mut s, id, now) = setup();
        let err = s
            .trigger_system_emergency(&Actor::Device(id), "drill", now)
            .unwrap_err();
        assert!(matches!(err, GameError::PermissionDenied(_)));
        s.trigger_system_emergency(&Actor::Admin, "drill", now).unwrap();
        assert!(s.game.emergency.active);
        assert_eq!(s.game.emergency.by, None);
    }

    #[test]
    fn test_blocked_actions_while_active() {
        let (mut s, id, now) = setup();
        let prey = dev("T0002");
        let mut p = Player::new(prey.clone(), now);
        p.role = Role::Prey;
        p.status = Status::Active;
        p.online = true;
        s.players.insert(prey.clone(), p);
        if let Some(p) = s.players.get_mut(&id) {
            p.role = Role::Predator;
            p.status = Status::Active;
        }
        s.game.phase = Phase::Running;
        s.trigger_emergency(&prey, "help", now).unwrap();

        assert_eq!(
            s.attempt_capture(&id, &prey, -60, now).unwrap_err(),
            GameError::EmergencyBlocked
        );
        assert_eq!(s.resume(&Actor::Admin, now).unwrap_err(), GameError::EmergencyBlocked);
    }
}
