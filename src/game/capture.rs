//! Capture / Escape / Infection State Machine
//!
//! Validates and applies every predator-prey interaction. All seven
//! capture preconditions are checked in a fixed order so callers see
//! stable rejection reasons; the cooldown stamp is recorded on
//! success before either branch applies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::ids::{BeaconId, DeviceId};
use crate::core::rssi::{meets, Rssi};
use crate::game::error::{GameError, GameResult};
use crate::game::events::{EventData, NotifyKind};
use crate::game::state::{HuntState, Phase, Role, Status};

/// What a successful capture attempt did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// Standard capture; bounty payout included if one was open.
    Captured {
        /// Bounty points paid to the capturer (0 if none).
        bounty_points: u32,
    },
    /// Infection-mode conversion.
    Infected {
        /// The conversion emptied the prey pool and ended the game.
        game_over: bool,
    },
}

impl HuntState {
    /// Validate and apply a capture attempt.
    pub fn attempt_capture(
        &mut self,
        pred_id: &DeviceId,
        prey_id: &DeviceId,
        rssi: Rssi,
        now: DateTime<Utc>,
    ) -> GameResult<CaptureOutcome> {
        let mode = *self.game.mode.config();

        // 1. Identity and roles.
        if pred_id == prey_id {
            return Err(GameError::rejected("cannot self-capture"));
        }
        let pred = self
            .players
            .get(pred_id)
            .ok_or_else(|| GameError::unknown_device(pred_id))?;
        let prey = self
            .players
            .get(prey_id)
            .ok_or_else(|| GameError::unknown_device(prey_id))?;
        if pred.role != Role::Predator {
            return Err(GameError::rejected("not a predator"));
        }
        if prey.role != Role::Prey {
            return Err(GameError::rejected("target is not prey"));
        }

        // 2. Phase and emergency.
        if self.game.phase != Phase::Running {
            return Err(GameError::InvalidState("game not running".into()));
        }
        if self.game.emergency.active {
            return Err(GameError::EmergencyBlocked);
        }

        // 3. Target state (standard mode only).
        if !mode.infection {
            if prey.status == Status::Captured {
                return Err(GameError::rejected("already captured"));
            }
            if prey.in_safe_zone {
                return Err(GameError::rejected("prey in safe zone"));
            }
        }

        // 4. Signal strength; the threshold is a ceiling, equal passes.
        if !meets(rssi, self.game.settings.capture_rssi) {
            return Err(GameError::rejected(format!("too far ({rssi} dBm)")));
        }

        // 5. Photo eligibility.
        if mode.photo_required && !pred.photographed.contains(prey_id) {
            return Err(GameError::rejected("photo target first"));
        }

        // 6. Attempt cooldown.
        if let Some(stamp) = self.capture_cooldowns.get(pred_id) {
            if (now - *stamp).num_seconds() < self.config.capture_cooldown_secs {
                return Err(GameError::rejected("capture cooldown"));
            }
        }

        // 7. Success. Stamp the cooldown before branching.
        let pred_name = pred.name.clone();
        let prey_name = prey.name.clone();
        let pred_team = pred.team.clone();
        self.capture_cooldowns.insert(pred_id.clone(), now);

        if mode.infection {
            self.apply_infection(pred_id, prey_id, &pred_name, &prey_name, now)
        } else {
            self.apply_capture(pred_id, prey_id, &pred_name, &prey_name, pred_team, rssi, now)
        }
    }

    fn apply_infection(
        &mut self,
        pred_id: &DeviceId,
        prey_id: &DeviceId,
        pred_name: &str,
        prey_name: &str,
        now: DateTime<Utc>,
    ) -> GameResult<CaptureOutcome> {
        if let Some(prey) = self.players.get_mut(prey_id) {
            prey.role = Role::Predator;
            prey.status = Status::Active;
            prey.captured_by = None;
            prey.times_captured += 1;
        }
        if let Some(pred) = self.players.get_mut(pred_id) {
            pred.captures += 1;
            pred.infections += 1;
        }

        self.record_event(
            EventData::Infection { predator: pred_id.clone(), converted: prey_id.clone() },
            now,
        );
        self.notify(
            prey_id,
            format!("INFECTED by {pred_name}! You hunt now."),
            NotifyKind::Danger,
            now,
        );
        self.notify(pred_id, format!("You infected {prey_name}!"), NotifyKind::Success, now);
        self.notify_role(
            Role::Prey,
            "Another hunter joined the pack!",
            NotifyKind::Warning,
            now,
        );

        let game_over = self.prey_pool_empty();
        if game_over {
            // Last prey converted: skip the timer and settle the game.
            self.end_game(now);
        }
        Ok(CaptureOutcome::Infected { game_over })
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_capture(
        &mut self,
        pred_id: &DeviceId,
        prey_id: &DeviceId,
        pred_name: &str,
        prey_name: &str,
        pred_team: Option<String>,
        rssi: Rssi,
        now: DateTime<Utc>,
    ) -> GameResult<CaptureOutcome> {
        let mode = *self.game.mode.config();

        if let Some(prey) = self.players.get_mut(prey_id) {
            prey.status = Status::Captured;
            prey.captured_by = Some(pred_id.clone());
            prey.times_captured += 1;
        }

        let bounty_points = self.bounties.remove(prey_id).map(|b| b.points).unwrap_or(0);
        if let Some(pred) = self.players.get_mut(pred_id) {
            pred.captures += 1;
            pred.bonus_points += bounty_points;
        }
        if bounty_points > 0 {
            self.record_event(
                EventData::BountyClaimed {
                    target: prey_id.clone(),
                    by: pred_id.clone(),
                    points: bounty_points,
                },
                now,
            );
        }

        if mode.team {
            if let Some(team) = pred_team {
                *self.team_scores.entry(team).or_insert(0) += mode.capture_points;
            }
        }

        self.record_event(
            EventData::Capture { predator: pred_id.clone(), prey: prey_id.clone(), rssi },
            now,
        );
        self.notify(prey_id, format!("CAPTURED by {pred_name}!"), NotifyKind::Danger, now);
        self.notify(pred_id, format!("You captured {prey_name}!"), NotifyKind::Success, now);

        Ok(CaptureOutcome::Captured { bounty_points })
    }

    /// Return captured prey to play.
    ///
    /// No-op outside standard-style modes or when the target is not
    /// captured; returns whether an escape was applied.
    pub fn process_escape(
        &mut self,
        prey_id: &DeviceId,
        beacon: Option<&BeaconId>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.game.mode.config().infection {
            return false;
        }
        let Some(prey) = self.players.get_mut(prey_id) else {
            return false;
        };
        if prey.status != Status::Captured {
            return false;
        }

        prey.status = Status::Active;
        prey.escapes += 1;
        let hunter = prey.captured_by.take();
        let prey_name = prey.name.clone();

        let beacon_name = beacon
            .and_then(|b| self.beacons.get(b))
            .map(|b| b.name.clone())
            .unwrap_or_else(|| "a safe zone".to_string());

        self.record_event(
            EventData::Escape { prey: prey_id.clone(), beacon: beacon.cloned() },
            now,
        );
        self.notify(
            prey_id,
            format!("You ESCAPED via {beacon_name}!"),
            NotifyKind::Success,
            now,
        );
        if let Some(hunter_id) = hunter {
            self.notify(
                &hunter_id,
                format!("{prey_name} escaped your grasp!"),
                NotifyKind::Warning,
                now,
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::modes::ModeKey;
    use crate::game::state::{Bounty, HuntConfig, Player};

    fn dev(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    /// Running game with predator T0001 and prey T0002.
    fn running_state() -> (HuntState, DeviceId, DeviceId, DateTime<Utc>) {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        let pred = dev("T0001");
        let prey = dev("T0002");
        for (id, role) in [(&pred, Role::Predator), (&prey, Role::Prey)] {
            let mut p = Player::new(id.clone(), now);
            p.role = role;
            p.status = Status::Active;
            p.online = true;
            s.players.insert(id.clone(), p);
        }
        s.game.phase = Phase::Running;
        s.take_outgoing();
        (s, pred, prey, now)
    }

    #[test]
    fn test_successful_capture() {
        let (mut s, pred, prey, now) = running_state();
        let outcome = s.attempt_capture(&pred, &prey, -60, now).unwrap();
        assert_eq!(outcome, CaptureOutcome::Captured { bounty_points: 0 });
        assert_eq!(s.players[&prey].status, Status::Captured);
        assert_eq!(s.players[&prey].captured_by, Some(pred.clone()));
        assert_eq!(s.players[&pred].captures, 1);
        assert_eq!(s.players[&prey].times_captured, 1);
    }

    #[test]
    fn test_rssi_boundary() {
        let (mut s, pred, prey, now) = running_state();
        // Exactly at the threshold succeeds.
        assert!(s.attempt_capture(&pred, &prey, -70, now).is_ok());

        let (mut s, pred, prey, now) = running_state();
        // One unit weaker fails.
        let err = s.attempt_capture(&pred, &prey, -71, now).unwrap_err();
        assert!(matches!(err, GameError::PreconditionFailed(_)));
    }

    #[test]
    fn test_rejection_order_and_reasons() {
        let (mut s, pred, prey, now) = running_state();

        assert_eq!(
            s.attempt_capture(&pred, &pred, -60, now).unwrap_err(),
            GameError::rejected("cannot self-capture")
        );
        assert!(matches!(
            s.attempt_capture(&dev("T9999"), &prey, -60, now).unwrap_err(),
            GameError::NotFound(_)
        ));
        assert_eq!(
            s.attempt_capture(&prey, &pred, -60, now).unwrap_err(),
            GameError::rejected("not a predator")
        );

        s.game.phase = Phase::Paused;
        assert!(matches!(
            s.attempt_capture(&pred, &prey, -60, now).unwrap_err(),
            GameError::InvalidState(_)
        ));
        s.game.phase = Phase::Running;

        s.game.emergency.active = true;
        assert_eq!(
            s.attempt_capture(&pred, &prey, -60, now).unwrap_err(),
            GameError::EmergencyBlocked
        );
    }

    #[test]
    fn test_no_capture_in_safe_zone() {
        let (mut s, pred, prey, now) = running_state();
        if let Some(p) = s.players.get_mut(&prey) {
            p.in_safe_zone = true;
        }
        assert_eq!(
            s.attempt_capture(&pred, &prey, -60, now).unwrap_err(),
            GameError::rejected("prey in safe zone")
        );
    }

    #[test]
    fn test_double_capture_rejected() {
        let (mut s, pred, prey, now) = running_state();
        s.attempt_capture(&pred, &prey, -60, now).unwrap();

        let other = dev("T0003");
        let mut p = Player::new(other.clone(), now);
        p.role = Role::Predator;
        p.status = Status::Active;
        s.players.insert(other.clone(), p);

        assert_eq!(
            s.attempt_capture(&other, &prey, -60, now).unwrap_err(),
            GameError::rejected("already captured")
        );
    }

    #[test]
    fn test_capture_cooldown() {
        let (mut s, pred, prey, now) = running_state();
        s.attempt_capture(&pred, &prey, -60, now).unwrap();
        s.process_escape(&prey, None, now);

        let err = s
            .attempt_capture(&pred, &prey, -60, now + chrono::Duration::seconds(5))
            .unwrap_err();
        assert_eq!(err, GameError::rejected("capture cooldown"));

        assert!(s
            .attempt_capture(&pred, &prey, -60, now + chrono::Duration::seconds(11))
            .is_ok());
    }

    #[test]
    fn test_photo_required_mode() {
        let (mut s, pred, prey, now) = running_state();
        s.game.mode = ModeKey::Photohunt;

        assert_eq!(
            s.attempt_capture(&pred, &prey, -60, now).unwrap_err(),
            GameError::rejected("photo target first")
        );

        if let Some(p) = s.players.get_mut(&pred) {
            p.photographed.insert(prey.clone());
        }
        assert!(s.attempt_capture(&pred, &prey, -60, now).is_ok());
    }

    #[test]
    fn test_bounty_payout_and_consumption() {
        let (mut s, pred, prey, now) = running_state();
        s.bounties.insert(prey.clone(), Bounty { points: 100, reason: "menace".into() });

        let outcome = s.attempt_capture(&pred, &prey, -60, now).unwrap();
        assert_eq!(outcome, CaptureOutcome::Captured { bounty_points: 100 });
        assert!(!s.bounties.contains_key(&prey));
        assert_eq!(s.players[&pred].bonus_points, 100);

        // Scenario E: base capture value plus the bounty.
        s.recompute_points();
        assert_eq!(s.players[&pred].points, 100 + 100);
    }

    #[test]
    fn test_team_score_increment() {
        let (mut s, pred, prey, now) = running_state();
        s.game.mode = ModeKey::Team;
        if let Some(p) = s.players.get_mut(&pred) {
            p.team = Some("crimson".into());
        }
        s.attempt_capture(&pred, &prey, -60, now).unwrap();
        assert_eq!(s.team_scores["crimson"], 100);
    }

    #[test]
    fn test_infection_converts_and_ends_game() {
        let (mut s, pred, prey, now) = running_state();
        s.game.mode = ModeKey::Infection;

        // Scenario D: single prey remaining.
        let outcome = s.attempt_capture(&pred, &prey, -60, now).unwrap();
        assert_eq!(outcome, CaptureOutcome::Infected { game_over: true });
        assert_eq!(s.players[&prey].role, Role::Predator);
        assert_eq!(s.players[&prey].status, Status::Active);
        assert_eq!(s.players[&pred].infections, 1);
        assert_eq!(s.players[&pred].captures, 1);
        assert_eq!(s.game.phase, Phase::Ended);
    }

    #[test]
    fn test_infection_with_prey_remaining_keeps_running() {
        let (mut s, pred, prey, now) = running_state();
        s.game.mode = ModeKey::Infection;
        let second = dev("T0003");
        let mut p = Player::new(second.clone(), now);
        p.role = Role::Prey;
        p.status = Status::Active;
        s.players.insert(second, p);

        let outcome = s.attempt_capture(&pred, &prey, -60, now).unwrap();
        assert_eq!(outcome, CaptureOutcome::Infected { game_over: false });
        assert_eq!(s.game.phase, Phase::Running);
    }

    #[test]
    fn test_escape_flow() {
        let (mut s, pred, prey, now) = running_state();
        s.attempt_capture(&pred, &prey, -60, now).unwrap();
        s.take_outgoing();

        assert!(s.process_escape(&prey, None, now));
        let p = &s.players[&prey];
        assert_eq!(p.status, Status::Active);
        assert_eq!(p.escapes, 1);
        assert!(p.captured_by.is_none());

        // Both the escapee and the losing predator hear about it.
        let notified: Vec<_> = s
            .take_outgoing()
            .into_iter()
            .filter_map(|o| match o {
                crate::game::events::Outgoing::Notify { device, .. } => Some(device),
                _ => None,
            })
            .collect();
        assert!(notified.contains(&prey));
        assert!(notified.contains(&pred));

        // Escape is idempotent.
        assert!(!s.process_escape(&prey, None, now));
    }

    #[test]
    fn test_escape_is_noop_in_infection_mode() {
        let (mut s, _, prey, now) = running_state();
        s.game.mode = ModeKey::Infection;
        if let Some(p) = s.players.get_mut(&prey) {
            p.status = Status::Captured;
        }
        assert!(!s.process_escape(&prey, None, now));
    }
}
