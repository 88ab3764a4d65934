//! Scoring Engine
//!
//! Pure function of player stats and the active mode configuration.
//! Points are derived, recomputed on demand, never authoritative.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::ids::DeviceId;
use crate::game::modes::ModeConfig;
use crate::game::state::{HuntState, Phase, Player, Role, Status};

/// Streak bonus awarded at three captures.
pub const STREAK_BONUS_3: u32 = 50;
/// Additional streak bonus awarded at five captures.
pub const STREAK_BONUS_5: u32 = 100;

/// One leaderboard row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Device id.
    pub device_id: DeviceId,
    /// Display name.
    pub name: String,
    /// Profile picture reference.
    pub profile_pic: Option<String>,
    /// Derived score.
    pub points: u32,
    /// Capture count.
    pub captures: u32,
    /// Escape count.
    pub escapes: u32,
    /// Times captured.
    pub times_captured: u32,
    /// Sighting count.
    pub sightings: u32,
    /// Current status.
    pub status: Status,
    /// Online flag.
    pub online: bool,
    /// Safe-zone flag.
    pub in_safe_zone: bool,
    /// Team, under team mode.
    pub team: Option<String>,
}

/// Final or live standings, split by side.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    /// Predators, highest points first.
    pub predators: Vec<LeaderboardEntry>,
    /// Prey, highest points first.
    pub prey: Vec<LeaderboardEntry>,
    /// Team totals under team mode.
    pub teams: BTreeMap<String, u32>,
}

/// Compute a player's points under the given mode and phase.
///
/// Predators score captures (with streak bonuses) and sightings; prey
/// score escapes, sightings, and a survival bonus once the game has
/// ended without them ever being caught. Bounty payouts land on either
/// side via `bonus_points`.
pub fn points_for(player: &Player, mode: &ModeConfig, phase: Phase) -> u32 {
    let mut points = player.bonus_points;
    match player.role {
        Role::Predator => {
            points += player.captures * mode.capture_points;
            if player.captures >= 3 {
                points += STREAK_BONUS_3;
            }
            if player.captures >= 5 {
                points += STREAK_BONUS_5;
            }
            points += player.sightings * mode.sighting_points;
        }
        Role::Prey => {
            points += player.escapes * mode.escape_points;
            points += player.sightings * mode.sighting_points;
            if player.times_captured == 0 && phase == Phase::Ended {
                points += mode.survival_bonus;
            }
        }
        Role::Unassigned => {}
    }
    points
}

impl HuntState {
    /// Recompute every player's derived points.
    pub fn recompute_points(&mut self) {
        let mode = *self.game.mode.config();
        let phase = self.game.phase;
        for player in self.players.values_mut() {
            player.points = points_for(player, &mode, phase);
        }
    }

    /// Build the leaderboard (recomputes points first).
    pub fn leaderboard(&mut self) -> Leaderboard {
        self.recompute_points();

        let mut board = Leaderboard { teams: self.team_scores.clone(), ..Leaderboard::default() };
        for player in self.players.values() {
            let entry = LeaderboardEntry {
                device_id: player.device_id.clone(),
                name: player.name.clone(),
                profile_pic: player.profile_pic.clone(),
                points: player.points,
                captures: player.captures,
                escapes: player.escapes,
                times_captured: player.times_captured,
                sightings: player.sightings,
                status: player.status,
                online: player.online,
                in_safe_zone: player.in_safe_zone,
                team: player.team.clone(),
            };
            match player.role {
                Role::Predator => board.predators.push(entry),
                Role::Prey => board.prey.push(entry),
                Role::Unassigned => {}
            }
        }
        board.predators.sort_by(|a, b| b.points.cmp(&a.points));
        board.prey.sort_by(|a, b| b.points.cmp(&a.points));
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::DeviceId;
    use crate::game::modes::ModeKey;
    use crate::game::state::{HuntConfig, HuntState};
    use chrono::Utc;

    fn player(role: Role) -> Player {
        let mut p = Player::new(DeviceId::parse("T0001").unwrap(), Utc::now());
        p.role = role;
        p
    }

    #[test]
    fn test_predator_scoring_with_streaks() {
        let mode = ModeKey::Standard.config();
        let mut p = player(Role::Predator);
        p.captures = 2;
        p.sightings = 1;
        assert_eq!(points_for(&p, mode, Phase::Running), 2 * 100 + 25);

        p.captures = 3;
        assert_eq!(points_for(&p, mode, Phase::Running), 3 * 100 + STREAK_BONUS_3 + 25);

        p.captures = 5;
        assert_eq!(
            points_for(&p, mode, Phase::Running),
            5 * 100 + STREAK_BONUS_3 + STREAK_BONUS_5 + 25
        );
    }

    #[test]
    fn test_survival_bonus_only_after_end() {
        let mode = ModeKey::Standard.config();
        let mut p = player(Role::Prey);
        p.escapes = 1;
        assert_eq!(points_for(&p, mode, Phase::Running), 75);
        assert_eq!(points_for(&p, mode, Phase::Ended), 75 + mode.survival_bonus);

        p.times_captured = 1;
        assert_eq!(points_for(&p, mode, Phase::Ended), 75);
    }

    #[test]
    fn test_bounty_payout_counts() {
        let mode = ModeKey::Standard.config();
        let mut p = player(Role::Predator);
        p.captures = 1;
        p.bonus_points = 100;
        assert_eq!(points_for(&p, mode, Phase::Running), 200);
    }

    #[test]
    fn test_unassigned_scores_zero() {
        let mode = ModeKey::Standard.config();
        let p = player(Role::Unassigned);
        assert_eq!(points_for(&p, mode, Phase::Ended), 0);
    }

    #[test]
    fn test_leaderboard_sorted_and_split() {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        for (id, role, captures) in
            [("T000A", Role::Predator, 1u32), ("T000B", Role::Predator, 3), ("T000C", Role::Prey, 0)]
        {
            let id = DeviceId::parse(id).unwrap();
            let mut p = Player::new(id.clone(), now);
            p.role = role;
            p.captures = captures;
            s.players.insert(id, p);
        }

        let board = s.leaderboard();
        assert_eq!(board.predators.len(), 2);
        assert_eq!(board.prey.len(), 1);
        assert!(board.predators[0].points >= board.predators[1].points);
        assert_eq!(board.predators[0].captures, 3);
    }
}
