//! Game Mode Configurations
//!
//! A fixed table of named configurations. Each mode supplies the
//! duration default, the scoring weights, and the feature flags that
//! change the capture machine's behavior. Mode selection is only
//! permitted in the lobby.

use serde::{Deserialize, Serialize};

/// Key selecting one entry of the mode table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModeKey {
    /// Classic hunt, balanced weights.
    #[default]
    Standard,
    /// Short aggressive round.
    Blitz,
    /// Long game rewarding survival.
    Endurance,
    /// Predators score for their team.
    Team,
    /// Captures convert prey into predators.
    Infection,
    /// Captures require a prior sighting photo of the target.
    Photohunt,
}

/// One entry of the mode table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ModeConfig {
    /// Table key.
    pub key: ModeKey,
    /// Human-readable name.
    pub name: &'static str,
    /// Default game duration in minutes.
    pub duration_mins: u32,
    /// Points per capture (also the team-score increment).
    pub capture_points: u32,
    /// Points per escape.
    pub escape_points: u32,
    /// Points per photo sighting.
    pub sighting_points: u32,
    /// Prey bonus for ending the game never captured.
    pub survival_bonus: u32,
    /// Captures convert role instead of setting captured status.
    pub infection: bool,
    /// Players are grouped into scoring teams.
    pub team: bool,
    /// Capture requires a recorded sighting photo of the target.
    pub photo_required: bool,
}

/// The full mode table, in display order.
pub const MODES: [ModeConfig; 6] = [
    ModeConfig {
        key: ModeKey::Standard,
        name: "Standard Hunt",
        duration_mins: 30,
        capture_points: 100,
        escape_points: 75,
        sighting_points: 25,
        survival_bonus: 200,
        infection: false,
        team: false,
        photo_required: false,
    },
    ModeConfig {
        key: ModeKey::Blitz,
        name: "Blitz",
        duration_mins: 10,
        capture_points: 150,
        escape_points: 100,
        sighting_points: 25,
        survival_bonus: 100,
        infection: false,
        team: false,
        photo_required: false,
    },
    ModeConfig {
        key: ModeKey::Endurance,
        name: "Endurance",
        duration_mins: 90,
        capture_points: 100,
        escape_points: 75,
        sighting_points: 25,
        survival_bonus: 400,
        infection: false,
        team: false,
        photo_required: false,
    },
    ModeConfig {
        key: ModeKey::Team,
        name: "Team Hunt",
        duration_mins: 30,
        capture_points: 100,
        escape_points: 75,
        sighting_points: 25,
        survival_bonus: 200,
        infection: false,
        team: true,
        photo_required: false,
    },
    ModeConfig {
        key: ModeKey::Infection,
        name: "Infection",
        duration_mins: 20,
        capture_points: 100,
        escape_points: 0,
        sighting_points: 25,
        survival_bonus: 300,
        infection: true,
        team: false,
        photo_required: false,
    },
    ModeConfig {
        key: ModeKey::Photohunt,
        name: "Photo Hunt",
        duration_mins: 45,
        capture_points: 100,
        escape_points: 75,
        sighting_points: 40,
        survival_bonus: 200,
        infection: false,
        team: false,
        photo_required: true,
    },
];

impl ModeKey {
    /// Look up this key's configuration record.
    pub fn config(self) -> &'static ModeConfig {
        // MODES is ordered to match the enum; fall back to a scan so
        // the table order is never a correctness requirement.
        MODES
            .iter()
            .find(|m| m.key == self)
            .unwrap_or(&MODES[0])
    }

    /// All known keys, in table order.
    pub fn all() -> impl Iterator<Item = ModeKey> {
        MODES.iter().map(|m| m.key)
    }
}
