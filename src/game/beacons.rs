//! Beacon Registry
//!
//! Admin-managed CRUD for safe-zone beacons, independent of the game
//! phase. The proximity resolver consumes this registry's output.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::ids::BeaconId;
use crate::core::rssi::{plausible_threshold, Rssi};
use crate::game::error::{GameError, GameResult};
use crate::game::events::EventData;
use crate::game::state::{Actor, Beacon, HuntState};

/// Partial beacon update.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BeaconUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New activation threshold.
    pub threshold: Option<Rssi>,
    /// Enable/disable the beacon.
    pub active: Option<bool>,
}

impl HuntState {
    /// Add a beacon. The threshold defaults to the safe-zone setting.
    pub fn add_beacon(
        &mut self,
        actor: &Actor,
        id: BeaconId,
        name: Option<String>,
        threshold: Option<Rssi>,
        now: DateTime<Utc>,
    ) -> GameResult<()> {
        self.require_admin(actor)?;
        let threshold = threshold.unwrap_or(self.game.settings.safezone_rssi);
        if !plausible_threshold(threshold) {
            return Err(GameError::rejected("threshold out of range"));
        }
        let name = name.unwrap_or_else(|| id.to_string());
        self.beacons.insert(
            id.clone(),
            Beacon { id: id.clone(), name, threshold, active: true },
        );
        self.record_event(EventData::BeaconAdded { id }, now);
        Ok(())
    }

    /// Apply a partial update to a beacon.
    pub fn update_beacon(
        &mut self,
        actor: &Actor,
        id: &BeaconId,
        update: BeaconUpdate,
        now: DateTime<Utc>,
    ) -> GameResult<()> {
        self.require_admin(actor)?;
        if let Some(threshold) = update.threshold {
            if !plausible_threshold(threshold) {
                return Err(GameError::rejected("threshold out of range"));
            }
        }
        let Some(beacon) = self.beacons.get_mut(id) else {
            return Err(GameError::unknown_beacon(id));
        };
        if let Some(name) = update.name {
            beacon.name = name;
        }
        if let Some(threshold) = update.threshold {
            beacon.threshold = threshold;
        }
        if let Some(active) = update.active {
            beacon.active = active;
        }
        self.record_event(EventData::BeaconUpdated { id: id.clone() }, now);
        Ok(())
    }

    /// Delete a beacon; players sheltering under it lose the
    /// reference on their next report.
    pub fn remove_beacon(&mut self, actor: &Actor, id: &BeaconId, now: DateTime<Utc>) -> GameResult<()> {
        self.require_admin(actor)?;
        if self.beacons.remove(id).is_none() {
            return Err(GameError::unknown_beacon(id));
        }
        self.record_event(EventData::BeaconRemoved { id: id.clone() }, now);
        Ok(())
    }

    /// All beacons in id order.
    pub fn list_beacons(&self) -> Vec<Beacon> {
        self.beacons.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::HuntConfig;

    fn bid(s: &str) -> BeaconId {
        BeaconId::parse(s).unwrap()
    }

    #[test]
    fn test_crud_roundtrip() {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();

        s.add_beacon(&Actor::Admin, bid("BASE"), Some("Basecamp".into()), Some(-80), now)
            .unwrap();
        assert_eq!(s.list_beacons().len(), 1);

        s.update_beacon(
            &Actor::Admin,
            &bid("BASE"),
            BeaconUpdate { active: Some(false), ..BeaconUpdate::default() },
            now,
        )
        .unwrap();
        assert!(!s.beacons[&bid("BASE")].active);

        s.remove_beacon(&Actor::Admin, &bid("BASE"), now).unwrap();
        assert!(s.list_beacons().is_empty());
    }

    #[test]
    fn test_threshold_validation() {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        let err = s
            .add_beacon(&Actor::Admin, bid("BASE"), None, Some(-140), now)
            .unwrap_err();
        assert!(matches!(err, GameError::PreconditionFailed(_)));
    }

    #[test]
    fn test_admin_gate() {
        let mut s = HuntState::new(HuntConfig::default());
        let now = Utc::now();
        let actor = Actor::Device(crate::core::ids::DeviceId::parse("T0001").unwrap());
        let err = s.add_beacon(&actor, bid("BASE"), None, None, now).unwrap_err();
        assert!(matches!(err, GameError::PermissionDenied(_)));
    }

    #[test]
    fn test_default_threshold_follows_settings() {
        let mut s = HuntState::new(HuntConfig::default());
        s.game.settings.safezone_rssi = -82;
        let now = Utc::now();
        s.add_beacon(&Actor::Admin, bid("BASE"), None, None, now).unwrap();
        assert_eq!(s.beacons[&bid("BASE")].threshold, -82);
    }
}
