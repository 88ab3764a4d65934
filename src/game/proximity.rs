//! Proximity & Safe-Zone Resolver
//!
//! Consumes per-tick signal reports. Beacon readings drive safe-zone
//! membership transitions; peer readings are recorded raw and only
//! surfaced as a nearest-contact hint, gated by the reporting
//! player's own location-share consent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::core::ids::{BeaconId, DeviceId};
use crate::core::rssi::{meets, Rssi};
use crate::game::events::{EventData, NotifyKind};
use crate::game::state::{HuntState, Status};

/// Placeholder shown instead of a real contact when the reporter has
/// location sharing disabled.
pub const HIDDEN_CONTACT: &str = "hidden";

impl HuntState {
    /// Record a device's latest per-opponent readings verbatim.
    pub fn record_peer_signals(&mut self, device: &DeviceId, readings: BTreeMap<DeviceId, Rssi>) {
        if let Some(player) = self.players.get_mut(device) {
            player.last_rssi = readings;
        }
    }

    /// Strongest reported entity, for location-sharing display.
    ///
    /// Returns `Some("hidden")` when the reporter has readings but has
    /// disabled location sharing, `None` when there is nothing to show.
    pub fn nearest_contact(&self, device: &DeviceId) -> Option<String> {
        let player = self.players.get(device)?;
        let (nearest, _) = player
            .last_rssi
            .iter()
            .max_by_key(|(_, rssi)| **rssi)?;
        if player.consent.location_share {
            Some(nearest.to_string())
        } else {
            Some(HIDDEN_CONTACT.to_string())
        }
    }

    /// Apply a device's beacon readings to its safe-zone membership.
    ///
    /// A reading qualifies if its beacon exists, is active, and the
    /// signal meets the beacon's threshold; the strongest qualifying
    /// beacon is the "nearest". Transitions fire events; staying safe
    /// under a different beacon re-records the reference silently.
    /// Bypassed entirely while the honor system is on.
    pub fn update_safe_zone(
        &mut self,
        device: &DeviceId,
        readings: &BTreeMap<BeaconId, Rssi>,
        now: DateTime<Utc>,
    ) {
        if self.game.settings.honor_system {
            return;
        }

        let mut nearest: Option<(BeaconId, Rssi)> = None;
        for (beacon_id, signal) in readings {
            let Some(beacon) = self.beacons.get(beacon_id) else {
                continue;
            };
            if !beacon.active || !meets(*signal, beacon.threshold) {
                continue;
            }
            let stronger = nearest.as_ref().map_or(true, |(_, best)| *signal > *best);
            if stronger {
                nearest = Some((beacon_id.clone(), *signal));
            }
        }

        let Some(player) = self.players.get_mut(device) else {
            return;
        };
        let was_safe = player.in_safe_zone;

        match (was_safe, nearest) {
            (false, Some((beacon_id, _))) => {
                player.in_safe_zone = true;
                player.safe_zone_beacon = Some(beacon_id.clone());
                let was_captured = player.status == Status::Captured;
                let beacon_name = self
                    .beacons
                    .get(&beacon_id)
                    .map(|b| b.name.clone())
                    .unwrap_or_else(|| beacon_id.to_string());
                self.record_event(
                    EventData::EnterSafeZone { device: device.clone(), beacon: Some(beacon_id.clone()) },
                    now,
                );
                self.notify(
                    device,
                    format!("Entered safe zone: {beacon_name}"),
                    NotifyKind::Success,
                    now,
                );
                if was_captured {
                    self.process_escape(device, Some(&beacon_id), now);
                }
            }
            (true, None) => {
                player.in_safe_zone = false;
                player.safe_zone_beacon = None;
                self.record_event(EventData::LeaveSafeZone { device: device.clone() }, now);
                self.notify(
                    device,
                    "Left safe zone - you can be captured!",
                    NotifyKind::Warning,
                    now,
                );
            }
            (true, Some((beacon_id, _))) => {
                // Still protected; keep the reference current, no event.
                player.safe_zone_beacon = Some(beacon_id);
            }
            (false, None) => {}
        }
    }
}
