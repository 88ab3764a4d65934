//! Wire Contracts
//!
//! Types crossing the process boundary: the firmware poll response,
//! the radio presence packet, push-gateway frames, and the admin/web
//! read views. Everything serializes as JSON except the presence
//! packet, which is the `|`-delimited line format legacy trackers
//! parse positionally.
//!
//! Field order in [`PollResponse`] is a contract: serde emits struct
//! fields in declaration order and the firmware reads them
//! positionally in some legacy layouts. The decode tests below pin
//! both the order and the role-before-consent rule.

use serde::{Deserialize, Serialize};

use crate::core::ids::{BeaconId, DeviceId};
use crate::core::rssi::Rssi;
use crate::game::events::{Event, Notification};
use crate::game::modes::ModeKey;
use crate::game::state::{ConsentFlags, Emergency, Phase, Role, Settings, Status, BADGE_STANDARD};

/// Delimiter of the radio presence packet. Ids, role codes, and
/// consent badges never contain it.
pub const PACKET_DELIMITER: char = '|';

// =============================================================================
// POLL RESPONSE (firmware contract)
// =============================================================================

/// Response to a tracker's periodic ping.
///
/// Declaration order here IS the wire order; do not reorder fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    /// Current game phase.
    pub phase: Phase,
    /// The polling player's role.
    pub role: Role,
    /// The polling player's status.
    pub status: Status,
    /// Safe-zone flag.
    pub in_safe_zone: bool,
    /// Team name; serialized as null when absent (firmware JSON
    /// parsers check for null before converting).
    pub team: Option<String>,
    /// Seconds left in the current phase.
    pub time_remaining_secs: i64,
    /// Strongest reported contact, or the hidden placeholder.
    pub nearest_contact: Option<String>,
    /// Drained notifications, most recent last.
    pub notifications: Vec<Notification>,
    /// Ids of currently active beacons.
    pub active_beacons: Vec<BeaconId>,
    /// Active mode summary.
    pub mode: ModeInfo,
    /// Emergency summary.
    pub emergency: EmergencyInfo,
    /// The player's own consent badge.
    pub consent_badge: String,
}

/// Mode summary carried in poll responses and game views.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeInfo {
    /// Table key.
    pub key: ModeKey,
    /// Display name.
    pub name: String,
    /// Infection flag.
    pub infection: bool,
    /// Photo-required flag.
    pub photo_required: bool,
    /// Team flag.
    pub team_based: bool,
}

impl From<ModeKey> for ModeInfo {
    fn from(key: ModeKey) -> Self {
        let config = key.config();
        Self {
            key,
            name: config.name.to_string(),
            infection: config.infection,
            photo_required: config.photo_required,
            team_based: config.team,
        }
    }
}

/// Emergency summary carried in poll responses and game views.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencyInfo {
    /// Whether an emergency is in force.
    pub active: bool,
    /// Triggering player, if any.
    pub by: Option<DeviceId>,
    /// Free-text reason.
    pub reason: String,
}

impl From<&Emergency> for EmergencyInfo {
    fn from(e: &Emergency) -> Self {
        Self { active: e.active, by: e.by.clone(), reason: e.reason.clone() }
    }
}

/// Game summary for dashboards and the admin panel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameView {
    /// Current phase.
    pub phase: Phase,
    /// Active mode summary.
    pub mode: ModeInfo,
    /// Operator settings.
    pub settings: Settings,
    /// Configured duration in minutes.
    pub duration_mins: u32,
    /// Configured countdown in seconds.
    pub countdown_secs: u32,
    /// Seconds left in the current phase.
    pub time_remaining_secs: i64,
    /// Players with an assigned role.
    pub player_count: usize,
    /// Predators.
    pub pred_count: usize,
    /// Prey.
    pub prey_count: usize,
    /// Players declared ready.
    pub ready_count: usize,
    /// Players online.
    pub online_count: usize,
    /// Emergency summary.
    pub emergency: EmergencyInfo,
}

// =============================================================================
// PRESENCE PACKET (radio contract)
// =============================================================================

/// Decoded radio presence broadcast: `<id>|<role>|<badge>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresencePacket {
    /// Broadcasting device.
    pub device: DeviceId,
    /// Broadcast role.
    pub role: Role,
    /// Decoded consent flags.
    pub consent: ConsentFlags,
}

/// Encode a presence packet line.
pub fn encode_presence(device: &DeviceId, role: Role, consent: &ConsentFlags) -> String {
    format!(
        "{}{PACKET_DELIMITER}{}{PACKET_DELIMITER}{}",
        device,
        role.wire_code(),
        consent.badge()
    )
}

/// Decode a presence packet line.
///
/// The role is always the second field and must be split off before
/// the badge is interpreted; a missing third field means standard
/// consent (older firmware revisions sent two fields only).
pub fn decode_presence(line: &str) -> Option<PresencePacket> {
    let mut parts = line.splitn(3, PACKET_DELIMITER);
    let device = DeviceId::parse(parts.next()?).ok()?;
    let role = Role::from_wire_code(parts.next()?)?;
    let consent = match parts.next() {
        Some(badge) => ConsentFlags::from_badge(badge)?,
        None => ConsentFlags::from_badge(BADGE_STANDARD)?,
    };
    Some(PresencePacket { device, role, consent })
}

// =============================================================================
// PUSH GATEWAY FRAMES
// =============================================================================

/// Messages a push client sends to the gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Bind this connection to a device's notification stream.
    Subscribe {
        /// Raw device id (normalized server-side).
        device_id: String,
    },
    /// Latency probe.
    Ping {
        /// Echoed back in the pong.
        timestamp: u64,
    },
}

/// Messages the gateway sends to a push client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Subscription accepted; replayed notifications follow.
    Subscribed {
        /// Normalized device id.
        device_id: DeviceId,
    },
    /// Targeted notification.
    Notification {
        /// Payload.
        notification: Notification,
    },
    /// Broadcast event.
    Event {
        /// The recorded log entry.
        event: Event,
    },
    /// Latency probe response.
    Pong {
        /// Client timestamp echoed back.
        timestamp: u64,
    },
    /// Request-level error.
    Error {
        /// Short display-ready reason.
        message: String,
    },
}

impl ServerFrame {
    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ClientFrame {
    /// Parse from the wire.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// TRACKER REPORT (inbound)
// =============================================================================

/// Body of a tracker ping.
///
/// The signal maps are optional: an absent map means "no data this
/// tick" and leaves prior state untouched, while a present-but-empty
/// map is a real observation of nothing nearby.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TrackerReport {
    /// Raw device id.
    pub device_id: String,
    /// Per-opponent readings, raw id -> RSSI.
    #[serde(default)]
    pub player_rssi: Option<std::collections::BTreeMap<String, Rssi>>,
    /// Per-beacon readings, raw id -> RSSI.
    #[serde(default)]
    pub beacon_rssi: Option<std::collections::BTreeMap<String, Rssi>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::NotifyKind;
    use chrono::Utc;

    fn dev(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    fn sample_response() -> PollResponse {
        PollResponse {
            phase: Phase::Running,
            role: Role::Prey,
            status: Status::Active,
            in_safe_zone: false,
            team: None,
            time_remaining_secs: 240,
            nearest_contact: Some("T000A".into()),
            notifications: vec![Notification::new("hi", NotifyKind::Info, Utc::now())],
            active_beacons: vec![BeaconId::parse("B1").unwrap()],
            mode: ModeInfo::from(ModeKey::Standard),
            emergency: EmergencyInfo { active: false, by: None, reason: String::new() },
            consent_badge: "STD".into(),
        }
    }

    #[test]
    fn test_poll_response_field_order_is_stable() {
        let json = serde_json::to_string(&sample_response()).unwrap();
        let keys = [
            "\"phase\"",
            "\"role\"",
            "\"status\"",
            "\"in_safe_zone\"",
            "\"team\"",
            "\"time_remaining_secs\"",
            "\"nearest_contact\"",
            "\"notifications\"",
            "\"active_beacons\"",
            "\"mode\"",
            "\"emergency\"",
            "\"consent_badge\"",
        ];
        let positions: Vec<usize> = keys
            .iter()
            .map(|k| json.find(k).unwrap_or_else(|| panic!("missing key {k}")))
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted, "field order drifted: {json}");
    }

    #[test]
    fn test_poll_response_roundtrip() {
        let response = sample_response();
        let json = serde_json::to_string(&response).unwrap();
        let decoded: PollResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_absent_team_serializes_as_null() {
        let json = serde_json::to_string(&sample_response()).unwrap();
        assert!(json.contains("\"team\":null"));
    }

    #[test]
    fn test_presence_roundtrip() {
        let device = dev("T9EF0");
        let consent = ConsentFlags { physical_tag: true, ..ConsentFlags::default() };
        let line = encode_presence(&device, Role::Predator, &consent);
        assert_eq!(line, "T9EF0|pred|T");

        let decoded = decode_presence(&line).unwrap();
        assert_eq!(decoded.device, device);
        assert_eq!(decoded.role, Role::Predator);
        assert_eq!(decoded.consent, consent);
    }

    /// Regression for the historical firmware bug: the remainder
    /// after the first delimiter must be split again so the badge is
    /// never mistaken for part of the role.
    #[test]
    fn test_role_parsed_before_consent() {
        let decoded = decode_presence("TA2B3|prey|T").unwrap();
        assert_eq!(decoded.role, Role::Prey);
        assert!(decoded.consent.physical_tag);

        let decoded = decode_presence("T1234|unknown|NP").unwrap();
        assert_eq!(decoded.role, Role::Unassigned);
        assert!(!decoded.consent.photo_visible);
    }

    #[test]
    fn test_two_field_packet_defaults_to_standard_consent() {
        let decoded = decode_presence("T1234|prey").unwrap();
        assert_eq!(decoded.consent, ConsentFlags::default());
    }

    #[test]
    fn test_malformed_packets_rejected() {
        assert!(decode_presence("").is_none());
        assert!(decode_presence("T1234").is_none());
        assert!(decode_presence("T1234|wizard|STD").is_none());
        assert!(decode_presence("x|prey|STD").is_none());
        assert!(decode_presence("T1234|prey|QQ").is_none());
    }

    #[test]
    fn test_client_frame_parsing() {
        let frame = ClientFrame::from_json(r#"{"type":"subscribe","device_id":"t9ef0"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Subscribe { ref device_id } if device_id == "t9ef0"));
        assert!(ClientFrame::from_json("not json").is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_badge_roundtrips(
            physical_tag in proptest::bool::ANY,
            photo_visible in proptest::bool::ANY,
            location_share in proptest::bool::ANY,
        ) {
            let flags = ConsentFlags { physical_tag, photo_visible, location_share };
            let badge = flags.badge();
            proptest::prop_assert!(!badge.contains(PACKET_DELIMITER));
            proptest::prop_assert_eq!(ConsentFlags::from_badge(&badge), Some(flags));
        }
    }
}
