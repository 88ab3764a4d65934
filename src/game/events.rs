//! Events and Notifications
//!
//! Two delivery primitives share this module:
//!
//! * the append-only, ring-buffered [`EventLog`] every connected
//!   client can query for history, and
//! * per-player [`Notification`] values queued into a bounded ring on
//!   each [`crate::game::state::Player`].
//!
//! Mutating operations stage everything they want delivered as
//! [`Outgoing`] values; the coordinator drains that staging area after
//! releasing the state lock so push I/O never happens inside a
//! critical section.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::{BeaconId, DeviceId};
use crate::core::rssi::Rssi;
use crate::game::modes::ModeKey;
use crate::game::scoring::Leaderboard;
use crate::game::state::{Role, Settings};

/// Maximum entries retained in the audit log.
pub const EVENT_LOG_CAP: usize = 500;

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Severity/styling class of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    /// Neutral information.
    Info,
    /// Positive outcome.
    Success,
    /// Something the player should react to.
    Warning,
    /// Immediate threat or emergency.
    Danger,
}

/// A single message for one player's queue or display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Display text (kept short for tracker screens).
    pub message: String,
    /// Severity class.
    pub kind: NotifyKind,
    /// Wall-clock display time, HH:MM:SS.
    pub time: String,
}

impl Notification {
    /// Build a notification stamped at `at`.
    pub fn new(message: impl Into<String>, kind: NotifyKind, at: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            kind,
            time: at.format("%H:%M:%S").to_string(),
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Typed payload of an audit-log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventData {
    /// A device was seen for the first time.
    PlayerJoined { device: DeviceId },
    /// A player came online via web login.
    PlayerOnline { device: DeviceId },
    /// A tracker reconnected after being offline.
    TrackerConnected { device: DeviceId },
    /// The reconciler marked a silent player offline.
    PlayerOffline { device: DeviceId },
    /// Display name changed.
    NameChanged { device: DeviceId, old: String, new: String },
    /// Role changed (gated or forced).
    RoleChanged { device: DeviceId, from: Role, to: Role },
    /// Consent flags changed; payload is the wire badge.
    ConsentChanged { device: DeviceId, badge: String },

    /// Successful standard capture.
    Capture { predator: DeviceId, prey: DeviceId, rssi: Rssi },
    /// Successful infection-mode conversion.
    Infection { predator: DeviceId, converted: DeviceId },
    /// Captured prey returned to play.
    Escape { prey: DeviceId, beacon: Option<BeaconId> },
    /// Player entered a safe zone (beacon, or None for honor-system).
    EnterSafeZone { device: DeviceId, beacon: Option<BeaconId> },
    /// Player left a safe zone.
    LeaveSafeZone { device: DeviceId },
    /// Photo sighting recorded.
    Sighting { spotter: DeviceId, target: DeviceId, photo: String, points: u32 },

    /// Emergency raised (by a player, or None for system/admin).
    EmergencyTriggered { by: Option<DeviceId>, reason: String },
    /// Emergency cleared.
    EmergencyCleared,

    /// Countdown began.
    GameStarting { duration_mins: u32, countdown_secs: u32 },
    /// Countdown elapsed, hunt is live.
    GameRunning { duration_mins: u32 },
    /// Countdown cancelled back to lobby.
    CountdownCancelled,
    /// Running game paused.
    GamePaused,
    /// Paused game resumed.
    GameResumed,
    /// Game ended with final standings.
    GameEnded { leaderboard: Leaderboard },
    /// Everything reset to a fresh lobby.
    GameReset,
    /// Active mode changed in the lobby.
    ModeChanged { mode: ModeKey },
    /// Settings updated by an admin.
    SettingsUpdated { settings: Settings },

    /// Beacon added.
    BeaconAdded { id: BeaconId },
    /// Beacon updated.
    BeaconUpdated { id: BeaconId },
    /// Beacon removed.
    BeaconRemoved { id: BeaconId },

    /// Bounty placed on a target.
    BountySet { target: DeviceId, points: u32 },
    /// Bounty paid out to a capturer.
    BountyClaimed { target: DeviceId, by: DeviceId, points: u32 },

    /// Moderator privilege granted.
    ModeratorAdded { device: DeviceId },
    /// Moderator privilege revoked.
    ModeratorRemoved { device: DeviceId },
    /// Player removed by moderation.
    PlayerKicked { device: DeviceId },
    /// Captured player released by a moderator.
    PlayerReleased { device: DeviceId },
    /// Admin announcement pushed to everyone.
    Announcement { message: String },
}

/// One audit-log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic id, never reused within a process lifetime.
    pub id: u64,
    /// Typed payload.
    pub data: EventData,
    /// Timestamp.
    pub at: DateTime<Utc>,
    /// Wall-clock display time, HH:MM:SS.
    pub time: String,
}

/// Bounded append-only event history (ring semantics).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventLog {
    entries: VecDeque<Event>,
    next_id: u64,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, evicting the oldest past the cap.
    /// Returns a clone of the recorded event for broadcasting.
    pub fn record(&mut self, data: EventData, at: DateTime<Utc>) -> Event {
        self.next_id += 1;
        let event = Event {
            id: self.next_id,
            data,
            at,
            time: at.format("%H:%M:%S").to_string(),
        };
        self.entries.push_back(event.clone());
        while self.entries.len() > EVENT_LOG_CAP {
            self.entries.pop_front();
        }
        event
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// OUTGOING STAGING
// =============================================================================

/// Deliveries staged under the state lock, dispatched after it.
#[derive(Clone, Debug)]
pub enum Outgoing {
    /// Targeted notification for one player's push channel.
    Notify {
        /// Recipient.
        device: DeviceId,
        /// Payload (already queued on the player as well).
        notification: Notification,
    },
    /// Event every connected client observes.
    Broadcast {
        /// The recorded log entry.
        event: Event,
    },
}
