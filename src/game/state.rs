//! Game State Definitions
//!
//! All state owned by the coordinator: players, beacons, the game
//! singleton, bounties, cooldown caches, and the event log. Uses
//! BTreeMap throughout for deterministic iteration order.
//!
//! Nothing outside this crate mutates these values directly; every
//! mutation goes through the operations defined across the `game`
//! modules and is serialized by the coordinator's lock.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::{BeaconId, DeviceId};
use crate::core::rssi::{Rssi, DEFAULT_CAPTURE_RSSI, DEFAULT_SAFEZONE_RSSI};
use crate::game::error::{GameError, GameResult};
use crate::game::events::{Event, EventData, EventLog, Notification, NotifyKind, Outgoing};
use crate::game::modes::ModeKey;

/// Per-player notification ring capacity (drop-oldest).
pub const NOTIFICATION_CAP: usize = 20;

// =============================================================================
// ROLE / STATUS
// =============================================================================

/// A player's side of the hunt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Not yet picked a side.
    #[default]
    Unassigned,
    /// Hunted.
    Prey,
    /// Hunter.
    Predator,
}

impl Role {
    /// Short code used in the radio presence packet.
    ///
    /// Legacy firmware expects exactly these strings.
    pub fn wire_code(self) -> &'static str {
        match self {
            Role::Unassigned => "unknown",
            Role::Prey => "prey",
            Role::Predator => "pred",
        }
    }

    /// Parse a presence-packet role code.
    pub fn from_wire_code(code: &str) -> Option<Role> {
        match code {
            "unknown" => Some(Role::Unassigned),
            "prey" => Some(Role::Prey),
            "pred" => Some(Role::Predator),
            _ => None,
        }
    }

    /// Whether the player has picked a side.
    pub fn is_assigned(self) -> bool {
        self != Role::Unassigned
    }
}

/// A player's activity state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not heard from recently.
    #[default]
    Offline,
    /// Connected, waiting in the lobby.
    Lobby,
    /// Declared ready for the next game.
    Ready,
    /// In play.
    Active,
    /// Caught by a predator, awaiting escape or release.
    Captured,
    /// Do not disturb; present but sitting out.
    Dnd,
}

// =============================================================================
// CONSENT
// =============================================================================

/// Real-world interaction consent, broadcast to nearby players.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentFlags {
    /// Physical tagging is acceptable (off by default).
    pub physical_tag: bool,
    /// May appear in sighting photos (on by default).
    pub photo_visible: bool,
    /// Location hints may be shown to others (on by default).
    pub location_share: bool,
}

impl Default for ConsentFlags {
    fn default() -> Self {
        Self {
            physical_tag: false,
            photo_visible: true,
            location_share: true,
        }
    }
}

/// Badge emitted when every flag is at its default.
pub const BADGE_STANDARD: &str = "STD";

impl ConsentFlags {
    /// Encode the wire badge.
    ///
    /// Short codes for each non-default flag, concatenated in fixed
    /// order: `T` (touch ok), `NP` (no photos), `NL` (no location).
    /// All-default encodes as the literal `STD`. The badge never
    /// contains the packet delimiter `|`.
    pub fn badge(&self) -> String {
        let mut out = String::new();
        if self.physical_tag {
            out.push('T');
        }
        if !self.photo_visible {
            out.push_str("NP");
        }
        if !self.location_share {
            out.push_str("NL");
        }
        if out.is_empty() {
            out.push_str(BADGE_STANDARD);
        }
        out
    }

    /// Decode a wire badge. Returns None on anything unrecognized.
    pub fn from_badge(badge: &str) -> Option<ConsentFlags> {
        if badge == BADGE_STANDARD {
            return Some(ConsentFlags::default());
        }
        let mut flags = ConsentFlags::default();
        let mut rest = badge;
        if let Some(r) = rest.strip_prefix('T') {
            flags.physical_tag = true;
            rest = r;
        }
        if let Some(r) = rest.strip_prefix("NP") {
            flags.photo_visible = false;
            rest = r;
        }
        if let Some(r) = rest.strip_prefix("NL") {
            flags.location_share = false;
            rest = r;
        }
        // Leftover characters, or an empty input that stripped
        // nothing, are not valid badges.
        if rest.is_empty() && flags != ConsentFlags::default() {
            Some(flags)
        } else {
            None
        }
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// State of a single player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    /// Stable device identifier.
    pub device_id: DeviceId,

    /// Sanitized display name.
    pub name: String,

    /// Raw nickname as last submitted (pre-sanitization).
    pub nickname: String,

    /// Reference to an externally stored profile picture.
    pub profile_pic: Option<String>,

    /// Current role.
    pub role: Role,

    /// Current status.
    pub status: Status,

    /// Heard from within the online-timeout window.
    pub online: bool,

    /// Currently protected by a safe zone.
    pub in_safe_zone: bool,

    /// Beacon providing the protection (None under honor system).
    pub safe_zone_beacon: Option<BeaconId>,

    /// Team name, only meaningful under team mode.
    pub team: Option<String>,

    /// Interaction consent flags.
    pub consent: ConsentFlags,

    /// Successful captures (includes infections).
    pub captures: u32,

    /// Successful escapes.
    pub escapes: u32,

    /// Times this player was captured or converted.
    pub times_captured: u32,

    /// Photo sightings recorded.
    pub sightings: u32,

    /// Infection-mode conversions performed.
    pub infections: u32,

    /// Bounty payouts collected.
    pub bonus_points: u32,

    /// Derived score; recomputed, never authoritative.
    pub points: u32,

    /// Predator currently holding this player captive.
    pub captured_by: Option<DeviceId>,

    /// Targets this player holds a sighting photo of.
    pub photographed: BTreeSet<DeviceId>,

    /// Latest per-opponent signal readings.
    pub last_rssi: BTreeMap<DeviceId, Rssi>,

    /// Pending notifications (bounded ring, most recent kept).
    pub notifications: VecDeque<Notification>,

    /// Last contact of any kind.
    pub last_seen: DateTime<Utc>,
}

impl Player {
    /// Create a player with defaulted fields on first sight.
    pub fn new(device_id: DeviceId, at: DateTime<Utc>) -> Self {
        let name = format!("Player_{}", device_id.suffix());
        Self {
            device_id,
            name,
            nickname: String::new(),
            profile_pic: None,
            role: Role::default(),
            status: Status::default(),
            online: false,
            in_safe_zone: false,
            safe_zone_beacon: None,
            team: None,
            consent: ConsentFlags::default(),
            captures: 0,
            escapes: 0,
            times_captured: 0,
            sightings: 0,
            infections: 0,
            bonus_points: 0,
            points: 0,
            captured_by: None,
            photographed: BTreeSet::new(),
            last_rssi: BTreeMap::new(),
            notifications: VecDeque::new(),
            last_seen: at,
        }
    }

    /// Queue a notification, dropping the oldest past the cap.
    pub fn push_notification(&mut self, notification: Notification) {
        self.notifications.push_back(notification);
        while self.notifications.len() > NOTIFICATION_CAP {
            self.notifications.pop_front();
        }
    }

    /// Zero per-game fields at reset; identity, profile picture, and
    /// consent are preserved.
    pub fn reset_for_lobby(&mut self) {
        self.role = Role::Unassigned;
        self.status = if self.online { Status::Lobby } else { Status::Offline };
        self.in_safe_zone = false;
        self.safe_zone_beacon = None;
        self.team = None;
        self.captures = 0;
        self.escapes = 0;
        self.times_captured = 0;
        self.sightings = 0;
        self.infections = 0;
        self.bonus_points = 0;
        self.points = 0;
        self.captured_by = None;
        self.photographed.clear();
        self.last_rssi.clear();
    }
}

// =============================================================================
// BEACON / BOUNTY
// =============================================================================

/// A safe-zone beacon definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    /// Operator-assigned identifier.
    pub id: BeaconId,
    /// Display name.
    pub name: String,
    /// Activation threshold a reading must meet.
    pub threshold: Rssi,
    /// Whether the beacon currently grants protection.
    pub active: bool,
}

/// A bonus payable to whichever predator captures the target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounty {
    /// Bonus point value.
    pub points: u32,
    /// Operator-supplied reason.
    pub reason: String,
}

// =============================================================================
// GAME SINGLETON
// =============================================================================

/// Game lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for players and configuration.
    #[default]
    Lobby,
    /// Start requested, countdown ticking.
    Countdown,
    /// Hunt in progress.
    Running,
    /// Temporarily halted (manual or emergency).
    Paused,
    /// Over; terminal until explicit reset.
    Ended,
}

/// Operator-tunable settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Players may toggle safe-zone status manually (no beacons).
    pub honor_system: bool,
    /// Threshold a capture attempt must meet.
    pub capture_rssi: Rssi,
    /// Default threshold for new beacons.
    pub safezone_rssi: Rssi,
    /// Role change allowed mid-game from inside a safe zone.
    pub allow_role_change: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            honor_system: false,
            capture_rssi: DEFAULT_CAPTURE_RSSI,
            safezone_rssi: DEFAULT_SAFEZONE_RSSI,
            allow_role_change: true,
        }
    }
}

/// Emergency overlay on top of the phase machine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emergency {
    /// Whether an emergency is in force.
    pub active: bool,
    /// Triggering player (None for system/admin).
    pub by: Option<DeviceId>,
    /// Free-text reason.
    pub reason: String,
    /// When it was raised.
    pub at: Option<DateTime<Utc>>,
}

/// The process-wide game singleton.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Game {
    /// Current phase.
    pub phase: Phase,
    /// Active mode key (configuration looked up in the mode table).
    pub mode: ModeKey,
    /// Configured duration in minutes.
    pub duration_mins: u32,
    /// Configured countdown in seconds.
    pub countdown_secs: u32,
    /// When the hunt went running.
    pub started_at: Option<DateTime<Utc>>,
    /// Deadline the current phase counts down toward.
    pub deadline: Option<DateTime<Utc>>,
    /// Seconds left at pause time, restored on resume.
    pub paused_remaining_secs: Option<i64>,
    /// Emergency sub-state.
    pub emergency: Emergency,
    /// Operator settings.
    pub settings: Settings,
}

impl Default for Game {
    fn default() -> Self {
        let mode = ModeKey::default();
        Self {
            phase: Phase::Lobby,
            mode,
            duration_mins: mode.config().duration_mins,
            countdown_secs: 10,
            started_at: None,
            deadline: None,
            paused_remaining_secs: None,
            emergency: Emergency::default(),
            settings: Settings::default(),
        }
    }
}

impl Game {
    /// Seconds remaining in the current phase's countdown.
    ///
    /// Running and countdown derive from the deadline; paused reports
    /// the frozen remainder; lobby and ended report zero.
    pub fn time_remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        match self.phase {
            Phase::Running | Phase::Countdown => self
                .deadline
                .map(|d| (d - now).num_seconds().max(0))
                .unwrap_or(0),
            Phase::Paused => self.paused_remaining_secs.unwrap_or(0),
            Phase::Lobby | Phase::Ended => 0,
        }
    }
}

// =============================================================================
// ACTOR
// =============================================================================

/// Who is performing a gated operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Actor {
    /// The admin console.
    Admin,
    /// A logged-in device.
    Device(DeviceId),
}

impl Actor {
    /// The device behind this actor, if any.
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Actor::Admin => None,
            Actor::Device(id) => Some(id),
        }
    }
}

// =============================================================================
// TUNABLES
// =============================================================================

/// Process-level limits and windows.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HuntConfig {
    /// Player ceiling for lazy creation.
    pub max_players: usize,
    /// Minimum seconds between capture attempts per predator.
    pub capture_cooldown_secs: i64,
    /// Minimum seconds between sightings per (spotter, target) pair.
    pub sighting_cooldown_secs: i64,
    /// Silence after which a player is marked offline.
    pub offline_timeout_secs: i64,
    /// Age past which cooldown entries are pruned.
    pub cooldown_ttl_secs: i64,
}

impl Default for HuntConfig {
    fn default() -> Self {
        Self {
            max_players: 200,
            capture_cooldown_secs: 10,
            sighting_cooldown_secs: 60,
            offline_timeout_secs: 60,
            cooldown_ttl_secs: 600,
        }
    }
}

// =============================================================================
// HUNT STATE
// =============================================================================

/// Complete coordinator-owned state.
///
/// One value per process; all maps keyed by validated identifiers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HuntState {
    /// Tunables.
    pub config: HuntConfig,

    /// The game singleton.
    pub game: Game,

    /// All known players.
    pub players: BTreeMap<DeviceId, Player>,

    /// Safe-zone beacon definitions.
    pub beacons: BTreeMap<BeaconId, Beacon>,

    /// Devices holding moderator privilege.
    pub moderators: BTreeSet<DeviceId>,

    /// Open bounties keyed by target.
    pub bounties: BTreeMap<DeviceId, Bounty>,

    /// Team scores under team mode.
    pub team_scores: BTreeMap<String, u32>,

    /// Capture-attempt cooldown stamps keyed by predator.
    /// Pure TTL cache; excluded from snapshots.
    #[serde(skip)]
    pub capture_cooldowns: BTreeMap<DeviceId, DateTime<Utc>>,

    /// Sighting cooldown stamps keyed by (spotter, target).
    #[serde(skip)]
    pub sighting_cooldowns: BTreeMap<(DeviceId, DeviceId), DateTime<Utc>>,

    /// Audit history.
    pub events: EventLog,

    /// Deliveries staged for dispatch after the lock is released.
    #[serde(skip)]
    pending: Vec<Outgoing>,
}

impl HuntState {
    /// Create a fresh state.
    pub fn new(config: HuntConfig) -> Self {
        Self {
            config,
            game: Game::default(),
            players: BTreeMap::new(),
            beacons: BTreeMap::new(),
            moderators: BTreeSet::new(),
            bounties: BTreeMap::new(),
            team_scores: BTreeMap::new(),
            capture_cooldowns: BTreeMap::new(),
            sighting_cooldowns: BTreeMap::new(),
            events: EventLog::new(),
            pending: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Event / notification plumbing
    // -------------------------------------------------------------------------

    /// Record an audit event and stage it for broadcast.
    pub fn record_event(&mut self, data: EventData, at: DateTime<Utc>) -> Event {
        let event = self.events.record(data, at);
        self.pending.push(Outgoing::Broadcast { event: event.clone() });
        event
    }

    /// Queue a notification for one player and stage it for push.
    pub fn notify(
        &mut self,
        device: &DeviceId,
        message: impl Into<String>,
        kind: NotifyKind,
        at: DateTime<Utc>,
    ) {
        let notification = Notification::new(message, kind, at);
        if let Some(player) = self.players.get_mut(device) {
            player.push_notification(notification.clone());
            self.pending.push(Outgoing::Notify {
                device: device.clone(),
                notification,
            });
        }
    }

    /// Notify every known player.
    pub fn notify_all(&mut self, message: &str, kind: NotifyKind, at: DateTime<Utc>) {
        let ids: Vec<DeviceId> = self.players.keys().cloned().collect();
        for id in ids {
            self.notify(&id, message, kind, at);
        }
    }

    /// Notify every player of a given role.
    pub fn notify_role(&mut self, role: Role, message: &str, kind: NotifyKind, at: DateTime<Utc>) {
        let ids: Vec<DeviceId> = self
            .players
            .iter()
            .filter(|(_, p)| p.role == role)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.notify(&id, message, kind, at);
        }
    }

    /// Take everything staged for delivery.
    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.pending)
    }

    // -------------------------------------------------------------------------
    // Authorization helpers
    // -------------------------------------------------------------------------

    /// Whether the actor holds moderator (or admin) privilege.
    pub fn is_moderator(&self, actor: &Actor) -> bool {
        match actor {
            Actor::Admin => true,
            Actor::Device(id) => self.moderators.contains(id),
        }
    }

    /// Fail unless the actor is a moderator or the admin.
    pub fn require_moderator(&self, actor: &Actor) -> GameResult<()> {
        if self.is_moderator(actor) {
            Ok(())
        } else {
            Err(GameError::PermissionDenied("moderator".into()))
        }
    }

    /// Fail unless the actor is the admin.
    pub fn require_admin(&self, actor: &Actor) -> GameResult<()> {
        match actor {
            Actor::Admin => Ok(()),
            Actor::Device(_) => Err(GameError::PermissionDenied("admin".into())),
        }
    }

    // -------------------------------------------------------------------------
    // Counts
    // -------------------------------------------------------------------------

    /// Players declared ready with the given role.
    pub fn ready_count(&self, role: Role) -> usize {
        self.players
            .values()
            .filter(|p| p.status == Status::Ready && p.role == role)
            .count()
    }

    /// Players currently online.
    pub fn online_count(&self) -> usize {
        self.players.values().filter(|p| p.online).count()
    }

    /// Whether any player still holds the prey role.
    pub fn prey_pool_empty(&self) -> bool {
        !self.players.values().any(|p| p.role == Role::Prey)
    }
}
