//! Player Registry
//!
//! Lazy creation, lookups, authorized partial updates, and the
//! moderation kick cascade. Every create, name change, role change,
//! and status change lands in the event log.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::ids::DeviceId;
use crate::game::error::{GameError, GameResult};
use crate::game::events::{EventData, NotifyKind};
use crate::game::state::{Actor, HuntState, Phase, Player, Role, Status};

/// Longest display name kept after sanitization.
pub const MAX_NAME_LEN: usize = 24;

/// Sanitize a submitted nickname.
///
/// Trim, strip to `[A-Za-z0-9 _-]`, clamp to [`MAX_NAME_LEN`]; a
/// degenerate result falls back to a name derived from the device id.
pub fn sanitize_name(raw: &str, device: &DeviceId) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        format!("Player_{}", device.suffix())
    } else {
        cleaned
    }
}

/// Partial player update from a client or moderator.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PlayerUpdate {
    /// New nickname (sanitized before storage).
    pub nickname: Option<String>,
    /// New role; Prey/Predator only, subject to the role gate.
    pub role: Option<Role>,
    /// New status; Ready/Lobby/Dnd only.
    pub status: Option<Status>,
    /// Honor-system safe-zone toggle.
    pub in_safe_zone: Option<bool>,
    /// Consent flag changes.
    pub consent: Option<ConsentUpdate>,
    /// Reference to an externally stored profile picture.
    pub profile_pic: Option<String>,
}

/// Partial consent update.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct ConsentUpdate {
    /// Physical tagging acceptable.
    pub physical_tag: Option<bool>,
    /// May appear in sighting photos.
    pub photo_visible: Option<bool>,
    /// Location hints may be shown.
    pub location_share: Option<bool>,
}

impl HuntState {
    /// Fetch a player, creating one with defaulted fields on first
    /// sight. Fails past the configured player ceiling.
    pub fn get_or_create(&mut self, id: &DeviceId, now: DateTime<Utc>) -> GameResult<&mut Player> {
        if !self.players.contains_key(id) {
            if self.players.len() >= self.config.max_players {
                return Err(GameError::CapacityExceeded);
            }
            self.players.insert(id.clone(), Player::new(id.clone(), now));
            self.record_event(EventData::PlayerJoined { device: id.clone() }, now);
        }
        self.players
            .get_mut(id)
            .ok_or_else(|| GameError::unknown_device(id))
    }

    /// Look up a player.
    pub fn get_player(&self, id: &DeviceId) -> Option<&Player> {
        self.players.get(id)
    }

    /// Web login: mark online, lift out of offline status.
    pub fn login(&mut self, id: &DeviceId, now: DateTime<Utc>) -> GameResult<Player> {
        let player = self.get_or_create(id, now)?;
        let was_offline = !player.online;
        player.online = true;
        player.last_seen = now;
        if player.status == Status::Offline {
            player.status = Status::Lobby;
        }
        let snapshot = player.clone();
        if was_offline {
            self.record_event(EventData::PlayerOnline { device: id.clone() }, now);
        }
        Ok(snapshot)
    }

    /// Explicit logout: mark offline without touching stats.
    pub fn logout(&mut self, id: &DeviceId) {
        if let Some(player) = self.players.get_mut(id) {
            player.online = false;
        }
    }

    /// Tracker contact: refresh liveness, lift out of offline status.
    pub fn touch_tracker(&mut self, id: &DeviceId, now: DateTime<Utc>) -> GameResult<()> {
        let player = self.get_or_create(id, now)?;
        player.online = true;
        player.last_seen = now;
        if player.status == Status::Offline {
            player.status = Status::Lobby;
            self.record_event(EventData::TrackerConnected { device: id.clone() }, now);
        }
        Ok(())
    }

    /// Apply a partial update, enforcing per-field authorization.
    ///
    /// The caller (HTTP layer) guarantees `device` matches the session
    /// unless `actor` is a moderator acting on someone else.
    pub fn update_player(
        &mut self,
        actor: &Actor,
        device: &DeviceId,
        update: PlayerUpdate,
        now: DateTime<Utc>,
    ) -> GameResult<Player> {
        if !self.players.contains_key(device) {
            return Err(GameError::unknown_device(device));
        }

        if let Some(nickname) = update.nickname {
            self.apply_nickname(device, nickname, now)?;
        }
        if let Some(role) = update.role {
            self.apply_role_change(actor, device, role, now)?;
        }
        if let Some(status) = update.status {
            let settable = matches!(status, Status::Ready | Status::Lobby | Status::Dnd);
            if !settable {
                return Err(GameError::rejected("status not settable"));
            }
            if let Some(player) = self.players.get_mut(device) {
                player.status = status;
            }
        }
        if let Some(manual_safe) = update.in_safe_zone {
            self.apply_manual_safe_zone(device, manual_safe, now)?;
        }
        if let Some(consent) = update.consent {
            self.apply_consent(device, consent, now);
        }
        if let Some(pic) = update.profile_pic {
            if let Some(player) = self.players.get_mut(device) {
                player.profile_pic = Some(pic);
            }
        }

        if let Some(player) = self.players.get_mut(device) {
            player.last_seen = now;
        }
        self.players
            .get(device)
            .cloned()
            .ok_or_else(|| GameError::unknown_device(device))
    }

    fn apply_nickname(&mut self, device: &DeviceId, raw: String, now: DateTime<Utc>) -> GameResult<()> {
        let Some(player) = self.players.get_mut(device) else {
            return Err(GameError::unknown_device(device));
        };
        let new_name = sanitize_name(&raw, device);
        player.nickname = raw;
        if player.name != new_name {
            let old = std::mem::replace(&mut player.name, new_name.clone());
            self.record_event(
                EventData::NameChanged { device: device.clone(), old, new: new_name },
                now,
            );
        }
        Ok(())
    }

    /// Role gate: lobby phase, OR a safe zone with the setting on,
    /// OR a moderator/admin actor.
    fn apply_role_change(
        &mut self,
        actor: &Actor,
        device: &DeviceId,
        role: Role,
        now: DateTime<Utc>,
    ) -> GameResult<()> {
        if !role.is_assigned() {
            return Err(GameError::rejected("pick prey or pred"));
        }
        let Some(player) = self.players.get(device) else {
            return Err(GameError::unknown_device(device));
        };
        let allowed = self.game.phase == Phase::Lobby
            || (self.game.settings.allow_role_change && player.in_safe_zone)
            || self.is_moderator(actor);
        if !allowed {
            return Err(GameError::rejected("safe zone required"));
        }
        self.set_role(device, role, now)
    }

    /// Unconditional role change for moderators.
    pub fn force_role(
        &mut self,
        actor: &Actor,
        device: &DeviceId,
        role: Role,
        now: DateTime<Utc>,
    ) -> GameResult<()> {
        self.require_moderator(actor)?;
        if !self.players.contains_key(device) {
            return Err(GameError::unknown_device(device));
        }
        self.set_role(device, role, now)
    }

    fn set_role(&mut self, device: &DeviceId, role: Role, now: DateTime<Utc>) -> GameResult<()> {
        let Some(player) = self.players.get_mut(device) else {
            return Err(GameError::unknown_device(device));
        };
        let from = player.role;
        if from != role {
            player.role = role;
            self.record_event(
                EventData::RoleChanged { device: device.clone(), from, to: role },
                now,
            );
        }
        Ok(())
    }

    /// Honor-system toggle; only honored when the setting is on.
    fn apply_manual_safe_zone(
        &mut self,
        device: &DeviceId,
        manual_safe: bool,
        now: DateTime<Utc>,
    ) -> GameResult<()> {
        if !self.game.settings.honor_system {
            return Err(GameError::rejected("honor system off"));
        }
        let Some(player) = self.players.get_mut(device) else {
            return Err(GameError::unknown_device(device));
        };
        let was_safe = player.in_safe_zone;
        if manual_safe && !was_safe {
            player.in_safe_zone = true;
            player.safe_zone_beacon = None;
            let was_captured = player.status == Status::Captured;
            self.record_event(
                EventData::EnterSafeZone { device: device.clone(), beacon: None },
                now,
            );
            if was_captured {
                self.process_escape(device, None, now);
            }
        } else if !manual_safe && was_safe {
            player.in_safe_zone = false;
            player.safe_zone_beacon = None;
            self.record_event(EventData::LeaveSafeZone { device: device.clone() }, now);
        }
        Ok(())
    }

    fn apply_consent(&mut self, device: &DeviceId, update: ConsentUpdate, now: DateTime<Utc>) {
        let Some(player) = self.players.get_mut(device) else {
            return;
        };
        if let Some(v) = update.physical_tag {
            player.consent.physical_tag = v;
        }
        if let Some(v) = update.photo_visible {
            player.consent.photo_visible = v;
        }
        if let Some(v) = update.location_share {
            player.consent.location_share = v;
        }
        let badge = player.consent.badge();
        self.record_event(EventData::ConsentChanged { device: device.clone(), badge }, now);
    }

    /// Moderation kick: remove the player and cascade through every
    /// structure keyed by or referencing the device.
    pub fn kick_player(&mut self, actor: &Actor, device: &DeviceId, now: DateTime<Utc>) -> GameResult<()> {
        self.require_moderator(actor)?;
        if self.players.remove(device).is_none() {
            return Err(GameError::unknown_device(device));
        }
        self.moderators.remove(device);
        self.bounties.remove(device);
        self.capture_cooldowns.remove(device);
        self.sighting_cooldowns
            .retain(|(spotter, target), _| spotter != device && target != device);
        for player in self.players.values_mut() {
            player.last_rssi.remove(device);
            player.photographed.remove(device);
            if player.captured_by.as_ref() == Some(device) {
                player.captured_by = None;
            }
        }
        self.record_event(EventData::PlayerKicked { device: device.clone() }, now);
        Ok(())
    }

    /// Moderator release of a captured player (no escape credit).
    pub fn release_captured(&mut self, actor: &Actor, device: &DeviceId, now: DateTime<Utc>) -> GameResult<()> {
        self.require_moderator(actor)?;
        let Some(player) = self.players.get_mut(device) else {
            return Err(GameError::unknown_device(device));
        };
        if player.status != Status::Captured {
            return Err(GameError::rejected("not captured"));
        }
        player.status = Status::Active;
        player.captured_by = None;
        self.record_event(EventData::PlayerReleased { device: device.clone() }, now);
        self.notify(device, "Moderator released you!", NotifyKind::Success, now);
        Ok(())
    }

    /// Grant moderator privilege.
    pub fn add_moderator(&mut self, actor: &Actor, device: &DeviceId, now: DateTime<Utc>) -> GameResult<()> {
        self.require_admin(actor)?;
        if !self.players.contains_key(device) {
            return Err(GameError::unknown_device(device));
        }
        if self.moderators.insert(device.clone()) {
            self.record_event(EventData::ModeratorAdded { device: device.clone() }, now);
            self.notify(device, "You are now a moderator!", NotifyKind::Success, now);
        }
        Ok(())
    }

    /// Revoke moderator privilege.
    pub fn remove_moderator(&mut self, actor: &Actor, device: &DeviceId, now: DateTime<Utc>) -> GameResult<()> {
        self.require_admin(actor)?;
        if self.moderators.remove(device) {
            self.record_event(EventData::ModeratorRemoved { device: device.clone() }, now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::HuntConfig;
    use proptest::prelude::*;

    fn dev(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    fn state() -> HuntState {
        HuntState::new(HuntConfig::default())
    }

    #[test]
    fn test_lazy_creation_and_capacity() {
        let mut s = HuntState::new(HuntConfig { max_players: 2, ..HuntConfig::default() });
        let now = Utc::now();
        s.get_or_create(&dev("T0001"), now).unwrap();
        s.get_or_create(&dev("T0002"), now).unwrap();
        // Existing players still resolve at the ceiling.
        s.get_or_create(&dev("T0001"), now).unwrap();
        assert_eq!(
            s.get_or_create(&dev("T0003"), now).unwrap_err(),
            GameError::CapacityExceeded
        );
    }

    #[test]
    fn test_sanitize_name() {
        let id = dev("T9EF0");
        assert_eq!(sanitize_name("  Wolf Pack_7  ", &id), "Wolf Pack_7");
        assert_eq!(sanitize_name("<script>!", &id), "script");
        assert_eq!(sanitize_name("💀💀💀", &id), "Player_9EF0");
        assert_eq!(sanitize_name("", &id), "Player_9EF0");
        let long = "x".repeat(100);
        assert_eq!(sanitize_name(&long, &id).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_role_gate_in_lobby() {
        let mut s = state();
        let now = Utc::now();
        let id = dev("T0001");
        s.get_or_create(&id, now).unwrap();

        let update = PlayerUpdate { role: Some(Role::Prey), ..PlayerUpdate::default() };
        let player = s
            .update_player(&Actor::Device(id.clone()), &id, update, now)
            .unwrap();
        assert_eq!(player.role, Role::Prey);
    }

    #[test]
    fn test_role_gate_rejects_in_field() {
        let mut s = state();
        let now = Utc::now();
        let id = dev("T0001");
        s.get_or_create(&id, now).unwrap();
        s.game.phase = Phase::Running;

        let update = PlayerUpdate { role: Some(Role::Predator), ..PlayerUpdate::default() };
        let err = s
            .update_player(&Actor::Device(id.clone()), &id, update, now)
            .unwrap_err();
        assert!(matches!(err, GameError::PreconditionFailed(_)));

        // A moderator bypasses the gate.
        s.force_role(&Actor::Admin, &id, Role::Predator, now).unwrap();
        assert_eq!(s.players[&id].role, Role::Predator);
    }

    #[test]
    fn test_name_change_emits_event() {
        let mut s = state();
        let now = Utc::now();
        let id = dev("T0001");
        s.get_or_create(&id, now).unwrap();
        s.take_outgoing();

        let update = PlayerUpdate { nickname: Some("Ghost".into()), ..PlayerUpdate::default() };
        s.update_player(&Actor::Device(id.clone()), &id, update, now).unwrap();

        let out = s.take_outgoing();
        assert!(out.iter().any(|o| matches!(
            o,
            crate::game::events::Outgoing::Broadcast { event }
                if matches!(&event.data, EventData::NameChanged { new, .. } if new == "Ghost")
        )));
    }

    #[test]
    fn test_kick_cascades() {
        let mut s = state();
        let now = Utc::now();
        let a = dev("T000A");
        let b = dev("T000B");
        s.get_or_create(&a, now).unwrap();
        s.get_or_create(&b, now).unwrap();

        s.moderators.insert(b.clone());
        s.bounties.insert(b.clone(), crate::game::state::Bounty { points: 50, reason: String::new() });
        s.capture_cooldowns.insert(b.clone(), now);
        s.sighting_cooldowns.insert((a.clone(), b.clone()), now);
        if let Some(p) = s.players.get_mut(&a) {
            p.last_rssi.insert(b.clone(), -60);
            p.photographed.insert(b.clone());
            p.captured_by = Some(b.clone());
        }

        s.kick_player(&Actor::Admin, &b, now).unwrap();

        assert!(!s.players.contains_key(&b));
        assert!(!s.moderators.contains(&b));
        assert!(s.bounties.is_empty());
        assert!(s.capture_cooldowns.is_empty());
        assert!(s.sighting_cooldowns.is_empty());
        let a_ref = &s.players[&a];
        assert!(a_ref.last_rssi.is_empty());
        assert!(a_ref.photographed.is_empty());
        assert!(a_ref.captured_by.is_none());
    }

    #[test]
    fn test_kick_requires_moderator() {
        let mut s = state();
        let now = Utc::now();
        let a = dev("T000A");
        let b = dev("T000B");
        s.get_or_create(&a, now).unwrap();
        s.get_or_create(&b, now).unwrap();

        let err = s.kick_player(&Actor::Device(a), &b, now).unwrap_err();
        assert!(matches!(err, GameError::PermissionDenied(_)));
    }

    proptest! {
        #[test]
        fn prop_sanitized_name_never_empty(raw in ".*") {
            let id = DeviceId::parse("T9EF0").unwrap();
            let name = sanitize_name(&raw, &id);
            prop_assert!(!name.is_empty());
            prop_assert!(name.len() <= MAX_NAME_LEN);
            prop_assert!(name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-')));
        }
    }
}
