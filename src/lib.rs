//! # Hunts Server
//!
//! Authoritative coordinator for a live, location-aware predator vs
//! prey game. Tracker devices and web dashboards report RSSI
//! readings; this process derives game state (roles, captures,
//! escapes, safe zones, emergencies, scoring) and fans out
//! notifications in real time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HUNTS SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Shared primitives                        │
//! │  ├── ids.rs       - Validated device/beacon identifiers      │
//! │  └── rssi.rs      - Signal-strength conventions              │
//! │                                                              │
//! │  game/            - Pure game logic (clock injected)         │
//! │  ├── state.rs     - Players, beacons, the game singleton     │
//! │  ├── registry.rs  - Player lifecycle and gated updates       │
//! │  ├── beacons.rs   - Safe-zone beacon CRUD                    │
//! │  ├── proximity.rs - RSSI reports -> safe-zone transitions    │
//! │  ├── capture.rs   - Capture/escape/infection machine         │
//! │  ├── emergency.rs - Global pause overlay                     │
//! │  ├── phase.rs     - lobby/countdown/running/paused/ended     │
//! │  ├── scoring.rs   - Derived points and leaderboards          │
//! │  ├── modes.rs     - Named mode configuration table           │
//! │  ├── events.rs    - Audit log + notification queues          │
//! │  └── error.rs     - Rejection taxonomy                       │
//! │                                                              │
//! │  coordinator/     - Shared-state facade (async edge)         │
//! │  ├── mod.rs       - Lock discipline, boundary operations     │
//! │  ├── reconciler.rs- Periodic sweep (timeouts, auto-end)      │
//! │  ├── snapshot.rs  - Best-effort persistence                  │
//! │  └── stats.rs     - Event-bus statistics observer            │
//! │                                                              │
//! │  network/         - Wire contracts and push delivery         │
//! │  ├── protocol.rs  - Poll response, presence packet, frames   │
//! │  └── push.rs      - WebSocket fan-out by device id           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! One coarse `RwLock` over [`game::state::HuntState`] serializes all
//! mutation, giving each player a strict total order of changes. No
//! I/O runs inside a critical section: mutations stage deliveries,
//! and the coordinator dispatches them after releasing the lock.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod coordinator;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::coordinator::Coordinator;
pub use crate::core::ids::{BeaconId, DeviceId};
pub use crate::core::rssi::Rssi;
pub use crate::game::error::{GameError, GameResult};
pub use crate::game::state::{HuntConfig, HuntState, Phase, Player, Role, Status};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
