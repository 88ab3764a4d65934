//! Core primitives shared by every component: validated identifiers
//! and signal-strength arithmetic.

pub mod ids;
pub mod rssi;
