//! Error Taxonomy
//!
//! Every rejection is an explicit `Err` value carried back to the
//! caller; the coordinator never aborts on a bad request. Messages
//! stay short enough for a 21-character tracker display line.

/// Result alias for game operations.
pub type GameResult<T> = Result<T, GameError>;

/// Rejection categories for coordinator operations.
///
/// The HTTP collaborator maps these onto status codes and renders the
/// `Display` text; nothing here crosses a wire directly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Unknown device, beacon, or target.
    #[error("not found: {0}")]
    NotFound(String),

    /// Wrong phase for the requested action.
    #[error("{0}")]
    InvalidState(String),

    /// Actor lacks the required admin/moderator privilege.
    #[error("requires {0}")]
    PermissionDenied(String),

    /// A business rule rejected the action (too far, cooldown, ...).
    #[error("{0}")]
    PreconditionFailed(String),

    /// Player ceiling reached.
    #[error("player limit reached")]
    CapacityExceeded,

    /// Action is blocked while an emergency is active.
    #[error("emergency active")]
    EmergencyBlocked,
}

impl GameError {
    /// Not-found error for a device id.
    pub fn unknown_device(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("player {id}"))
    }

    /// Not-found error for a beacon id.
    pub fn unknown_beacon(id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("beacon {id}"))
    }

    /// Precondition failure with a display-ready reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_stay_short() {
        // Tracker displays truncate past 21 characters.
        for err in [
            GameError::CapacityExceeded,
            GameError::EmergencyBlocked,
            GameError::rejected("already captured"),
            GameError::rejected("capture cooldown"),
        ] {
            assert!(err.to_string().len() <= 21, "too long: {err}");
        }
    }
}
