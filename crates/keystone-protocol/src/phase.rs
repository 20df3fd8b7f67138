//! Session phases: the coarse protocol stage a connection is in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The protocol stage of a session.
///
/// Phases are ordered and only ever move forward during a connection's
/// lifetime:
///
/// ```text
/// Handshake → Login → SelectCharacter → Loading → InGame
///     └──────→ Auth   (authentication server only)
/// ```
///
/// The derived `Ord` follows the wire values. It is not the transition
/// rule on its own, since `Auth` sorts last but is a side branch; use
/// [`Phase::can_advance_to`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Handshake = 1,
    Login = 2,
    SelectCharacter = 3,
    Loading = 4,
    InGame = 5,
    /// Terminal side phase of the authentication server.
    Auth = 10,
}

impl Phase {
    /// Returns the wire value of this phase.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` if a session in `self` may move to `to`.
    ///
    /// Staying put is always allowed. `Handshake` may go anywhere.
    /// `Auth` is only reachable from `Handshake` and leads nowhere.
    /// Everything else moves forward along the main line.
    pub fn can_advance_to(self, to: Phase) -> bool {
        match (self, to) {
            (from, to) if from == to => true,
            (Self::Handshake, _) => true,
            (Self::Auth, _) | (_, Self::Auth) => false,
            (from, to) => from < to,
        }
    }

    /// Parses a wire value. Returns `None` for unassigned values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Handshake),
            2 => Some(Self::Login),
            3 => Some(Self::SelectCharacter),
            4 => Some(Self::Loading),
            5 => Some(Self::InGame),
            10 => Some(Self::Auth),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Handshake => "HANDSHAKE",
            Self::Login => "LOGIN",
            Self::SelectCharacter => "SELECT_CHARACTER",
            Self::Loading => "LOADING",
            Self::InGame => "IN_GAME",
            Self::Auth => "AUTH",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_round_trips_every_phase() {
        for phase in [
            Phase::Handshake,
            Phase::Login,
            Phase::SelectCharacter,
            Phase::Loading,
            Phase::InGame,
            Phase::Auth,
        ] {
            assert_eq!(Phase::from_u8(phase.as_u8()), Some(phase));
        }
        assert_eq!(Phase::from_u8(0), None);
        assert_eq!(Phase::from_u8(6), None);
    }

    #[test]
    fn test_can_advance_to_main_line_moves_forward_only() {
        assert!(Phase::Handshake.can_advance_to(Phase::Login));
        assert!(Phase::Login.can_advance_to(Phase::InGame));
        assert!(Phase::InGame.can_advance_to(Phase::InGame));
        assert!(!Phase::InGame.can_advance_to(Phase::Loading));
        assert!(!Phase::Login.can_advance_to(Phase::Handshake));
    }

    #[test]
    fn test_can_advance_to_auth_only_from_handshake() {
        assert!(Phase::Handshake.can_advance_to(Phase::Auth));
        assert!(Phase::Auth.can_advance_to(Phase::Auth));
        for phase in [Phase::Login, Phase::SelectCharacter, Phase::Loading, Phase::InGame] {
            assert!(!phase.can_advance_to(Phase::Auth), "{phase} -> AUTH");
            assert!(!Phase::Auth.can_advance_to(phase), "AUTH -> {phase}");
        }
    }

    #[test]
    fn test_ordering_follows_wire_values() {
        assert!(Phase::Handshake < Phase::Login);
        assert!(Phase::InGame < Phase::Auth);
        assert_eq!(Phase::Auth.as_u8(), 10);
    }
}
