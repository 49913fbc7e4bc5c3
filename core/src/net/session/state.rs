//! Per-peer connection state

use std::fmt;

/// Connection state of one remote peer within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerConnectionState {
    /// Seen but not linked
    #[default]
    NotConnected,
    /// Invitation in flight
    Connecting,
    /// Link established
    Connected,
}

impl PeerConnectionState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// A lost peer goes back to `NotConnected` and must be invited again;
    /// `Connected -> Connecting` never happens.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotConnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::NotConnected)
                | (Self::Connected, Self::NotConnected)
        )
    }

    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotConnected => "not connected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}
