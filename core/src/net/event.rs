//! Messages between the game thread and the network driver

use racelink_shared::{PeerId, PeerIdentity};

use super::error::NetError;
use super::session::{PeerConnectionState, SendTarget};

/// Raw events produced by the driver, in the order it observed them.
///
/// Within one peer, `Received` buffers keep arrival order. Nothing is
/// promised across peers, and a final `Received` may trail the
/// disconnect of its sender.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A peer's connection state moved along a legal transition
    StateChanged {
        peer: PeerIdentity,
        from: PeerConnectionState,
        to: PeerConnectionState,
    },
    /// One codec frame from a connected peer
    Received { peer: PeerIdentity, bytes: Vec<u8> },
    /// Browser saw a new Display
    PeerFound(PeerIdentity),
    /// A discovered Display stopped answering probes
    PeerLost(PeerIdentity),
    /// Advertising or browsing could not start
    DiscoveryFailed(String),
    /// Non-fatal failure worth telling the game about
    Error(NetError),
}

/// Requests from the game thread, executed by the driver.
#[derive(Debug)]
pub(crate) enum Command {
    /// Send one codec frame
    Data { target: SendTarget, bytes: Vec<u8> },
    /// Send the first copy of an invitation the Browser just registered
    Invite { peer: PeerId, nonce: u64 },
}
