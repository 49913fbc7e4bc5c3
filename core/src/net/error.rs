//! Error types surfaced by the networking layer

use racelink_shared::PeerId;

use super::codec::MalformedMessage;
use super::packet::RejectReason;

/// Failure of a single [`TransportSession::send`](super::TransportSession::send).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("no connected peers")]
    NoConnectedPeers,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("session is closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Synchronous rejection of [`Browser::invite`](super::Browser::invite).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InviteError {
    #[error("an invitation is already pending")]
    InviteAlreadyPending,
    #[error("peer {0} has not been discovered")]
    UnknownPeer(PeerId),
    #[error("browser is not running")]
    NotBrowsing,
    #[error("peer {0} is already connected")]
    AlreadyConnected(PeerId),
    #[error("command queue is full")]
    QueueFull,
}

/// Errors delivered to the game layer as events.
///
/// None of these are fatal. Peer loss is not an error and arrives as a
/// disconnect notification instead. A discovery failure has its own
/// delegate callback, and a second pending invitation is refused
/// synchronously with [`InviteError::InviteAlreadyPending`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetError {
    /// The invited Display never answered.
    #[error("invitation to {peer} timed out")]
    InviteTimeout { peer: PeerId },
    /// The invited Display declined.
    #[error("invitation to {peer} rejected: {reason}")]
    InviteRejected { peer: PeerId, reason: RejectReason },
    /// Outbound message dropped.
    #[error("send failed: {0}")]
    SendFailed(#[from] SendError),
    /// One inbound frame dropped; the stream continues.
    #[error("malformed message from {peer}: {source}")]
    MalformedMessage {
        peer: PeerId,
        #[source]
        source: MalformedMessage,
    },
}
