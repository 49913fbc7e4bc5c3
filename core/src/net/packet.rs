//! Transport packets
//!
//! Everything that crosses the UDP socket is a [`Packet`]. Discovery,
//! invitations, liveness and game data all share one envelope; codec frames
//! ride inside [`Packet::Data`].
//!
//! # Wire Format
//!
//! ```text
//! [RCLK][version:u16][length:u32][bitcode payload...]
//! ```

use bitcode::{Decode, Encode};
use racelink_shared::PeerIdentity;

/// Packet magic bytes
pub const PACKET_MAGIC: [u8; 4] = *b"RCLK";

/// Current transport protocol version
pub const PACKET_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + length (4)
pub const PACKET_HEADER_SIZE: usize = 10;

/// Why a Display turned an invitation down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum RejectReason {
    /// Advertising is stopped
    NotAdvertising,
    /// Invitation named a different service
    ServiceMismatch,
    /// All controller slots are taken
    Full,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAdvertising => write!(f, "not advertising"),
            Self::ServiceMismatch => write!(f, "service mismatch"),
            Self::Full => write!(f, "no free controller slot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Packet {
    // Controller -> Display
    /// Looking for Displays advertising `service_id`
    Probe { service_id: String, from: PeerIdentity },
    /// Connection invitation
    Invite {
        service_id: String,
        identity: PeerIdentity,
        nonce: u64,
    },
    /// Invitation withdrawn before an answer arrived
    InviteCancel { nonce: u64 },

    // Display -> Controller
    /// Answer to a matching probe
    Announce {
        service_id: String,
        identity: PeerIdentity,
    },
    /// Invitation accepted; the sender is now connected
    InviteAccept { identity: PeerIdentity, nonce: u64 },
    /// Invitation declined
    InviteReject { nonce: u64, reason: RejectReason },

    // Connected peers, either direction
    /// One codec frame
    Data(Vec<u8>),
    /// Keepalive ping
    Ping,
    /// Keepalive pong
    Pong,
    /// Sender is leaving the session
    Goodbye,
}

impl Packet {
    /// Serialize with envelope framing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = bitcode::encode(self);
        let mut bytes = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());

        bytes.extend_from_slice(&PACKET_MAGIC);
        bytes.extend_from_slice(&PACKET_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);

        bytes
    }

    /// Deserialize, validating magic, version and length before decoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketDecodeError> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(PacketDecodeError::TooShort);
        }

        if bytes[0..4] != PACKET_MAGIC {
            return Err(PacketDecodeError::InvalidMagic);
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != PACKET_VERSION {
            return Err(PacketDecodeError::VersionMismatch {
                expected: PACKET_VERSION,
                got: version,
            });
        }

        let length = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let available = bytes.len() - PACKET_HEADER_SIZE;
        if available < length {
            return Err(PacketDecodeError::IncompletePayload {
                expected: length,
                got: available,
            });
        }

        let payload = &bytes[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + length];
        bitcode::decode(payload).map_err(|e| PacketDecodeError::DecodeFailed(e.to_string()))
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Probe { .. } => "probe",
            Self::Invite { .. } => "invite",
            Self::InviteCancel { .. } => "invite-cancel",
            Self::Announce { .. } => "announce",
            Self::InviteAccept { .. } => "invite-accept",
            Self::InviteReject { .. } => "invite-reject",
            Self::Data(_) => "data",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Goodbye => "goodbye",
        }
    }
}

/// Errors from decoding a datagram into a [`Packet`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PacketDecodeError {
    #[error("packet too short")]
    TooShort,
    #[error("invalid packet magic")]
    InvalidMagic,
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u16, got: u16 },
    #[error("incomplete payload: expected {expected} bytes, got {got}")]
    IncompletePayload { expected: usize, got: usize },
    #[error("payload decode failed: {0}")]
    DecodeFailed(String),
}
