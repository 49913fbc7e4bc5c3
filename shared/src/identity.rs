//! Peer identity: an opaque per-process token plus a human-readable name.
//!
//! Identities are created once at startup and never persisted, so every
//! launch is a new participant. Equality and hashing use only the id; two
//! devices may well share a display name.

use std::fmt;
use std::hash::{Hash, Hasher};

use bitcode::{Decode, Encode};

use crate::constants::MAX_DISPLAY_NAME_LEN;

/// Opaque, stable identifier for one participant process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct PeerId(u64);

impl PeerId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Wrap a raw value (tests and diagnostics).
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Immutable identifier and display name of a participant.
#[derive(Debug, Clone, Encode, Decode)]
pub struct PeerIdentity {
    id: PeerId,
    display_name: String,
}

impl PeerIdentity {
    /// Create a new identity with a random id.
    ///
    /// Names longer than [`MAX_DISPLAY_NAME_LEN`] bytes are truncated at a
    /// character boundary.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self::with_id(PeerId::random(), display_name)
    }

    /// Create an identity with a known id.
    pub fn with_id(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: truncate_display_name(display_name.into()),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Truncate a display name to [`MAX_DISPLAY_NAME_LEN`] bytes without
/// splitting a UTF-8 sequence.
pub fn truncate_display_name(mut name: String) -> String {
    if name.len() > MAX_DISPLAY_NAME_LEN {
        let mut end = MAX_DISPLAY_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}
