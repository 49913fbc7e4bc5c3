//! Shared types for racelink.
//!
//! Leaf value types used by both the networking core and the tools:
//! participant identity, role, and the protocol constants both roles must
//! agree on.

pub mod constants;
pub mod identity;
pub mod role;

pub use constants::{
    DEFAULT_DISCOVERY_PORT, DEFAULT_SERVICE_ID, MAX_DISPLAY_NAME_LEN, MAX_SERVICE_ID_LEN,
    is_valid_service_id,
};
pub use identity::{PeerId, PeerIdentity, truncate_display_name};
pub use role::Role;
