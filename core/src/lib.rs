//! Racelink Core - Local race networking
//!
//! Lets one device run a race (the Display) while another acts as its
//! controller, discovering each other on the local network without any
//! server.
//!
//! # Architecture
//!
//! - [`NetworkService`] - What the game holds: one per scene, per role
//! - [`NetworkDelegate`] - Callbacks the game implements
//! - [`TransportSession`] - Peer table and fail-fast sending
//! - [`Message`] - Wire codec for game messages
//! - [`NetConfig`] - Timers, ports and limits (`racelink.toml`)

pub mod config;
pub mod net;
#[cfg(test)]
pub mod test_utils;

pub use config::{ConfigError, NetConfig};
pub use net::{
    Advertiser, Browser, InviteError, Message, NetError, NetEvent, NetworkDelegate,
    NetworkService, PeerConnectionState, RaceCommand, SendError, SendTarget, ServiceStatus,
    StartError, TransportSession,
};

// Identity and role live in the shared crate
pub use racelink_shared::{PeerId, PeerIdentity, Role};
