//! Local peer-to-peer networking for a split-screen race
//!
//! A Display (the screen running the race) advertises itself; a Controller
//! (the phone used as a joystick) browses, invites the Display, and once
//! accepted the two exchange small codec frames over UDP.
//!
//! - [`codec`] - Binary game messages (`ControlInput`, `RaceState`, ...)
//! - [`session`] - Peer table and per-peer connection state
//! - [`discovery`] - Advertiser (Display) and Browser (Controller)
//! - [`service`] - Role-bound facade and the delegate callbacks
//!
//! # Protocol
//!
//! ```text
//!   Controller                         Display
//!       │ ── Probe{service, id} ───────▶ │   (every probe interval)
//!       │ ◀──────── Announce{service, id}│   (only while advertising)
//!       │                                │
//!       │ ── Invite{service, id, nonce} ▶│   (retransmitted until answered)
//!       │ ◀────── InviteAccept{id, nonce}│   or InviteReject{nonce, reason}
//!       │                                │
//!       │ ◀──────── Data(Handshake) ───▶ │   (names bound, never surfaced)
//!       │ ◀──────────── Data ──────────▶ │
//!       │ ◀──────── Ping / Pong ───────▶ │   (keepalive)
//!       │ ── Goodbye ──────────────────▶ │   (either side, on stop)
//! ```

pub mod codec;
pub mod discovery;
pub mod error;
pub mod event;
pub mod packet;
pub mod service;
pub mod session;
pub mod socket;

pub use codec::{MalformedMessage, Message, RaceCommand};
pub use discovery::{Advertiser, Browser, InviteDecision};
pub use error::{InviteError, NetError, SendError};
pub use event::TransportEvent;
pub use packet::{Packet, PacketDecodeError, RejectReason};
pub use service::{NetEvent, NetworkDelegate, NetworkService, ServiceStatus, StartError};
pub use session::{PeerConnectionState, PeerSnapshot, SendTarget, TransportSession};
pub use socket::{RaceSocket, SocketError};
