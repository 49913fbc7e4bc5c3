//! Peer discovery
//!
//! A Display owns an [`Advertiser`], a Controller a [`Browser`]. Both are
//! cheap shared handles: the game may start, stop or invite through them at
//! any time while the network driver consults the same state when packets
//! arrive.

mod advertiser;
mod browser;

pub use advertiser::{Advertiser, InviteDecision};
pub use browser::Browser;
pub(crate) use browser::PendingInvite;
