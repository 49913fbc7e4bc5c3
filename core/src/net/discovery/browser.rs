//! Controller-side discovery and invitations
//!
//! The browser keeps a live set of Displays that answered recent probes and
//! at most one outstanding invitation. Packet I/O is done by the network
//! driver; this type only holds state and policy, so game code can call
//! [`Browser::invite`] or [`Browser::stop`] at any time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use racelink_shared::{PeerId, PeerIdentity};

use crate::net::error::InviteError;
use crate::net::event::Command;
use crate::net::session::{PeerConnectionState, TransportSession};

/// A Display that answered a probe.
#[derive(Debug, Clone)]
struct DiscoveredPeer {
    identity: PeerIdentity,
    found_at: Instant,
    last_seen: Instant,
}

/// The one invitation allowed in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingInvite {
    pub(crate) peer: PeerId,
    pub(crate) nonce: u64,
    sent_at: Instant,
    last_sent: Instant,
}

#[derive(Debug, Default)]
struct BrowserState {
    browsing: bool,
    /// Set by `stop()`; blocks automatic re-browsing
    explicitly_stopped: bool,
    /// First probe round of this start not yet sent
    fresh_start: bool,
    /// Started again after `stop()`; the driver opens a new cycle
    restarted: bool,
    discovered: HashMap<PeerId, DiscoveredPeer>,
    pending: Option<PendingInvite>,
    /// Invitations withdrawn by `stop()`, awaiting an `InviteCancel`
    cancelled: Vec<PendingInvite>,
}

/// Shared handle to the Controller's browser.
#[derive(Clone)]
pub struct Browser {
    shared: Arc<BrowserShared>,
}

struct BrowserShared {
    service_id: String,
    session: TransportSession,
    state: Mutex<BrowserState>,
}

impl Browser {
    pub(crate) fn new(service_id: impl Into<String>, session: TransportSession) -> Self {
        Self {
            shared: Arc::new(BrowserShared {
                service_id: service_id.into(),
                session,
                state: Mutex::new(BrowserState::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrowserState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn service_id(&self) -> &str {
        &self.shared.service_id
    }

    /// Begin probing for Displays. Idempotent.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.explicitly_stopped {
            state.restarted = true;
        }
        state.explicitly_stopped = false;
        if state.browsing {
            return;
        }
        state.browsing = true;
        state.fresh_start = true;
        tracing::info!(service = %self.shared.service_id, "Browsing started");
    }

    /// Stop probing. Idempotent.
    ///
    /// Forgets discovered Displays and withdraws a pending invitation; the
    /// driver tells the invited Display. A later `start()` begins a fresh
    /// sequence of discovery events.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.explicitly_stopped = true;
        Self::halt(&mut state);
        tracing::info!(service = %self.shared.service_id, "Browsing stopped");
    }

    fn halt(state: &mut BrowserState) {
        state.browsing = false;
        state.fresh_start = false;
        state.discovered.clear();
        if let Some(pending) = state.pending.take() {
            tracing::debug!(peer = %pending.peer, "Withdrawing pending invitation");
            state.cancelled.push(pending);
        }
    }

    pub fn is_browsing(&self) -> bool {
        self.lock().browsing
    }

    /// Displays currently visible, in discovery order.
    pub fn discovered(&self) -> Vec<PeerIdentity> {
        let state = self.lock();
        let mut peers: Vec<_> = state.discovered.values().collect();
        peers.sort_by_key(|p| (p.found_at, p.identity.id()));
        peers.into_iter().map(|p| p.identity.clone()).collect()
    }

    /// Peer with an invitation in flight, if any.
    pub fn pending_invite(&self) -> Option<PeerId> {
        self.lock().pending.map(|p| p.peer)
    }

    /// Invite a discovered Display.
    ///
    /// Only one invitation may be outstanding; a second call before the
    /// first resolves fails with [`InviteError::InviteAlreadyPending`] and
    /// leaves the first untouched. The outcome arrives later as a
    /// connection event, an `InviteRejected` or an `InviteTimeout`.
    pub fn invite(&self, peer: PeerId) -> Result<(), InviteError> {
        let mut state = self.lock();
        if state.pending.is_some() {
            return Err(InviteError::InviteAlreadyPending);
        }
        if !state.browsing {
            return Err(InviteError::NotBrowsing);
        }
        if !state.discovered.contains_key(&peer) {
            return Err(InviteError::UnknownPeer(peer));
        }
        if self
            .shared
            .session
            .state_of(peer)
            .is_some_and(|s| s != PeerConnectionState::NotConnected)
        {
            return Err(InviteError::AlreadyConnected(peer));
        }

        let nonce = rand::random();
        self.shared
            .session
            .command(Command::Invite { peer, nonce })
            .map_err(|_| InviteError::QueueFull)?;

        let now = Instant::now();
        state.pending = Some(PendingInvite {
            peer,
            nonce,
            sent_at: now,
            last_sent: now,
        });
        tracing::debug!(%peer, nonce, "Invitation queued");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Driver side
    // ------------------------------------------------------------------

    /// Record an announce. Returns true for a Display not seen before.
    pub(crate) fn on_announce(&self, identity: PeerIdentity, now: Instant) -> bool {
        let mut state = self.lock();
        if !state.browsing {
            return false;
        }
        match state.discovered.get_mut(&identity.id()) {
            Some(known) => {
                known.identity = identity;
                known.last_seen = now;
                false
            }
            None => {
                state.discovered.insert(
                    identity.id(),
                    DiscoveredPeer {
                        identity,
                        found_at: now,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Forget Displays not re-announced within `expiry`.
    pub(crate) fn expire(&self, now: Instant, expiry: Duration) -> Vec<PeerIdentity> {
        let mut state = self.lock();
        let mut lost = Vec::new();
        state.discovered.retain(|_, peer| {
            let alive = now.duration_since(peer.last_seen) <= expiry;
            if !alive {
                lost.push(peer.identity.clone());
            }
            alive
        });
        lost
    }

    /// The invitation with `nonce` if it is the one still pending.
    pub(crate) fn pending_with(&self, nonce: u64) -> Option<PendingInvite> {
        self.lock().pending.filter(|p| p.nonce == nonce)
    }

    /// Resolve the pending invitation if `nonce` matches it.
    pub(crate) fn complete(&self, nonce: u64) -> Option<PeerId> {
        let mut state = self.lock();
        match state.pending {
            Some(p) if p.nonce == nonce => {
                state.pending = None;
                Some(p.peer)
            }
            _ => None,
        }
    }

    /// Accepted: stop browsing, mirroring the Display's accept-then-stop.
    pub(crate) fn finish_connect(&self) {
        let mut state = self.lock();
        Self::halt(&mut state);
    }

    /// Discovery could not start; stay stopped until the game restarts it.
    pub(crate) fn fail(&self) {
        let mut state = self.lock();
        state.explicitly_stopped = true;
        Self::halt(&mut state);
    }

    pub(crate) fn take_cancelled(&self) -> Vec<PendingInvite> {
        std::mem::take(&mut self.lock().cancelled)
    }

    /// Take the pending invitation if it has gone unanswered for `timeout`.
    pub(crate) fn take_timed_out(&self, now: Instant, timeout: Duration) -> Option<PendingInvite> {
        let mut state = self.lock();
        let expired = state
            .pending
            .is_some_and(|p| now.duration_since(p.sent_at) >= timeout);
        if expired { state.pending.take() } else { None }
    }

    /// Pending invitation due for another copy (UDP may drop the first).
    pub(crate) fn retransmit_due(&self, now: Instant, interval: Duration) -> Option<PendingInvite> {
        let mut state = self.lock();
        let pending = state.pending.as_mut()?;
        if now.duration_since(pending.last_sent) < interval {
            return None;
        }
        pending.last_sent = now;
        Some(*pending)
    }

    /// First idle Display to invite when auto-invite is on.
    pub(crate) fn auto_invite_candidate(&self) -> Option<PeerId> {
        let state = self.lock();
        if !state.browsing || state.pending.is_some() {
            return None;
        }
        state
            .discovered
            .values()
            .min_by_key(|p| (p.found_at, p.identity.id()))
            .map(|p| p.identity.id())
    }

    /// True once after a `start()` that followed a `stop()`.
    pub(crate) fn take_restart(&self) -> bool {
        std::mem::take(&mut self.lock().restarted)
    }

    /// True exactly once per `start()`, before the first probe round.
    pub(crate) fn take_fresh_start(&self) -> bool {
        std::mem::take(&mut self.lock().fresh_start)
    }

    /// Browse again after peer loss, unless the game stopped on purpose.
    pub(crate) fn resume_after_loss(&self) -> bool {
        let mut state = self.lock();
        if !state.explicitly_stopped && !state.browsing {
            state.browsing = true;
            tracing::info!(service = %self.shared.service_id, "Browsing resumed");
        }
        state.browsing
    }
}
