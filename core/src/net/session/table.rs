//! Peer table backing a [`TransportSession`](super::TransportSession)

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use racelink_shared::{PeerId, PeerIdentity};

use super::{PeerConnectionState, PeerSnapshot, SendTarget};

/// Refused state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(crate) enum TransitionError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("illegal transition for {peer}: {from} -> {to}")]
    Illegal {
        peer: PeerId,
        from: PeerConnectionState,
        to: PeerConnectionState,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct PeerEntry {
    pub(crate) identity: PeerIdentity,
    pub(crate) addr: SocketAddr,
    pub(crate) state: PeerConnectionState,
    /// Last packet from this peer (for timeout detection)
    pub(crate) last_seen: Instant,
}

/// Every peer seen in the current discovery cycle.
#[derive(Debug, Default)]
pub(crate) struct PeerTable {
    cycle: u64,
    peers: HashMap<PeerId, PeerEntry>,
    addr_to_peer: HashMap<SocketAddr, PeerId>,
}

impl PeerTable {
    pub(crate) fn cycle(&self) -> u64 {
        self.cycle
    }

    pub(crate) fn get(&self, peer: PeerId) -> Option<&PeerEntry> {
        self.peers.get(&peer)
    }

    pub(crate) fn by_addr(&self, addr: SocketAddr) -> Option<&PeerEntry> {
        self.addr_to_peer
            .get(&addr)
            .and_then(|id| self.peers.get(id))
    }

    /// Record a peer, or refresh the name and address of a known one.
    /// The connection state of a known peer is left alone.
    pub(crate) fn observe(&mut self, identity: PeerIdentity, addr: SocketAddr, now: Instant) {
        let id = identity.id();
        match self.peers.get_mut(&id) {
            Some(entry) => {
                if entry.addr != addr {
                    self.addr_to_peer.remove(&entry.addr);
                    entry.addr = addr;
                }
                entry.identity = identity;
            }
            None => {
                self.peers.insert(
                    id,
                    PeerEntry {
                        identity,
                        addr,
                        state: PeerConnectionState::NotConnected,
                        last_seen: now,
                    },
                );
            }
        }
        // A different peer previously at this address is superseded
        if let Some(previous) = self.addr_to_peer.insert(addr, id)
            && previous != id
            && let Some(stale) = self.peers.get(&previous)
            && stale.addr == addr
            && stale.state == PeerConnectionState::NotConnected
        {
            self.peers.remove(&previous);
        }
    }

    /// Apply a validated transition, returning the entry after the change.
    pub(crate) fn set_state(
        &mut self,
        peer: PeerId,
        to: PeerConnectionState,
        now: Instant,
    ) -> Result<&PeerEntry, TransitionError> {
        let entry = self
            .peers
            .get_mut(&peer)
            .ok_or(TransitionError::UnknownPeer(peer))?;
        if !entry.state.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                peer,
                from: entry.state,
                to,
            });
        }
        entry.state = to;
        entry.last_seen = now;
        Ok(entry)
    }

    /// Refresh liveness of the peer at `addr`.
    pub(crate) fn touch(&mut self, addr: SocketAddr, now: Instant) -> Option<PeerId> {
        let id = *self.addr_to_peer.get(&addr)?;
        let entry = self.peers.get_mut(&id)?;
        entry.last_seen = now;
        Some(id)
    }

    pub(crate) fn rename(&mut self, peer: PeerId, display_name: &str) -> bool {
        match self.peers.get_mut(&peer) {
            Some(entry) if entry.identity.display_name() != display_name => {
                entry.identity = PeerIdentity::with_id(peer, display_name);
                true
            }
            _ => false,
        }
    }

    /// Addresses of connected peers matching `target`.
    pub(crate) fn targets(&self, target: SendTarget) -> Vec<SocketAddr> {
        match target {
            SendTarget::All => self
                .peers
                .values()
                .filter(|e| e.state.is_connected())
                .map(|e| e.addr)
                .collect(),
            SendTarget::Peer(id) => self
                .peers
                .get(&id)
                .filter(|e| e.state.is_connected())
                .map(|e| vec![e.addr])
                .unwrap_or_default(),
        }
    }

    pub(crate) fn connected_count(&self) -> usize {
        self.peers.values().filter(|e| e.state.is_connected()).count()
    }

    /// Peers that are connected or being connected.
    pub(crate) fn open_peers(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|e| e.state != PeerConnectionState::NotConnected)
            .map(|e| e.identity.id())
            .collect()
    }

    /// Connected peers silent for longer than `timeout`.
    pub(crate) fn timed_out(&self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|e| e.state.is_connected() && now.duration_since(e.last_seen) > timeout)
            .map(|e| e.identity.id())
            .collect()
    }

    /// Drop every entry and start the next cycle.
    pub(crate) fn reset(&mut self) {
        self.peers.clear();
        self.addr_to_peer.clear();
        self.cycle += 1;
    }

    /// Peers ordered by id, for stable UI listings.
    pub(crate) fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut peers: Vec<_> = self
            .peers
            .values()
            .map(|e| PeerSnapshot {
                identity: e.identity.clone(),
                state: e.state,
            })
            .collect();
        peers.sort_by_key(|p| p.identity.id());
        peers
    }
}
