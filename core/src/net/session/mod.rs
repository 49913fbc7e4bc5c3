//! Transport session
//!
//! Holds the per-peer connection states of one discovery cycle and is the
//! game thread's entry point for outbound bytes.
//!
//! The peer table is written only by the network driver. Game-side calls
//! take the read lock, so a state read never observes a half-applied
//! connect or disconnect. Every applied transition is published as a
//! [`TransportEvent::StateChanged`] while the write lock is held, which keeps
//! the event order identical to the order of changes in the table.

mod state;
mod table;


use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use racelink_shared::{PeerId, PeerIdentity};
use tokio::sync::mpsc;

use super::error::SendError;
use super::event::{Command, TransportEvent};

pub use state::PeerConnectionState;
pub(crate) use table::TransitionError;
use table::PeerTable;

/// Destination of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// Every connected peer
    All,
    /// One connected peer
    Peer(PeerId),
}

/// One row of the peer list, for UI display.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSnapshot {
    pub identity: PeerIdentity,
    pub state: PeerConnectionState,
}

/// Shared handle to the session of the current discovery cycle.
#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    table: RwLock<PeerTable>,
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportSession {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                table: RwLock::new(PeerTable::default()),
                commands,
                events,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PeerTable> {
        self.inner
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PeerTable> {
        self.inner
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `bytes` for delivery.
    ///
    /// Fails immediately when the target is not connected or the outbound
    /// queue is full; never waits. Frames still queued for a peer that is
    /// lost before the driver gets to them are dropped.
    pub fn send(&self, bytes: Vec<u8>, target: SendTarget) -> Result<(), SendError> {
        {
            let table = self.read();
            match target {
                SendTarget::All if table.connected_count() == 0 => {
                    return Err(SendError::NoConnectedPeers);
                }
                SendTarget::Peer(id)
                    if !table.get(id).is_some_and(|e| e.state.is_connected()) =>
                {
                    return Err(SendError::NotConnected(id));
                }
                _ => {}
            }
        }

        self.inner
            .commands
            .try_send(Command::Data { target, bytes })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Every peer seen in this cycle with its current state.
    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.read().snapshot()
    }

    pub fn state_of(&self, peer: PeerId) -> Option<PeerConnectionState> {
        self.read().get(peer).map(|e| e.state)
    }

    pub fn connected_count(&self) -> usize {
        self.read().connected_count()
    }

    /// Number of discovery cycles this session has been through.
    pub fn cycle(&self) -> u64 {
        self.read().cycle()
    }

    // ------------------------------------------------------------------
    // Driver side
    // ------------------------------------------------------------------

    pub(crate) fn command(
        &self,
        command: Command,
    ) -> Result<(), mpsc::error::TrySendError<Command>> {
        self.inner.commands.try_send(command)
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        // Receiver gone means the service is being torn down
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn observe(&self, identity: PeerIdentity, addr: SocketAddr) {
        self.write().observe(identity, addr, Instant::now());
    }

    /// Move `peer` to `to`, publishing the change. Illegal transitions are
    /// refused and leave the table untouched.
    pub(crate) fn transition(
        &self,
        peer: PeerId,
        to: PeerConnectionState,
    ) -> Result<(), TransitionError> {
        let mut table = self.write();
        let from = table.get(peer).map(|e| e.state);
        let entry = table.set_state(peer, to, Instant::now())?;
        let identity = entry.identity.clone();
        let from = from.unwrap_or_default();

        tracing::debug!(%peer, %from, %to, "Peer state changed");
        self.emit(TransportEvent::StateChanged { peer: identity, from, to });
        Ok(())
    }

    pub(crate) fn touch(&self, addr: SocketAddr) -> Option<PeerId> {
        self.write().touch(addr, Instant::now())
    }

    pub(crate) fn rename(&self, peer: PeerId, display_name: &str) -> bool {
        self.write().rename(peer, display_name)
    }

    pub(crate) fn peer_at(&self, addr: SocketAddr) -> Option<(PeerIdentity, PeerConnectionState)> {
        self.read()
            .by_addr(addr)
            .map(|e| (e.identity.clone(), e.state))
    }

    pub(crate) fn identity_of(&self, peer: PeerId) -> Option<PeerIdentity> {
        self.read().get(peer).map(|e| e.identity.clone())
    }

    pub(crate) fn addr_of(&self, peer: PeerId) -> Option<SocketAddr> {
        self.read().get(peer).map(|e| e.addr)
    }

    pub(crate) fn targets(&self, target: SendTarget) -> Vec<SocketAddr> {
        self.read().targets(target)
    }

    pub(crate) fn open_peers(&self) -> Vec<PeerId> {
        self.read().open_peers()
    }

    pub(crate) fn timed_out(&self, timeout: Duration) -> Vec<PeerId> {
        self.read().timed_out(Instant::now(), timeout)
    }

    /// Discard all peers and start a fresh cycle.
    pub(crate) fn begin_cycle(&self) {
        let mut table = self.write();
        table.reset();
        tracing::debug!(cycle = table.cycle(), "New discovery cycle");
    }

    /// Move every open peer to `NotConnected`.
    ///
    /// Connecting peers go straight there; connected ones are lost.
    pub(crate) fn close_all(&self) {
        for peer in self.open_peers() {
            // Both open states may legally drop to NotConnected
            let _ = self.transition(peer, PeerConnectionState::NotConnected);
        }
    }
}
