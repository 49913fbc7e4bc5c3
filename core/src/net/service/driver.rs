//! Network driver
//!
//! The single task that owns the socket. It reacts to datagrams, commands
//! from the game thread and a periodic tick, and is the only writer of the
//! session's peer table.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use racelink_shared::{PeerId, PeerIdentity};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use super::Discovery;
use crate::config::NetConfig;
use crate::net::codec::{Message, TAG_HANDSHAKE};
use crate::net::discovery::{Advertiser, Browser, InviteDecision, PendingInvite};
use crate::net::error::{NetError, SendError};
use crate::net::event::{Command, TransportEvent};
use crate::net::packet::{Packet, RejectReason};
use crate::net::session::{PeerConnectionState, SendTarget, TransportSession};
use crate::net::socket::RaceSocket;

/// Upper bound on the tick period
const MAX_TICK: Duration = Duration::from_millis(50);

pub(super) struct Driver {
    local: PeerIdentity,
    config: NetConfig,
    socket: RaceSocket,
    session: TransportSession,
    discovery: Discovery,
    commands: mpsc::Receiver<Command>,
    shutdown: oneshot::Receiver<()>,
    /// Display: nonce of the invitation each controller was accepted with
    accepted: HashMap<PeerId, u64>,
    next_probe: Instant,
    next_keepalive: Instant,
}

impl Driver {
    pub(super) fn new(
        local: PeerIdentity,
        config: NetConfig,
        socket: RaceSocket,
        session: TransportSession,
        discovery: Discovery,
        commands: mpsc::Receiver<Command>,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        let now = Instant::now();
        Self {
            local,
            config,
            socket,
            session,
            discovery,
            commands,
            shutdown,
            accepted: HashMap::new(),
            next_probe: now,
            next_keepalive: now,
        }
    }

    fn tick_period(&self) -> Duration {
        MAX_TICK
            .min(self.config.keepalive_interval())
            .min(self.config.probe_interval())
            .max(Duration::from_millis(1))
    }

    pub(super) async fn run(mut self) {
        let mut tick = tokio::time::interval(self.tick_period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(addr = %self.socket.local_addr(), "Network driver running");

        loop {
            tokio::select! {
                _ = &mut self.shutdown => break,
                received = self.socket.recv() => match received {
                    Ok((from, Ok(packet))) => {
                        self.check_restart();
                        self.handle_packet(from, packet);
                    }
                    Ok((from, Err(e))) => {
                        tracing::warn!(%from, error = %e, "Dropping undecodable datagram");
                    }
                    // ICMP errors from earlier sends surface here; keep going
                    Err(e) => tracing::debug!(error = %e, "Receive error"),
                },
                Some(command) = self.commands.recv() => {
                    self.check_restart();
                    self.handle_command(command);
                }
                _ = tick.tick() => {
                    self.check_restart();
                    self.on_tick(Instant::now());
                }
            }
        }

        self.farewell();
        tracing::debug!("Network driver stopped");
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn advertiser(&self) -> Option<Advertiser> {
        match &self.discovery {
            Discovery::Advertiser(a) => Some(a.clone()),
            Discovery::Browser(_) => None,
        }
    }

    fn browser(&self) -> Option<Browser> {
        match &self.discovery {
            Discovery::Browser(b) => Some(b.clone()),
            Discovery::Advertiser(_) => None,
        }
    }

    /// Best-effort send for control traffic; failures are only logged.
    fn send_packet(&self, to: SocketAddr, packet: &Packet) -> bool {
        match self.socket.try_send_to(to, packet) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%to, kind = packet.kind(), error = %e, "Failed to send packet");
                false
            }
        }
    }

    fn send_handshake(&self, to: SocketAddr) {
        let frame = Message::Handshake {
            display_name: self.local.display_name().to_string(),
        };
        self.send_packet(to, &Packet::Data(frame.encode()));
    }

    fn is_connected(&self, peer: PeerId) -> bool {
        self.session.state_of(peer) == Some(PeerConnectionState::Connected)
    }

    // ------------------------------------------------------------------
    // Inbound packets
    // ------------------------------------------------------------------

    fn handle_packet(&mut self, from: SocketAddr, packet: Packet) {
        tracing::trace!(%from, kind = packet.kind(), "Received packet");
        self.session.touch(from);

        match packet {
            Packet::Probe {
                service_id,
                from: prober,
            } => self.on_probe(from, &service_id, &prober),
            Packet::Announce {
                service_id,
                identity,
            } => self.on_announce(from, &service_id, identity),
            Packet::Invite {
                service_id,
                identity,
                nonce,
            } => self.on_invite(from, &service_id, identity, nonce),
            Packet::InviteAccept { identity, nonce } => {
                self.on_invite_accept(from, identity, nonce)
            }
            Packet::InviteReject { nonce, reason } => self.on_invite_reject(nonce, reason),
            Packet::InviteCancel { nonce } => self.on_invite_cancel(from, nonce),
            Packet::Data(bytes) => self.on_data(from, bytes),
            Packet::Ping => {
                if self
                    .session
                    .peer_at(from)
                    .is_some_and(|(_, state)| state.is_connected())
                {
                    self.send_packet(from, &Packet::Pong);
                }
            }
            Packet::Pong => {}
            Packet::Goodbye => {
                if let Some((identity, state)) = self.session.peer_at(from)
                    && state.is_connected()
                {
                    self.lose_peer(identity.id(), "peer left");
                }
            }
        }
    }

    fn on_probe(&self, from: SocketAddr, service_id: &str, prober: &PeerIdentity) {
        let Some(advertiser) = self.advertiser() else {
            return;
        };
        if prober.id() == self.local.id() || !advertiser.should_announce(service_id) {
            return;
        }
        tracing::trace!(%from, prober = %prober, "Answering probe");
        self.send_packet(
            from,
            &Packet::Announce {
                service_id: advertiser.service_id().to_string(),
                identity: self.local.clone(),
            },
        );
    }

    fn on_announce(&self, from: SocketAddr, service_id: &str, identity: PeerIdentity) {
        let Some(browser) = self.browser() else {
            return;
        };
        if service_id != browser.service_id()
            || identity.id() == self.local.id()
            || !browser.is_browsing()
        {
            return;
        }
        let found = browser.on_announce(identity.clone(), Instant::now());
        self.session.observe(identity.clone(), from);
        if !found {
            return;
        }
        tracing::info!(%from, display = %identity, "Display found");
        self.session.emit(TransportEvent::PeerFound(identity));
    }

    fn on_invite(
        &mut self,
        from: SocketAddr,
        service_id: &str,
        identity: PeerIdentity,
        nonce: u64,
    ) {
        let Some(advertiser) = self.advertiser() else {
            return;
        };
        let peer = identity.id();

        if service_id != advertiser.service_id() {
            tracing::debug!(%from, service_id, "Invitation for another service");
            self.send_packet(
                from,
                &Packet::InviteReject {
                    nonce,
                    reason: RejectReason::ServiceMismatch,
                },
            );
            return;
        }

        // Retransmitted invitation: our accept was lost or is still in flight
        if self.is_connected(peer) {
            self.session.observe(identity, from);
            self.accepted.insert(peer, nonce);
            self.send_packet(
                from,
                &Packet::InviteAccept {
                    identity: self.local.clone(),
                    nonce,
                },
            );
            return;
        }

        self.session.observe(identity.clone(), from);
        if let Err(e) = self
            .session
            .transition(peer, PeerConnectionState::Connecting)
        {
            tracing::warn!(error = %e, "Ignoring invitation");
            return;
        }

        match advertiser.decide(service_id) {
            InviteDecision::Accept => {
                let accept = Packet::InviteAccept {
                    identity: self.local.clone(),
                    nonce,
                };
                if self.send_packet(from, &accept) {
                    let _ = self
                        .session
                        .transition(peer, PeerConnectionState::Connected);
                    self.accepted.insert(peer, nonce);
                    tracing::info!(%from, controller = %identity, "Controller connected");
                    self.send_handshake(from);
                } else {
                    // Advertising stays stopped; the game decides whether to resume
                    tracing::warn!(controller = %identity, "Could not accept invitation");
                    let _ = self
                        .session
                        .transition(peer, PeerConnectionState::NotConnected);
                    advertiser.release();
                }
            }
            InviteDecision::Reject(reason) => {
                tracing::info!(controller = %identity, %reason, "Rejecting invitation");
                self.send_packet(from, &Packet::InviteReject { nonce, reason });
                let _ = self
                    .session
                    .transition(peer, PeerConnectionState::NotConnected);
            }
        }
    }

    fn on_invite_accept(&self, from: SocketAddr, identity: PeerIdentity, nonce: u64) {
        let Some(browser) = self.browser() else {
            return;
        };
        let peer = identity.id();

        // Duplicate accept for a retransmitted invitation
        if self.is_connected(peer) {
            return;
        }

        let pending = browser.pending_with(nonce);
        if pending.is_none_or(|p| p.peer != peer) {
            tracing::debug!(%from, display = %identity, "Unsolicited accept, leaving");
            self.send_packet(from, &Packet::Goodbye);
            return;
        }

        browser.complete(nonce);
        self.session.observe(identity.clone(), from);
        if let Err(e) = self
            .session
            .transition(peer, PeerConnectionState::Connected)
        {
            tracing::warn!(error = %e, "Accept for an invitation never sent");
            self.send_packet(from, &Packet::Goodbye);
            return;
        }

        browser.finish_connect();
        tracing::info!(%from, display = %identity, "Connected to Display");
        self.send_handshake(from);
    }

    fn on_invite_reject(&self, nonce: u64, reason: RejectReason) {
        let Some(browser) = self.browser() else {
            return;
        };
        let Some(peer) = browser.complete(nonce) else {
            return;
        };
        let _ = self
            .session
            .transition(peer, PeerConnectionState::NotConnected);
        tracing::info!(%peer, %reason, "Invitation rejected");
        self.session
            .emit(TransportEvent::Error(NetError::InviteRejected { peer, reason }));
    }

    fn on_invite_cancel(&mut self, from: SocketAddr, nonce: u64) {
        if self.advertiser().is_none() {
            return;
        }
        let Some((identity, state)) = self.session.peer_at(from) else {
            return;
        };
        let peer = identity.id();
        if state.is_connected() && self.accepted.get(&peer) == Some(&nonce) {
            self.lose_peer(peer, "invitation withdrawn");
        }
    }

    fn on_data(&self, from: SocketAddr, bytes: Vec<u8>) {
        let Some((identity, state)) = self.session.peer_at(from) else {
            tracing::trace!(%from, "Data from unknown address");
            return;
        };
        if !state.is_connected() {
            tracing::trace!(%from, %state, "Data from peer that is not connected");
            return;
        }

        if bytes.first() != Some(&TAG_HANDSHAKE) {
            self.session.emit(TransportEvent::Received {
                peer: identity,
                bytes,
            });
            return;
        }

        // Handshake frames bind the peer's name and stop here
        match Message::decode(&bytes) {
            Ok(Message::Handshake { display_name }) => {
                if self.session.rename(identity.id(), &display_name) {
                    tracing::debug!(peer = %identity.id(), name = %display_name, "Peer renamed");
                }
            }
            Ok(_) => {}
            Err(source) => {
                tracing::warn!(peer = %identity, error = %source, "Malformed handshake");
                self.session
                    .emit(TransportEvent::Error(NetError::MalformedMessage {
                        peer: identity.id(),
                        source,
                    }));
            }
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Data { target, bytes } => {
                // Peers lost since the frame was queued resolve to nothing
                let packet = Packet::Data(bytes);
                for addr in self.session.targets(target) {
                    if let Err(e) = self.socket.try_send_to(addr, &packet) {
                        tracing::warn!(to = %addr, error = %e, "Dropping outbound frame");
                        self.session
                            .emit(TransportEvent::Error(NetError::SendFailed(
                                SendError::Transport(e.to_string()),
                            )));
                    }
                }
            }
            Command::Invite { peer, nonce } => self.send_invite(peer, nonce),
        }
    }

    fn send_invite(&self, peer: PeerId, nonce: u64) {
        let Some(browser) = self.browser() else {
            return;
        };
        if browser.pending_with(nonce).is_none() {
            tracing::debug!(%peer, "Invitation withdrawn before sending");
            return;
        }
        // Left pending on failure; the invite timeout reports it
        let Some(addr) = self.session.addr_of(peer) else {
            tracing::warn!(%peer, "No address for invited peer");
            return;
        };
        if let Err(e) = self
            .session
            .transition(peer, PeerConnectionState::Connecting)
        {
            tracing::warn!(error = %e, "Not sending invitation");
            return;
        }
        tracing::debug!(%peer, %addr, "Sending invitation");
        self.send_packet(addr, &self.invite_packet(browser.service_id(), nonce));
    }

    fn invite_packet(&self, service_id: &str, nonce: u64) -> Packet {
        Packet::Invite {
            service_id: service_id.to_string(),
            identity: self.local.clone(),
            nonce,
        }
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    fn on_tick(&mut self, now: Instant) {
        if now >= self.next_keepalive {
            self.next_keepalive = now + self.config.keepalive_interval();
            for addr in self.session.targets(SendTarget::All) {
                self.send_packet(addr, &Packet::Ping);
            }
            for peer in self.session.timed_out(self.config.peer_timeout()) {
                self.lose_peer(peer, "timed out");
            }
        }

        if let Some(browser) = self.browser() {
            self.browse_tick(&browser, now);
        }
    }

    fn browse_tick(&mut self, browser: &Browser, now: Instant) {
        for cancelled in browser.take_cancelled() {
            self.cancel_invite(cancelled);
        }

        if let Some(expired) = browser.take_timed_out(now, self.config.invite_timeout()) {
            let peer = expired.peer;
            let _ = self
                .session
                .transition(peer, PeerConnectionState::NotConnected);
            tracing::info!(%peer, "Invitation timed out");
            self.session
                .emit(TransportEvent::Error(NetError::InviteTimeout { peer }));
        }

        if let Some(pending) = browser.retransmit_due(now, self.config.probe_interval())
            && let Some(addr) = self.session.addr_of(pending.peer)
            && self.session.state_of(pending.peer) == Some(PeerConnectionState::Connecting)
        {
            tracing::trace!(peer = %pending.peer, "Retransmitting invitation");
            self.send_packet(addr, &self.invite_packet(browser.service_id(), pending.nonce));
        }

        for lost in browser.expire(now, self.config.discovery_expiry()) {
            tracing::info!(display = %lost, "Display lost");
            self.session.emit(TransportEvent::PeerLost(lost));
        }

        if browser.is_browsing() && now >= self.next_probe {
            self.next_probe = now + self.config.probe_interval();
            self.probe(browser);
        }

        if self.config.auto_invite
            && self.session.open_peers().is_empty()
            && let Some(peer) = browser.auto_invite_candidate()
        {
            match browser.invite(peer) {
                Ok(()) => tracing::info!(%peer, "Auto-inviting Display"),
                Err(e) => tracing::debug!(%peer, error = %e, "Auto-invite skipped"),
            }
        }
    }

    fn probe(&self, browser: &Browser) {
        let fresh = browser.take_fresh_start();
        let packet = Packet::Probe {
            service_id: browser.service_id().to_string(),
            from: self.local.clone(),
        };

        let mut last_error = None;
        let mut sent = 0;
        for target in self.config.probe_targets() {
            match self.socket.try_send_to(target, &packet) {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::debug!(%target, error = %e, "Probe failed");
                    last_error = Some(e);
                }
            }
        }

        // Only the first round of a start decides whether browsing works
        if sent == 0 && fresh {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no discovery targets".to_string());
            tracing::warn!(%reason, "Browsing could not start");
            browser.fail();
            self.session.emit(TransportEvent::DiscoveryFailed(reason));
        }
    }

    fn cancel_invite(&self, cancelled: PendingInvite) {
        let peer = cancelled.peer;
        if let Some(addr) = self.session.addr_of(peer) {
            tracing::debug!(%peer, "Cancelling invitation");
            self.send_packet(
                addr,
                &Packet::InviteCancel {
                    nonce: cancelled.nonce,
                },
            );
        }
        if self.session.state_of(peer) == Some(PeerConnectionState::Connecting) {
            let _ = self
                .session
                .transition(peer, PeerConnectionState::NotConnected);
        }
    }

    /// The game stopped and restarted discovery: whatever the old cycle
    /// held is closed and forgotten.
    fn check_restart(&mut self) {
        let restarted = match &self.discovery {
            Discovery::Advertiser(a) => a.take_restart(),
            Discovery::Browser(b) => b.take_restart(),
        };
        if !restarted {
            return;
        }

        // Cancels need the old table for addresses
        if let Some(browser) = self.browser() {
            for cancelled in browser.take_cancelled() {
                self.cancel_invite(cancelled);
            }
        }
        for addr in self.session.targets(SendTarget::All) {
            self.send_packet(addr, &Packet::Goodbye);
        }
        if let Some(advertiser) = self.advertiser() {
            for _ in 0..self.session.connected_count() {
                advertiser.release();
            }
            advertiser.resume_after_loss();
        }
        self.session.close_all();
        self.accepted.clear();
        self.session.begin_cycle();
        tracing::info!(cycle = self.session.cycle(), "Discovery restarted");
    }

    /// `Connected -> NotConnected`, then start over if nobody is left.
    fn lose_peer(&mut self, peer: PeerId, reason: &'static str) {
        if self
            .session
            .transition(peer, PeerConnectionState::NotConnected)
            .is_err()
        {
            return;
        }
        tracing::info!(%peer, reason, "Peer lost");

        self.accepted.remove(&peer);
        if let Some(advertiser) = self.advertiser() {
            advertiser.release();
        }

        if self.config.restart_on_peer_loss && self.session.open_peers().is_empty() {
            self.session.begin_cycle();
            let resumed = match &self.discovery {
                Discovery::Advertiser(a) => a.resume_after_loss(),
                Discovery::Browser(b) => b.resume_after_loss(),
            };
            tracing::info!(resumed, "Waiting for peer");
        }
    }

    /// Tell everyone we are leaving. Peer states are closed by the service
    /// once this task has exited.
    fn farewell(&self) {
        if let Some(browser) = self.browser() {
            for cancelled in browser.take_cancelled() {
                self.cancel_invite(cancelled);
            }
        }
        for addr in self.session.targets(SendTarget::All) {
            self.send_packet(addr, &Packet::Goodbye);
        }
    }
}
