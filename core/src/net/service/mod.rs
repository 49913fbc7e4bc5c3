//! Network service
//!
//! Role-bound coordinator the game talks to. A service owns one
//! [`TransportSession`], either an [`Advertiser`] (Display) or a [`Browser`]
//! (Controller), and a background thread running the network driver.
//!
//! Nothing here blocks the game loop. Sends are queued and fail fast;
//! inbound traffic is buffered until the game drains it, typically once per
//! frame with [`NetworkService::dispatch`].

mod driver;

#[cfg(test)]
mod tests;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use racelink_shared::{PeerIdentity, Role, is_valid_service_id};
use tokio::sync::{mpsc, oneshot};

use self::driver::Driver;
use super::codec::{Message, RaceCommand};
use super::discovery::{Advertiser, Browser};
use super::error::NetError;
use super::event::TransportEvent;
use super::session::{PeerConnectionState, PeerSnapshot, SendTarget, TransportSession};
use super::socket::{RaceSocket, SocketError};
use crate::config::NetConfig;

/// Failure to bring up the background machinery.
///
/// Failing to advertise or browse is not one of these; it arrives as a
/// `discovery_failed` callback like any other network event.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("failed to build network runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("failed to spawn network thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("network thread exited during startup")]
    DriverExited,
}

enum Boot {
    Ready(SocketAddr),
    Runtime(io::Error),
    Bind(SocketError),
}

/// Discovery half of a service, selected by [`Role`].
#[derive(Clone)]
pub(crate) enum Discovery {
    Advertiser(Advertiser),
    Browser(Browser),
}

impl Discovery {
    fn start(&self) {
        match self {
            Self::Advertiser(a) => a.start(),
            Self::Browser(b) => b.start(),
        }
    }

    fn stop(&self) {
        match self {
            Self::Advertiser(a) => a.stop(),
            Self::Browser(b) => b.stop(),
        }
    }

    fn is_active(&self) -> bool {
        match self {
            Self::Advertiser(a) => a.is_advertising(),
            Self::Browser(b) => b.is_browsing(),
        }
    }
}

/// Callbacks from the network layer to the game.
///
/// All methods run on the thread that calls [`NetworkService::dispatch`].
pub trait NetworkDelegate {
    fn peer_connected(&mut self, peer: &PeerIdentity);

    /// A connected peer went away. A Display in the middle of a race should
    /// pause and wait for a controller rather than end the race.
    fn peer_disconnected(&mut self, peer: &PeerIdentity);

    fn did_receive_control_input(&mut self, from: &PeerIdentity, velocity_x: f32, velocity_y: f32);

    fn did_receive_race_state(
        &mut self,
        from: &PeerIdentity,
        lap: u32,
        elapsed_time: f64,
        waypoint_index: u32,
    );

    fn discovery_failed(&mut self, reason: &str);

    fn did_receive_track_selection(&mut self, _from: &PeerIdentity, _track: &str, _car: &str) {}

    fn did_receive_race_command(&mut self, _from: &PeerIdentity, _command: RaceCommand) {}

    /// Browser saw a Display appear.
    fn peer_found(&mut self, _peer: &PeerIdentity) {}

    /// A discovered Display stopped answering.
    fn peer_lost(&mut self, _peer: &PeerIdentity) {}

    fn network_error(&mut self, error: &NetError) {
        tracing::warn!(%error, "Network error");
    }
}

/// Typed event for the game, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    PeerConnected(PeerIdentity),
    PeerDisconnected(PeerIdentity),
    ControlInput {
        from: PeerIdentity,
        velocity_x: f32,
        velocity_y: f32,
    },
    RaceState {
        from: PeerIdentity,
        lap: u32,
        elapsed_time: f64,
        waypoint_index: u32,
    },
    TrackSelection {
        from: PeerIdentity,
        track: String,
        car: String,
    },
    RaceCommand {
        from: PeerIdentity,
        command: RaceCommand,
    },
    PeerFound(PeerIdentity),
    PeerLost(PeerIdentity),
    DiscoveryFailed(String),
    Error(NetError),
}

impl NetEvent {
    /// Hand this event to the matching delegate callback.
    pub fn deliver<D: NetworkDelegate + ?Sized>(self, delegate: &mut D) {
        match self {
            Self::PeerConnected(peer) => delegate.peer_connected(&peer),
            Self::PeerDisconnected(peer) => delegate.peer_disconnected(&peer),
            Self::ControlInput {
                from,
                velocity_x,
                velocity_y,
            } => delegate.did_receive_control_input(&from, velocity_x, velocity_y),
            Self::RaceState {
                from,
                lap,
                elapsed_time,
                waypoint_index,
            } => delegate.did_receive_race_state(&from, lap, elapsed_time, waypoint_index),
            Self::TrackSelection { from, track, car } => {
                delegate.did_receive_track_selection(&from, &track, &car)
            }
            Self::RaceCommand { from, command } => {
                delegate.did_receive_race_command(&from, command)
            }
            Self::PeerFound(peer) => delegate.peer_found(&peer),
            Self::PeerLost(peer) => delegate.peer_lost(&peer),
            Self::DiscoveryFailed(reason) => delegate.discovery_failed(&reason),
            Self::Error(error) => delegate.network_error(&error),
        }
    }
}

/// Map a raw transport event to what the game sees.
///
/// Connecting transitions and handshake frames are internal and yield
/// `None`. A malformed frame becomes an error event for that frame alone.
pub(crate) fn interpret(event: TransportEvent) -> Option<NetEvent> {
    match event {
        TransportEvent::StateChanged { peer, from, to } => match (from, to) {
            (_, PeerConnectionState::Connected) => Some(NetEvent::PeerConnected(peer)),
            (PeerConnectionState::Connected, PeerConnectionState::NotConnected) => {
                Some(NetEvent::PeerDisconnected(peer))
            }
            _ => None,
        },
        TransportEvent::Received { peer, bytes } => match Message::decode(&bytes) {
            Ok(Message::ControlInput {
                velocity_x,
                velocity_y,
            }) => Some(NetEvent::ControlInput {
                from: peer,
                velocity_x,
                velocity_y,
            }),
            Ok(Message::RaceState {
                lap,
                elapsed_time,
                waypoint_index,
            }) => Some(NetEvent::RaceState {
                from: peer,
                lap,
                elapsed_time,
                waypoint_index,
            }),
            Ok(Message::TrackSelection { track, car }) => Some(NetEvent::TrackSelection {
                from: peer,
                track,
                car,
            }),
            Ok(Message::RaceCommand(command)) => Some(NetEvent::RaceCommand {
                from: peer,
                command,
            }),
            Ok(Message::Handshake { .. }) => None,
            Err(source) => {
                tracing::warn!(peer = %peer, error = %source, "Dropping malformed frame");
                Some(NetEvent::Error(NetError::MalformedMessage {
                    peer: peer.id(),
                    source,
                }))
            }
        },
        TransportEvent::PeerFound(peer) => Some(NetEvent::PeerFound(peer)),
        TransportEvent::PeerLost(peer) => Some(NetEvent::PeerLost(peer)),
        TransportEvent::DiscoveryFailed(reason) => Some(NetEvent::DiscoveryFailed(reason)),
        TransportEvent::Error(error) => Some(NetEvent::Error(error)),
    }
}

/// One-line summary for "Searching…" style UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceStatus {
    /// Discovery is off and no peer is linked
    Idle,
    /// Display waiting for a controller
    Advertising,
    /// Controller looking for a Display
    Searching,
    /// Invitation in flight
    Connecting(PeerIdentity),
    /// At least one peer linked
    Connected(Vec<PeerIdentity>),
    /// Service has been stopped
    Stopped,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Advertising => write!(f, "Waiting for controller…"),
            Self::Searching => write!(f, "Searching…"),
            Self::Connecting(peer) => write!(f, "Connecting to {}…", peer.display_name()),
            Self::Connected(peers) => {
                write!(f, "Connected to ")?;
                for (i, peer) in peers.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", peer.display_name())?;
                }
                Ok(())
            }
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Networking for one scene.
///
/// Discovery starts as soon as the service is created. Call
/// [`stop`](Self::stop) (or drop the service) when the scene ends so no
/// advertisement or invitation is left behind.
pub struct NetworkService {
    role: Role,
    identity: PeerIdentity,
    session: TransportSession,
    discovery: Discovery,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    stopped: bool,
}

impl NetworkService {
    /// Start networking as `role`.
    ///
    /// Blocks only until the socket is bound. If binding fails the service
    /// is still returned, inert, and a `discovery_failed` event is queued.
    ///
    /// # Panics
    ///
    /// Panics if `config.service_id` is not a valid service identifier.
    /// That is a programming error, not a runtime condition.
    pub fn start(
        role: Role,
        identity: PeerIdentity,
        config: NetConfig,
    ) -> Result<Self, StartError> {
        assert!(
            is_valid_service_id(&config.service_id),
            "invalid service id {:?}",
            config.service_id
        );

        let (command_tx, command_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        let (event_tx, events) = mpsc::unbounded_channel();
        let session = TransportSession::new(command_tx, event_tx);

        let discovery = match role {
            Role::Display => Discovery::Advertiser(Advertiser::new(
                config.service_id.clone(),
                config.max_controllers,
            )),
            Role::Controller => {
                Discovery::Browser(Browser::new(config.service_id.clone(), session.clone()))
            }
        };

        // Displays listen on the well-known port, controllers anywhere
        let port = match role {
            Role::Display => config.discovery_port,
            Role::Controller => 0,
        };
        let bind_addr = SocketAddr::new(config.bind_ip, port);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (boot_tx, boot_rx) = std_mpsc::sync_channel(1);

        let thread = thread::Builder::new()
            .name(format!("racelink-{role}"))
            .spawn({
                let identity = identity.clone();
                let session = session.clone();
                let discovery = discovery.clone();
                move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            let _ = boot_tx.send(Boot::Runtime(e));
                            return;
                        }
                    };

                    runtime.block_on(async move {
                        let socket = match RaceSocket::bind(bind_addr).await {
                            Ok(socket) => socket,
                            Err(e) => {
                                let _ = boot_tx.send(Boot::Bind(e));
                                return;
                            }
                        };
                        let _ = boot_tx.send(Boot::Ready(socket.local_addr()));
                        Driver::new(
                            identity,
                            config,
                            socket,
                            session,
                            discovery,
                            command_rx,
                            shutdown_rx,
                        )
                        .run()
                        .await;
                    });
                }
            })
            .map_err(StartError::Spawn)?;

        let mut service = Self {
            role,
            identity,
            session,
            discovery,
            events,
            local_addr: None,
            shutdown: Some(shutdown_tx),
            thread: None,
            stopped: false,
        };

        match boot_rx.recv() {
            Ok(Boot::Ready(addr)) => {
                service.local_addr = Some(addr);
                service.thread = Some(thread);
                service.discovery.start();
                tracing::info!(
                    %role,
                    %addr,
                    identity = %service.identity,
                    "Network service started"
                );
            }
            Ok(Boot::Bind(e)) => {
                let _ = thread.join();
                tracing::warn!(%role, error = %e, "Discovery failed to start");
                service
                    .session
                    .emit(TransportEvent::DiscoveryFailed(e.to_string()));
            }
            Ok(Boot::Runtime(e)) => {
                let _ = thread.join();
                return Err(StartError::Runtime(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(StartError::DriverExited);
            }
        }

        Ok(service)
    }

    /// Start with an identity named after `config.display_name`.
    pub fn from_config(role: Role, config: NetConfig) -> Result<Self, StartError> {
        let identity = PeerIdentity::new(config.display_name.clone());
        Self::start(role, identity, config)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Bound socket address, `None` if binding failed.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    /// The Display's advertiser.
    pub fn advertiser(&self) -> Option<&Advertiser> {
        match &self.discovery {
            Discovery::Advertiser(a) => Some(a),
            Discovery::Browser(_) => None,
        }
    }

    /// The Controller's browser.
    pub fn browser(&self) -> Option<&Browser> {
        match &self.discovery {
            Discovery::Browser(b) => Some(b),
            Discovery::Advertiser(_) => None,
        }
    }

    /// Every peer seen in the current cycle with its state.
    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.session.peers()
    }

    pub fn status(&self) -> ServiceStatus {
        if self.stopped {
            return ServiceStatus::Stopped;
        }
        let peers = self.session.peers();
        let connected: Vec<_> = peers
            .iter()
            .filter(|p| p.state.is_connected())
            .map(|p| p.identity.clone())
            .collect();
        if !connected.is_empty() {
            return ServiceStatus::Connected(connected);
        }
        if let Some(p) = peers
            .iter()
            .find(|p| p.state == PeerConnectionState::Connecting)
        {
            return ServiceStatus::Connecting(p.identity.clone());
        }
        match (self.discovery.is_active(), self.role) {
            (true, Role::Display) => ServiceStatus::Advertising,
            (true, Role::Controller) => ServiceStatus::Searching,
            (false, _) => ServiceStatus::Idle,
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Encode and queue `message`. Failures are reported to the delegate as
    /// [`NetError::SendFailed`], never returned.
    pub fn send_message(&self, message: &Message, target: SendTarget) {
        if let Err(e) = self.session.send(message.encode(), target) {
            tracing::debug!(error = %e, tag = message.tag(), "Send failed");
            self.session
                .emit(TransportEvent::Error(NetError::SendFailed(e)));
        }
    }

    /// Controller side: current joystick vector.
    pub fn send_control_input(&self, velocity_x: f32, velocity_y: f32) {
        self.send_message(
            &Message::ControlInput {
                velocity_x,
                velocity_y,
            },
            SendTarget::All,
        );
    }

    /// Display side: current race progress.
    pub fn send_race_state(&self, lap: u32, elapsed_time: f64, waypoint_index: u32) {
        self.send_message(
            &Message::RaceState {
                lap,
                elapsed_time,
                waypoint_index,
            },
            SendTarget::All,
        );
    }

    pub fn send_track_selection(&self, track: &str, car: &str) {
        self.send_message(
            &Message::TrackSelection {
                track: track.to_string(),
                car: car.to_string(),
            },
            SendTarget::All,
        );
    }

    pub fn send_race_command(&self, command: RaceCommand) {
        self.send_message(&Message::RaceCommand(command), SendTarget::All);
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Next buffered event, without waiting.
    pub fn poll_event(&mut self) -> Option<NetEvent> {
        loop {
            let event = self.events.try_recv().ok()?;
            if let Some(event) = interpret(event) {
                return Some(event);
            }
        }
    }

    /// Deliver every buffered event to `delegate`. Returns how many were
    /// delivered.
    pub fn dispatch<D: NetworkDelegate + ?Sized>(&mut self, delegate: &mut D) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.poll_event() {
            event.deliver(delegate);
            delivered += 1;
        }
        delivered
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop discovery, withdraw any pending invitation, say goodbye to
    /// connected peers and close the session. Idempotent.
    ///
    /// When this returns every peer is `NotConnected` and the matching
    /// disconnect events are queued for the next [`dispatch`](Self::dispatch).
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.discovery.stop();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("Network driver panicked");
        }
        self.session.close_all();

        tracing::info!(role = %self.role, "Network service stopped");
    }

    /// Stop and deliver the final events, so `delegate` has seen every
    /// disconnect before this returns.
    pub fn shutdown<D: NetworkDelegate + ?Sized>(mut self, delegate: &mut D) {
        self.stop();
        self.dispatch(delegate);
    }
}

impl Drop for NetworkService {
    fn drop(&mut self) {
        self.stop();
    }
}
