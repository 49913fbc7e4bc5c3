//! Shared test utilities for networking tests

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};

use racelink_shared::{PeerIdentity, Role};

use crate::config::NetConfig;
use crate::net::codec::RaceCommand;
use crate::net::error::NetError;
use crate::net::service::{NetworkDelegate, NetworkService};

/// Upper bound for anything that should happen "soon" on loopback
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Configuration
// ============================================================================

/// Loopback config with short timers. Displays bind an ephemeral port.
pub fn loopback_config() -> NetConfig {
    NetConfig {
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        discovery_port: 0,
        probe_interval_ms: 20,
        keepalive_interval_ms: 20,
        discovery_expiry_ms: 500,
        peer_timeout_ms: 400,
        invite_timeout_ms: 1500,
        ..NetConfig::default()
    }
}

pub fn start_display(name: &str) -> NetworkService {
    start_display_with(name, loopback_config())
}

pub fn start_display_with(name: &str, config: NetConfig) -> NetworkService {
    NetworkService::start(Role::Display, PeerIdentity::new(name), config).unwrap()
}

/// Controller probing only `display`.
pub fn start_controller(name: &str, display: &NetworkService) -> NetworkService {
    start_controller_with(name, display, loopback_config())
}

pub fn start_controller_with(
    name: &str,
    display: &NetworkService,
    config: NetConfig,
) -> NetworkService {
    start_controller_at(name, display_addr(display), config)
}

/// Controller probing only `target`, which need not be a real Display.
pub fn start_controller_at(name: &str, target: SocketAddr, config: NetConfig) -> NetworkService {
    let config = NetConfig {
        discovery_targets: vec![target],
        ..config
    };
    NetworkService::start(Role::Controller, PeerIdentity::new(name), config).unwrap()
}

pub fn display_addr(display: &NetworkService) -> SocketAddr {
    display.local_addr().unwrap()
}

// ============================================================================
// Recording delegate
// ============================================================================

/// Everything a delegate can be told, with peers reduced to names.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Connected(String),
    Disconnected(String),
    ControlInput(f32, f32),
    RaceState(u32, f64, u32),
    TrackSelection(String, String),
    RaceCommand(RaceCommand),
    Found(String),
    Lost(String),
    DiscoveryFailed(String),
    Error(NetError),
}

/// Delegate that writes down every callback.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    pub events: Vec<Recorded>,
}

impl RecordingDelegate {
    pub fn take(&mut self) -> Vec<Recorded> {
        std::mem::take(&mut self.events)
    }

    pub fn count(&self, pred: impl Fn(&Recorded) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn connected(&self) -> usize {
        self.count(|e| matches!(e, Recorded::Connected(_)))
    }

    pub fn disconnected(&self) -> usize {
        self.count(|e| matches!(e, Recorded::Disconnected(_)))
    }

    pub fn errors(&self) -> Vec<NetError> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Recorded::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }
}

impl NetworkDelegate for RecordingDelegate {
    fn peer_connected(&mut self, peer: &PeerIdentity) {
        self.events
            .push(Recorded::Connected(peer.display_name().to_string()));
    }

    fn peer_disconnected(&mut self, peer: &PeerIdentity) {
        self.events
            .push(Recorded::Disconnected(peer.display_name().to_string()));
    }

    fn did_receive_control_input(
        &mut self,
        _from: &PeerIdentity,
        velocity_x: f32,
        velocity_y: f32,
    ) {
        self.events
            .push(Recorded::ControlInput(velocity_x, velocity_y));
    }

    fn did_receive_race_state(
        &mut self,
        _from: &PeerIdentity,
        lap: u32,
        elapsed_time: f64,
        waypoint_index: u32,
    ) {
        self.events
            .push(Recorded::RaceState(lap, elapsed_time, waypoint_index));
    }

    fn discovery_failed(&mut self, reason: &str) {
        self.events
            .push(Recorded::DiscoveryFailed(reason.to_string()));
    }

    fn did_receive_track_selection(&mut self, _from: &PeerIdentity, track: &str, car: &str) {
        self.events
            .push(Recorded::TrackSelection(track.to_string(), car.to_string()));
    }

    fn did_receive_race_command(&mut self, _from: &PeerIdentity, command: RaceCommand) {
        self.events.push(Recorded::RaceCommand(command));
    }

    fn peer_found(&mut self, peer: &PeerIdentity) {
        self.events
            .push(Recorded::Found(peer.display_name().to_string()));
    }

    fn peer_lost(&mut self, peer: &PeerIdentity) {
        self.events
            .push(Recorded::Lost(peer.display_name().to_string()));
    }

    fn network_error(&mut self, error: &NetError) {
        self.events.push(Recorded::Error(error.clone()));
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Poll `check` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// A Display and a Controller with their recorders.
pub struct Pair {
    pub display: NetworkService,
    pub controller: NetworkService,
    pub display_log: RecordingDelegate,
    pub controller_log: RecordingDelegate,
}

impl Pair {
    pub fn new() -> Self {
        let display = start_display("Display");
        let controller = start_controller("Pad", &display);
        Self {
            display,
            controller,
            display_log: RecordingDelegate::default(),
            controller_log: RecordingDelegate::default(),
        }
    }

    pub fn pump(&mut self) {
        self.display.dispatch(&mut self.display_log);
        self.controller.dispatch(&mut self.controller_log);
    }

    /// Pump both sides until `check` holds.
    pub fn pump_until(&mut self, mut check: impl FnMut(&Self) -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < WAIT {
            self.pump();
            if check(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Wait for discovery, invite, and wait for both sides to connect.
    pub fn connect(&mut self) {
        let display_id = self.display.identity().id();
        let (display_seen, controller_seen) =
            (self.display_log.connected(), self.controller_log.connected());
        assert!(
            self.pump_until(|p| {
                p.controller
                    .browser()
                    .is_some_and(|b| b.discovered().iter().any(|d| d.id() == display_id))
            }),
            "display never discovered"
        );
        self.controller.browser().unwrap().invite(display_id).unwrap();
        assert!(
            self.pump_until(|p| {
                p.display_log.connected() > display_seen
                    && p.controller_log.connected() > controller_seen
            }),
            "pair never connected"
        );
    }
}
