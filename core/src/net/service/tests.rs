//! Integration tests for network services over loopback

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use racelink_shared::{PeerId, PeerIdentity, Role};

use super::*;
use crate::net::codec::MalformedMessage;
use crate::net::error::{InviteError, SendError};
use crate::net::packet::{Packet, RejectReason};
use crate::test_utils::*;

// ============================================================================
// Event interpretation
// ============================================================================

fn peer(raw: u64, name: &str) -> PeerIdentity {
    PeerIdentity::with_id(PeerId::from_raw(raw), name)
}

fn received(peer: &PeerIdentity, message: &Message) -> TransportEvent {
    TransportEvent::Received {
        peer: peer.clone(),
        bytes: message.encode(),
    }
}

#[test]
fn test_malformed_frame_does_not_poison_stream() {
    let pad = peer(1, "Pad");
    let bad = TransportEvent::Received {
        peer: pad.clone(),
        bytes: vec![0xEE, 1, 2, 3],
    };
    let good = received(
        &pad,
        &Message::ControlInput {
            velocity_x: 0.25,
            velocity_y: 0.75,
        },
    );

    assert_eq!(
        interpret(bad),
        Some(NetEvent::Error(NetError::MalformedMessage {
            peer: pad.id(),
            source: MalformedMessage::UnknownTag(0xEE),
        }))
    );
    assert_eq!(
        interpret(good),
        Some(NetEvent::ControlInput {
            from: pad,
            velocity_x: 0.25,
            velocity_y: 0.75,
        })
    );
}

#[test]
fn test_internal_events_are_hidden() {
    let pad = peer(1, "Pad");
    let connecting = TransportEvent::StateChanged {
        peer: pad.clone(),
        from: PeerConnectionState::NotConnected,
        to: PeerConnectionState::Connecting,
    };
    let gave_up = TransportEvent::StateChanged {
        peer: pad.clone(),
        from: PeerConnectionState::Connecting,
        to: PeerConnectionState::NotConnected,
    };
    let handshake = received(
        &pad,
        &Message::Handshake {
            display_name: "Pad".to_string(),
        },
    );

    assert_eq!(interpret(connecting), None);
    assert_eq!(interpret(gave_up), None);
    assert_eq!(interpret(handshake), None);
}

#[test]
fn test_connection_transitions_become_events() {
    let pad = peer(1, "Pad");
    let up = TransportEvent::StateChanged {
        peer: pad.clone(),
        from: PeerConnectionState::Connecting,
        to: PeerConnectionState::Connected,
    };
    let down = TransportEvent::StateChanged {
        peer: pad.clone(),
        from: PeerConnectionState::Connected,
        to: PeerConnectionState::NotConnected,
    };

    assert_eq!(interpret(up), Some(NetEvent::PeerConnected(pad.clone())));
    assert_eq!(interpret(down), Some(NetEvent::PeerDisconnected(pad)));
}

#[test]
fn test_status_display_strings() {
    assert_eq!(ServiceStatus::Searching.to_string(), "Searching…");
    assert_eq!(
        ServiceStatus::Connected(vec![peer(1, "Alice"), peer(2, "Bob")]).to_string(),
        "Connected to Alice, Bob"
    );
    assert_eq!(
        ServiceStatus::Connecting(peer(3, "Pit Wall")).to_string(),
        "Connecting to Pit Wall…"
    );
}

// ============================================================================
// Fake peers
// ============================================================================

/// Peer that speaks packets directly and answers nothing unless told.
///
/// Stands in for a Controller talking to a real Display, or for a Display
/// that a real Controller browses.
struct RawPeer {
    socket: UdpSocket,
    identity: PeerIdentity,
}

impl RawPeer {
    fn new(name: &str) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        Self {
            socket,
            identity: PeerIdentity::new(name),
        }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    fn send(&self, to: SocketAddr, packet: &Packet) {
        self.socket.send_to(&packet.to_bytes(), to).unwrap();
    }

    fn invite(&self, to: SocketAddr, nonce: u64) {
        self.send(
            to,
            &Packet::Invite {
                service_id: DEFAULT_SERVICE.to_string(),
                identity: self.identity.clone(),
                nonce,
            },
        );
    }

    fn announce(&self, to: SocketAddr) {
        self.send(
            to,
            &Packet::Announce {
                service_id: DEFAULT_SERVICE.to_string(),
                identity: self.identity.clone(),
            },
        );
    }

    /// First packet matching `pred`, skipping everything else.
    fn expect(&self, pred: impl Fn(&Packet) -> bool) -> Packet {
        self.expect_from(pred).0
    }

    fn expect_from(&self, pred: impl Fn(&Packet) -> bool) -> (Packet, SocketAddr) {
        let mut buf = [0u8; 2048];
        let start = Instant::now();
        while start.elapsed() < WAIT {
            let Ok((len, from)) = self.socket.recv_from(&mut buf) else {
                continue;
            };
            let Ok(packet) = Packet::from_bytes(&buf[..len]) else {
                continue;
            };
            if pred(&packet) {
                return (packet, from);
            }
        }
        panic!("expected packet never arrived");
    }
}

const DEFAULT_SERVICE: &str = racelink_shared::DEFAULT_SERVICE_ID;

// ============================================================================
// Connection lifecycle
// ============================================================================

#[test]
fn test_pair_connects_and_exchanges_control_input() {
    let mut pair = Pair::new();
    pair.connect();

    assert!(pair.controller_log.events.contains(&Recorded::Found("Display".into())));
    assert_eq!(pair.display_log.events, vec![Recorded::Connected("Pad".into())]);
    pair.display_log.take();
    pair.controller_log.take();

    pair.controller.send_control_input(0.5, -0.2);
    assert!(pair.pump_until(|p| !p.display_log.events.is_empty()));

    // Nothing but the input itself: handshakes never surface
    std::thread::sleep(Duration::from_millis(50));
    pair.pump();
    assert_eq!(pair.display_log.events, vec![Recorded::ControlInput(0.5, -0.2)]);
    assert!(pair.controller_log.events.is_empty());
}

#[test]
fn test_race_state_reaches_controller() {
    let mut pair = Pair::new();
    pair.connect();
    pair.controller_log.take();

    pair.display.send_race_state(2, 63.25, 7);
    assert!(pair.pump_until(|p| {
        p.controller_log
            .events
            .contains(&Recorded::RaceState(2, 63.25, 7))
    }));
}

#[test]
fn test_track_selection_and_race_command() {
    let mut pair = Pair::new();
    pair.connect();

    pair.display.send_track_selection("Monza", "Red Racer");
    pair.controller.send_race_command(RaceCommand::Pause);

    assert!(pair.pump_until(|p| {
        p.controller_log.events.contains(&Recorded::TrackSelection(
            "Monza".into(),
            "Red Racer".into(),
        )) && p
            .display_log
            .events
            .contains(&Recorded::RaceCommand(RaceCommand::Pause))
    }));
}

#[test]
fn test_handshake_names_peers() {
    let mut pair = Pair::new();
    pair.connect();

    let controller_id = pair.controller.identity().id();
    assert!(pair.pump_until(|p| {
        p.display
            .peers()
            .iter()
            .any(|s| s.identity.id() == controller_id && s.identity.display_name() == "Pad")
    }));
}

#[test]
fn test_second_invite_while_pending_is_rejected() {
    let mut pair = Pair::new();
    let display_id = pair.display.identity().id();
    assert!(pair.pump_until(|p| !p.controller.browser().unwrap().discovered().is_empty()));

    let browser = pair.controller.browser().unwrap().clone();
    browser.invite(display_id).unwrap();
    assert_eq!(
        browser.invite(display_id),
        Err(InviteError::InviteAlreadyPending)
    );

    // The first invitation still goes through
    assert!(pair.pump_until(|p| p.controller_log.connected() == 1));
    assert_eq!(pair.display_log.connected(), 1);
}

#[test]
fn test_controller_leaving_disconnects_display_once() {
    let mut pair = Pair::new();
    pair.connect();
    pair.display_log.take();

    pair.controller.stop();
    assert!(pair.pump_until(|p| p.display_log.disconnected() == 1));

    std::thread::sleep(Duration::from_millis(100));
    pair.pump();
    assert_eq!(pair.display_log.disconnected(), 1);
    assert_eq!(pair.controller_log.disconnected(), 1);

    pair.display.send_race_state(1, 1.0, 1);
    pair.pump();
    assert!(
        pair.display_log
            .errors()
            .contains(&NetError::SendFailed(SendError::NoConnectedPeers))
    );
}

#[test]
fn test_silent_controller_times_out() {
    let mut display = start_display("Display");
    let mut log = RecordingDelegate::default();
    let fake = RawPeer::new("Ghost");

    fake.invite(display_addr(&display), 7);
    fake.expect(|p| matches!(p, Packet::InviteAccept { nonce: 7, .. }));

    // Never answer a ping
    assert!(wait_until(WAIT, || {
        display.dispatch(&mut log);
        log.disconnected() == 1
    }));
    std::thread::sleep(Duration::from_millis(100));
    display.dispatch(&mut log);

    assert_eq!(
        log.events,
        vec![
            Recorded::Connected("Ghost".into()),
            Recorded::Disconnected("Ghost".into()),
        ]
    );
}

#[test]
fn test_stopped_advertiser_rejects_raw_invite() {
    let display = start_display("Display");
    display.advertiser().unwrap().stop();

    let fake = RawPeer::new("Late");
    fake.invite(display_addr(&display), 11);
    let reply = fake.expect(|p| matches!(p, Packet::InviteReject { .. }));

    assert_eq!(
        reply,
        Packet::InviteReject {
            nonce: 11,
            reason: RejectReason::NotAdvertising,
        }
    );
    assert_eq!(display.session().connected_count(), 0);
}

#[test]
fn test_wrong_service_is_rejected() {
    let display = start_display("Display");
    let fake = RawPeer::new("Stranger");

    fake.send(
        display_addr(&display),
        &Packet::Invite {
            service_id: "other-game".to_string(),
            identity: fake.identity.clone(),
            nonce: 3,
        },
    );
    let reply = fake.expect(|p| matches!(p, Packet::InviteReject { .. }));
    assert_eq!(
        reply,
        Packet::InviteReject {
            nonce: 3,
            reason: RejectReason::ServiceMismatch,
        }
    );
}

#[test]
fn test_invite_to_stopped_advertiser_reports_rejection() {
    let mut pair = Pair::new();
    let display_id = pair.display.identity().id();
    assert!(pair.pump_until(|p| !p.controller.browser().unwrap().discovered().is_empty()));

    pair.display.advertiser().unwrap().stop();
    pair.controller.browser().unwrap().invite(display_id).unwrap();

    assert!(pair.pump_until(|p| !p.controller_log.errors().is_empty()));
    assert_eq!(
        pair.controller_log.errors(),
        vec![NetError::InviteRejected {
            peer: display_id,
            reason: RejectReason::NotAdvertising,
        }]
    );
    assert_eq!(pair.controller_log.connected(), 0);
    assert_eq!(pair.controller.browser().unwrap().pending_invite(), None);
}

#[test]
fn test_shutdown_delivers_disconnects() {
    let mut pair = Pair::new();
    pair.connect();

    let Pair {
        display,
        controller,
        mut display_log,
        ..
    } = pair;

    display.shutdown(&mut display_log);
    assert_eq!(display_log.disconnected(), 1);
    drop(controller);
}

#[test]
fn test_display_readvertises_after_loss() {
    let mut pair = Pair::new();
    pair.connect();

    pair.controller.stop();
    // The new cycle starts on the driver thread just after the disconnect
    assert!(pair.pump_until(|p| {
        p.display_log.disconnected() == 1
            && p.display.session().cycle() == 1
            && p.display.advertiser().unwrap().is_advertising()
    }));
    assert_eq!(pair.display.status(), ServiceStatus::Advertising);

    let replacement = start_controller("Spare", &pair.display);
    pair.controller = replacement;
    pair.controller_log = RecordingDelegate::default();
    pair.connect();
    assert_eq!(pair.display_log.connected(), 2);
}

#[test]
fn test_browser_restart_discards_old_cycle() {
    let mut pair = Pair::new();
    assert!(pair.pump_until(|p| !p.controller.peers().is_empty()));
    assert_eq!(pair.controller.session().cycle(), 0);

    // Nobody announces itself in the new cycle
    pair.display.advertiser().unwrap().stop();
    std::thread::sleep(Duration::from_millis(100));

    let browser = pair.controller.browser().unwrap().clone();
    browser.stop();
    browser.start();

    assert!(pair.pump_until(|p| p.controller.session().cycle() == 1));
    assert!(pair.controller.peers().is_empty());
    assert!(browser.discovered().is_empty());
    assert!(browser.is_browsing());
}

#[test]
fn test_advertiser_restart_drops_connected_controller() {
    let mut pair = Pair::new();
    pair.connect();
    let advertiser = pair.display.advertiser().unwrap().clone();
    assert!(!advertiser.is_advertising());

    advertiser.stop();
    advertiser.start();

    assert!(pair.pump_until(|p| {
        p.display.session().cycle() == 1
            && p.display_log.disconnected() == 1
            && p.controller_log.disconnected() == 1
    }));
    assert!(pair.display.peers().is_empty());
    assert_eq!(advertiser.accepted_count(), 0);
    assert!(advertiser.is_advertising());
    assert_eq!(pair.display.status(), ServiceStatus::Advertising);
}

#[test]
fn test_first_start_keeps_cycle_zero() {
    let display = start_display("Display");
    let advertiser = display.advertiser().unwrap();
    advertiser.start();
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(display.session().cycle(), 0);
    assert!(advertiser.is_advertising());
}

// ============================================================================
// Invitation edge cases
// ============================================================================

#[test]
fn test_unanswered_invite_times_out() {
    let silent = RawPeer::new("Mute");
    let config = NetConfig {
        invite_timeout_ms: 300,
        discovery_expiry_ms: 5_000,
        ..loopback_config()
    };
    let mut controller = start_controller_at("Pad", silent.addr(), config);
    let mut log = RecordingDelegate::default();

    let (_, from) = silent.expect_from(|p| matches!(p, Packet::Probe { .. }));
    silent.announce(from);
    let browser = controller.browser().unwrap().clone();
    assert!(wait_until(WAIT, || !browser.discovered().is_empty()));

    let display_id = silent.identity.id();
    browser.invite(display_id).unwrap();
    silent.expect(|p| matches!(p, Packet::Invite { .. }));

    assert!(wait_until(WAIT, || {
        controller.dispatch(&mut log);
        !log.errors().is_empty()
    }));
    assert_eq!(log.errors(), vec![NetError::InviteTimeout { peer: display_id }]);
    assert_eq!(log.connected(), 0);
    assert_eq!(browser.pending_invite(), None);
    assert_eq!(
        controller.session().state_of(display_id),
        Some(PeerConnectionState::NotConnected)
    );
    assert!(browser.is_browsing());
}

#[test]
fn test_matching_cancel_drops_accepted_controller() {
    // Long enough that the silent fake is never timed out here
    let config = NetConfig {
        peer_timeout_ms: 5_000,
        ..loopback_config()
    };
    let mut display = start_display_with("Display", config);
    let mut log = RecordingDelegate::default();
    let fake = RawPeer::new("Fickle");
    let addr = display_addr(&display);

    fake.invite(addr, 21);
    fake.expect(|p| matches!(p, Packet::InviteAccept { nonce: 21, .. }));
    assert!(wait_until(WAIT, || {
        display.dispatch(&mut log);
        log.connected() == 1
    }));

    // Cancelling some other invitation changes nothing
    fake.send(addr, &Packet::InviteCancel { nonce: 99 });
    std::thread::sleep(Duration::from_millis(100));
    display.dispatch(&mut log);
    assert_eq!(log.disconnected(), 0);
    assert_eq!(display.session().connected_count(), 1);

    fake.send(addr, &Packet::InviteCancel { nonce: 21 });
    assert!(wait_until(WAIT, || {
        display.dispatch(&mut log);
        log.disconnected() == 1
    }));
    assert_eq!(display.session().connected_count(), 0);
    assert!(wait_until(WAIT, || {
        display.advertiser().unwrap().is_advertising()
    }));
}

#[test]
fn test_stopped_browser_cancels_and_refuses_late_accept() {
    let slow = RawPeer::new("Slow");
    let mut controller = start_controller_at("Pad", slow.addr(), loopback_config());
    let mut log = RecordingDelegate::default();

    let (_, from) = slow.expect_from(|p| matches!(p, Packet::Probe { .. }));
    slow.announce(from);
    let browser = controller.browser().unwrap().clone();
    assert!(wait_until(WAIT, || !browser.discovered().is_empty()));

    browser.invite(slow.identity.id()).unwrap();
    let Packet::Invite { nonce, .. } = slow.expect(|p| matches!(p, Packet::Invite { .. })) else {
        panic!("expected an invitation");
    };

    browser.stop();
    slow.expect(|p| *p == Packet::InviteCancel { nonce });

    // The answer crossed the cancel on the wire
    slow.send(
        from,
        &Packet::InviteAccept {
            identity: slow.identity.clone(),
            nonce,
        },
    );
    slow.expect(|p| *p == Packet::Goodbye);

    std::thread::sleep(Duration::from_millis(100));
    controller.dispatch(&mut log);
    assert_eq!(log.connected(), 0);
    assert_eq!(controller.session().connected_count(), 0);
}

#[test]
fn test_auto_invite_connects() {
    let display = start_display("Display");
    let config = NetConfig {
        auto_invite: true,
        ..loopback_config()
    };
    let controller = start_controller_with("Auto", &display, config);
    let mut pair = Pair {
        display,
        controller,
        display_log: RecordingDelegate::default(),
        controller_log: RecordingDelegate::default(),
    };

    assert!(pair.pump_until(|p| {
        p.display_log.connected() == 1 && p.controller_log.connected() == 1
    }));
}

#[test]
fn test_capacity_rejects_extra_controller() {
    let config = NetConfig {
        max_controllers: 2,
        ..loopback_config()
    };
    let mut display = start_display_with("Display", config);
    let display_id = display.identity().id();
    let mut controllers: Vec<_> = ["One", "Two", "Three"]
        .iter()
        .map(|name| start_controller(name, &display))
        .collect();
    let mut logs: Vec<_> = (0..3).map(|_| RecordingDelegate::default()).collect();
    let mut display_log = RecordingDelegate::default();

    assert!(wait_until(WAIT, || {
        controllers
            .iter()
            .all(|c| c.browser().unwrap().discovered().iter().any(|d| d.id() == display_id))
    }));

    for controller in &controllers[..2] {
        controller.browser().unwrap().invite(display_id).unwrap();
    }
    assert!(wait_until(WAIT, || {
        display.dispatch(&mut display_log);
        display_log.connected() == 2
    }));
    assert!(!display.advertiser().unwrap().is_advertising());

    controllers[2].browser().unwrap().invite(display_id).unwrap();
    assert!(wait_until(WAIT, || {
        controllers[2].dispatch(&mut logs[2]);
        !logs[2].errors().is_empty()
    }));
    assert_eq!(
        logs[2].errors(),
        vec![NetError::InviteRejected {
            peer: display_id,
            reason: RejectReason::Full,
        }]
    );

    for (controller, log) in controllers.iter_mut().zip(logs.iter_mut()) {
        controller.dispatch(log);
    }
    assert_eq!(logs[0].connected() + logs[1].connected(), 2);
}

#[test]
fn test_bind_conflict_reports_discovery_failed() {
    let first = start_display("First");
    let config = NetConfig {
        discovery_port: display_addr(&first).port(),
        ..loopback_config()
    };
    let mut second = start_display_with("Second", config);
    let mut log = RecordingDelegate::default();

    second.dispatch(&mut log);
    assert!(matches!(log.events.as_slice(), [Recorded::DiscoveryFailed(_)]));
    assert_eq!(second.local_addr(), None);
    assert_eq!(second.status(), ServiceStatus::Idle);

    second.send_race_state(1, 0.0, 0);
    second.dispatch(&mut log);
    assert_eq!(
        log.errors(),
        vec![NetError::SendFailed(SendError::NoConnectedPeers)]
    );
}

#[test]
fn test_status_follows_lifecycle() {
    let mut pair = Pair::new();
    assert_eq!(pair.display.status(), ServiceStatus::Advertising);
    assert_eq!(pair.controller.status(), ServiceStatus::Searching);

    pair.connect();
    assert_eq!(pair.display.status().to_string(), "Connected to Pad");

    pair.controller.stop();
    assert_eq!(pair.controller.status(), ServiceStatus::Stopped);
    pair.controller.stop();
    assert_eq!(pair.controller.status(), ServiceStatus::Stopped);
}

#[test]
fn test_roles_expose_matching_discovery() {
    let display = start_display("Display");
    let controller = start_controller("Pad", &display);

    assert_eq!(display.role(), Role::Display);
    assert!(display.advertiser().is_some() && display.browser().is_none());
    assert_eq!(controller.role(), Role::Controller);
    assert!(controller.browser().is_some() && controller.advertiser().is_none());
}
