//! Display command - host a simulated race

use anyhow::{Result, bail};
use clap::Args;
use racelink_core::{NetError, NetworkDelegate, NetworkService, RaceCommand, ServiceStatus};
use racelink_shared::{PeerIdentity, Role};

use crate::common::{FRAME_RATE, LogDelegate, NetArgs, run_frames};

/// Arguments for the display command
#[derive(Args)]
pub struct DisplayArgs {
    #[command(flatten)]
    pub net: NetArgs,

    /// Controllers to accept before advertising stops
    #[arg(long)]
    pub max_controllers: Option<usize>,

    /// Track announced to controllers on connect
    #[arg(long, default_value = "Harbour Loop")]
    pub track: String,

    /// Car announced to controllers on connect
    #[arg(long, default_value = "Roadster")]
    pub car: String,

    /// Waypoints per lap of the simulated track
    #[arg(long, default_value_t = 12)]
    pub waypoints: u32,
}

/// Race progress driven by the controller's joystick.
struct Race {
    lap: u32,
    elapsed: f64,
    distance: f64,
    waypoints: u32,
}

impl Race {
    fn new(waypoints: u32) -> Self {
        Self {
            lap: 1,
            elapsed: 0.0,
            distance: 0.0,
            waypoints: waypoints.max(1),
        }
    }

    fn advance(&mut self, speed: f32) {
        self.elapsed += 1.0 / f64::from(FRAME_RATE);
        self.distance += f64::from(speed.clamp(0.0, 1.0)) / f64::from(FRAME_RATE);
        let per_lap = f64::from(self.waypoints);
        while self.distance >= per_lap {
            self.distance -= per_lap;
            self.lap += 1;
            tracing::info!(lap = self.lap, elapsed = self.elapsed, "Lap");
        }
    }

    fn waypoint(&self) -> u32 {
        self.distance as u32
    }
}

/// Remembers the last joystick vector next to the logging delegate.
#[derive(Default)]
struct DisplayDelegate {
    log: LogDelegate,
    throttle: f32,
    greeted: Vec<PeerIdentity>,
}

impl NetworkDelegate for DisplayDelegate {
    fn peer_connected(&mut self, peer: &PeerIdentity) {
        self.log.peer_connected(peer);
        self.log.paused = false;
    }

    fn peer_disconnected(&mut self, peer: &PeerIdentity) {
        self.log.peer_disconnected(peer);
        self.greeted.retain(|p| p != peer);
        self.throttle = 0.0;
    }

    fn did_receive_control_input(&mut self, from: &PeerIdentity, velocity_x: f32, velocity_y: f32) {
        self.log.did_receive_control_input(from, velocity_x, velocity_y);
        self.throttle = -velocity_y;
    }

    fn did_receive_race_state(
        &mut self,
        from: &PeerIdentity,
        lap: u32,
        elapsed_time: f64,
        waypoint_index: u32,
    ) {
        self.log
            .did_receive_race_state(from, lap, elapsed_time, waypoint_index);
    }

    fn discovery_failed(&mut self, reason: &str) {
        self.log.discovery_failed(reason);
    }

    fn did_receive_race_command(&mut self, from: &PeerIdentity, command: RaceCommand) {
        self.log.did_receive_race_command(from, command);
    }

    fn network_error(&mut self, error: &NetError) {
        self.log.network_error(error);
    }
}

pub fn execute(args: DisplayArgs) -> Result<()> {
    let mut config = args.net.load()?;
    if let Some(max) = args.max_controllers {
        config.max_controllers = max;
    }

    let mut service = NetworkService::from_config(Role::Display, config)?;
    let mut delegate = DisplayDelegate::default();

    // Surface a bind failure before entering the loop
    service.dispatch(&mut delegate);
    let Some(addr) = service.local_addr() else {
        bail!("could not start advertising");
    };
    println!("Display '{}' listening on {addr}", service.identity().display_name());

    let mut race = Race::new(args.waypoints);
    run_frames(
        &mut service,
        &mut delegate,
        args.net.deadline(),
        |service, delegate, frame| {
            for peer in &delegate.log.connected {
                if !delegate.greeted.contains(peer) {
                    service.send_track_selection(&args.track, &args.car);
                    delegate.greeted.push(peer.clone());
                }
            }

            if !matches!(service.status(), ServiceStatus::Connected(_)) || delegate.log.paused {
                return;
            }
            race.advance(delegate.throttle);
            // Race state at 10 Hz is plenty for a phone UI
            if frame % 6 == 0 {
                service.send_race_state(race.lap, race.elapsed, race.waypoint());
            }
        },
    );

    service.shutdown(&mut delegate);
    Ok(())
}
