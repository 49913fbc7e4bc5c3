//! Arguments and helpers shared by both roles

use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use racelink_core::config::{self, CONFIG_FILE_NAME};
use racelink_core::{NetConfig, NetError, NetworkDelegate, NetworkService, RaceCommand};
use racelink_shared::PeerIdentity;

/// Frame rate of the simulated game loop
pub const FRAME_RATE: u32 = 60;

/// Network options common to both roles
#[derive(Args, Clone)]
pub struct NetArgs {
    /// Display name shown to the other side
    #[arg(short, long)]
    pub name: Option<String>,

    /// Config file (defaults to racelink.toml in the platform config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Discovery port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Stop after this many seconds (runs until killed by default)
    #[arg(long)]
    pub seconds: Option<u64>,
}

impl NetArgs {
    /// File config overlaid with command-line flags.
    pub fn load(&self) -> Result<NetConfig> {
        let mut config = match &self.config {
            Some(path) => NetConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => config::load(),
        };
        if let Some(name) = &self.name {
            config.display_name = name.clone();
        }
        if let Some(port) = self.port {
            config.discovery_port = port;
        }
        Ok(config)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.seconds
            .map(|s| Instant::now() + Duration::from_secs(s))
    }
}

/// Parse `host:port` discovery targets.
pub fn parse_targets(targets: &[String]) -> Result<Vec<SocketAddr>> {
    targets
        .iter()
        .map(|t| {
            t.parse()
                .with_context(|| format!("invalid target address '{t}'"))
        })
        .collect()
}

pub fn print_config(args: &NetArgs) -> Result<()> {
    let config = args.load()?;
    if args.config.is_none()
        && let Some(dir) = config::config_dir()
    {
        println!("# {}", dir.join(CONFIG_FILE_NAME).display());
    }
    print!(
        "{}",
        toml::to_string_pretty(&config).context("serializing config")?
    );
    Ok(())
}

/// Run `frame` at [`FRAME_RATE`] until the deadline passes.
///
/// The service is drained before every frame, the way a game would at the
/// top of its update.
pub fn run_frames<D: NetworkDelegate>(
    service: &mut NetworkService,
    delegate: &mut D,
    deadline: Option<Instant>,
    mut frame: impl FnMut(&mut NetworkService, &mut D, u64),
) {
    let frame_time = Duration::from_secs(1) / FRAME_RATE;
    let mut count = 0u64;
    let mut last_status = String::new();

    while deadline.is_none_or(|d| Instant::now() < d) {
        let start = Instant::now();

        service.dispatch(delegate);
        frame(service, delegate, count);
        count += 1;

        let status = service.status().to_string();
        if status != last_status {
            println!("[{}] {status}", service.role());
            last_status = status;
        }

        if let Some(rest) = frame_time.checked_sub(start.elapsed()) {
            thread::sleep(rest);
        }
    }
}

/// Logs every callback; the roles layer their own state on top.
#[derive(Default)]
pub struct LogDelegate {
    pub connected: Vec<PeerIdentity>,
    pub paused: bool,
    pub quit: bool,
}

impl NetworkDelegate for LogDelegate {
    fn peer_connected(&mut self, peer: &PeerIdentity) {
        tracing::info!(%peer, "Peer connected");
        self.connected.push(peer.clone());
    }

    fn peer_disconnected(&mut self, peer: &PeerIdentity) {
        tracing::info!(%peer, "Peer disconnected");
        self.connected.retain(|p| p != peer);
        // A race in progress waits for its controller
        self.paused = true;
    }

    fn did_receive_control_input(&mut self, from: &PeerIdentity, velocity_x: f32, velocity_y: f32) {
        tracing::debug!(from = from.display_name(), velocity_x, velocity_y, "Control input");
    }

    fn did_receive_race_state(
        &mut self,
        from: &PeerIdentity,
        lap: u32,
        elapsed_time: f64,
        waypoint_index: u32,
    ) {
        tracing::debug!(
            from = from.display_name(),
            lap,
            elapsed_time,
            waypoint_index,
            "Race state"
        );
    }

    fn discovery_failed(&mut self, reason: &str) {
        tracing::error!(reason, "Discovery failed");
    }

    fn did_receive_track_selection(&mut self, from: &PeerIdentity, track: &str, car: &str) {
        tracing::info!(from = from.display_name(), track, car, "Track selected");
    }

    fn did_receive_race_command(&mut self, from: &PeerIdentity, command: RaceCommand) {
        tracing::info!(from = from.display_name(), ?command, "Race command");
        match command {
            RaceCommand::Pause => self.paused = true,
            RaceCommand::Resume => self.paused = false,
            RaceCommand::Quit => self.quit = true,
        }
    }

    fn peer_found(&mut self, peer: &PeerIdentity) {
        tracing::info!(%peer, "Display found");
    }

    fn peer_lost(&mut self, peer: &PeerIdentity) {
        tracing::info!(%peer, "Display lost");
    }

    fn network_error(&mut self, error: &NetError) {
        tracing::warn!(%error, "Network error");
    }
}
