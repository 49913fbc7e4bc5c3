//! Controller command - drive a Display with a synthetic joystick

use anyhow::Result;
use clap::Args;
use racelink_core::{NetworkService, RaceCommand, ServiceStatus};
use racelink_shared::Role;

use crate::common::{FRAME_RATE, LogDelegate, NetArgs, parse_targets, run_frames};

/// Arguments for the controller command
#[derive(Args)]
pub struct ControllerArgs {
    #[command(flatten)]
    pub net: NetArgs,

    /// Probe these addresses instead of broadcasting (repeatable)
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// Join the first Display found
    #[arg(long)]
    pub auto_invite: bool,

    /// Send a pause/resume pair every this many seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    pub pause_every: u64,
}

/// Joystick sweeping left and right at full throttle.
fn joystick(frame: u64) -> (f32, f32) {
    let t = frame as f32 / FRAME_RATE as f32;
    ((t * std::f32::consts::TAU / 4.0).sin(), -1.0)
}

pub fn execute(args: ControllerArgs) -> Result<()> {
    let mut config = args.net.load()?;
    config.discovery_targets = parse_targets(&args.targets)?;
    config.auto_invite |= args.auto_invite;
    let auto_invite = config.auto_invite;

    let mut service = NetworkService::from_config(Role::Controller, config)?;
    let mut delegate = LogDelegate::default();
    let pause_frames = args.pause_every * u64::from(FRAME_RATE);
    let mut paused_by_us = false;

    run_frames(
        &mut service,
        &mut delegate,
        args.net.deadline(),
        |service, _delegate, frame| {
            let status = service.status();
            // Without auto-invite the player would pick; take the first
            if status == ServiceStatus::Searching && !auto_invite {
                invite_first(service);
            }

            if !matches!(status, ServiceStatus::Connected(_)) {
                return;
            }

            if pause_frames > 0 && frame % pause_frames == 0 {
                let command = if paused_by_us {
                    RaceCommand::Resume
                } else {
                    RaceCommand::Pause
                };
                service.send_race_command(command);
                paused_by_us = !paused_by_us;
            }

            let (x, y) = joystick(frame);
            service.send_control_input(x, y);
        },
    );

    service.shutdown(&mut delegate);
    Ok(())
}

fn invite_first(service: &NetworkService) {
    let Some(browser) = service.browser() else {
        return;
    };
    if browser.pending_invite().is_some() {
        return;
    }
    if let Some(display) = browser.discovered().first() {
        println!("Inviting {}", display.display_name());
        if let Err(e) = browser.invite(display.id()) {
            tracing::debug!(error = %e, "Invite not sent");
        }
    }
}
