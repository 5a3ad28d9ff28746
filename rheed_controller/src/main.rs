//! # RHEED Beam Controller
//!
//! Serves the host over a serial line and runs the beam FSM against the
//! simulation driver. Start/stop presses are read from standard input
//! (`start`/`s`, `stop`/`x`), one per line.
//!
//! The process loops forever: open port, handshake, session, fail-safe on
//! flatline, reopen. Ctrl-C ends the loop and leaves the hardware safe.

use clap::Parser;
use rheed_common::config::{ConfigError, ConfigLoader, LogLevel};
use rheed_common::link::serial;
use rheed_controller::driver::simulation::{PanelHandle, SimulatedHardware, SimulatedPanel};
use rheed_controller::{Controller, ControllerConfig, ControllerError, SessionEnd};
use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// RHEED beam controller — exposure interlock and beam sequencer
#[derive(Parser, Debug)]
#[command(name = "rheed_controller")]
#[command(version)]
#[command(about = "Beam safety controller with exposure lockout")]
struct Args {
    /// Path to the controller configuration TOML.
    #[arg(short, long, default_value = "config/controller.toml")]
    config: PathBuf,

    /// Serial port override.
    #[arg(long)]
    port: Option<String>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let loaded = ControllerConfig::load(&args.config);
    let level = loaded
        .as_ref()
        .map_or(LogLevel::default(), |config| config.shared.log_level);
    setup_tracing(&args, level.with_verbose(args.verbose));

    info!("RHEED controller v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args, loaded) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("RHEED controller shutdown complete");
}

fn run(
    args: &Args,
    loaded: Result<ControllerConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = loaded?;
    if let Some(port) = &args.port {
        config.link.port = port.clone();
    }
    config.validate()?;
    let secret = config.resolve_secret()?;
    info!(
        "Config OK: port={}, baud={}, lockout at {} s",
        config.link.port, config.link.baud_rate, config.thresholds.locked
    );

    let (hardware, _probe) = SimulatedHardware::new();
    let (panel, buttons) = SimulatedPanel::new();
    spawn_console_panel(buttons);

    let mut controller = Controller::new(config, secret, Box::new(hardware), Box::new(panel))?;

    let running = controller.running_flag();
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let port = controller.config().link.port.clone();
    let baud = controller.config().link.baud_rate;
    let backoff = controller.config().link.reconnect;

    while running.load(Ordering::SeqCst) {
        let link = match serial::open(&port, baud) {
            Ok(link) => link,
            Err(e) => {
                warn!("{e}; retrying in {backoff:?}");
                thread::sleep(backoff);
                continue;
            }
        };

        match controller.run_session(link) {
            Ok(SessionEnd::Shutdown { .. }) => break,
            Ok(SessionEnd::Flatline { state, failsafe }) => {
                warn!(?state, ?failsafe, "Host lost, waiting for reconnection");
            }
            Err(ControllerError::Link(e)) => warn!("Session failed: {e}"),
            Err(e) => return Err(e.into()),
        }
        thread::sleep(backoff);
    }

    controller.shutdown()?;
    Ok(())
}

/// Map console lines to button presses.
fn spawn_console_panel(buttons: PanelHandle) {
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { return };
            match line.trim() {
                "start" | "s" => buttons.press_start(),
                "stop" | "x" => buttons.press_stop(),
                "" => {}
                other => warn!("Unknown panel command {other:?}; use start/s or stop/x"),
            }
        }
    });
}

/// Setup tracing subscriber at `level`, in JSON when asked.
fn setup_tracing(args: &Args, level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
