//! # RHEED Host
//!
//! Connects to the beam controller over a USB serial port and serves it
//! until Ctrl-C: handshake, session, reconnect on flatline.

use clap::Parser;
use rheed_common::config::{ConfigError, ConfigLoader, LogLevel};
use rheed_common::link::serial;
use rheed_host::classifier::{Classifier, CommandClassifier, DisabledClassifier};
use rheed_host::console::StdConsole;
use rheed_host::viewer::LogViewer;
use rheed_host::{Host, HostConfig, HostError, HostSessionEnd};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::signal;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// RHEED host — heartbeat, operator console and image review
#[derive(Parser, Debug)]
#[command(name = "rheed_host")]
#[command(version)]
#[command(about = "Operator host for the RHEED beam controller")]
struct Args {
    /// Path to the host configuration TOML.
    #[arg(short, long, default_value = "config/host.toml")]
    config: PathBuf,

    /// Serial port; discovered when omitted.
    #[arg(long)]
    port: Option<String>,

    /// Directory the camera writes captures into.
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let loaded = HostConfig::load(&args.config);
    let level = loaded
        .as_ref()
        .map_or(LogLevel::default(), |config| config.shared.log_level);
    setup_tracing(&args, level.with_verbose(args.verbose));

    info!("RHEED host v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args, loaded).await {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("RHEED host shutdown complete");
}

async fn run(
    args: &Args,
    loaded: Result<HostConfig, ConfigError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = loaded?;
    if let Some(port) = &args.port {
        config.link.port = Some(port.clone());
    }
    if let Some(dir) = &args.image_dir {
        config.session.image_dir = dir.clone();
    }
    config.validate()?;
    info!(
        "Config OK: port={}, images in {}",
        config.link.port.as_deref().unwrap_or("<auto>"),
        config.session.image_dir.display()
    );

    let classifier: Arc<dyn Classifier> = match CommandClassifier::from_config(&config.classifier)
    {
        Some(c) => Arc::new(c),
        None => {
            warn!("No classifier command configured, classification disabled");
            Arc::new(DisabledClassifier)
        }
    };
    let host = Host::new(config, Arc::new(LogViewer), classifier, Arc::new(StdConsole))?;

    let running = host.running_flag();
    let r = running.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(err) => error!("Unable to listen for shutdown signal: {err}"),
        }
        r.store(false, Ordering::SeqCst);
    });

    let backoff = host.config().link.reconnect;
    while running.load(Ordering::SeqCst) {
        let port = match &host.config().link.port {
            Some(port) => port.clone(),
            None => match serial::discover_usb_port() {
                Ok(port) => port,
                Err(e) => {
                    warn!("{e}; retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            },
        };

        let baud = host.config().link.baud_rate;
        let link = match serial::open(&port, baud) {
            Ok(link) => link,
            Err(e) => {
                warn!("{e}; retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        match host.run_session(link, &port).await {
            Ok(HostSessionEnd::Shutdown) => break,
            Ok(HostSessionEnd::Flatline) => warn!("Controller lost, reconnecting"),
            Err(HostError::Link(e)) => warn!("Session failed: {e}"),
            Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(backoff).await;
    }

    Ok(())
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
