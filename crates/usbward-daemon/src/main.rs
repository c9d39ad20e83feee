//! usbward-daemon - USB device authorization daemon.
//!
//! Long-lived service: binds the channel socket, waits for the kernel-side
//! enforcement point to open a session, and answers device announcements
//! with authorization decisions until told goodbye; then waits for the next
//! session. Only a channel bind failure at startup is fatal. A termination
//! signal (SIGTERM/SIGINT) shuts the daemon down cleanly with exit code 0,
//! releasing the channel socket and the fingerprint store on the way out.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use usbward_daemon::channel::{default_peer_socket_path, default_socket_path, ChannelConfig};
use usbward_daemon::engine::{BenchVariant, DecisionMode, EngineConfig, PolicyEngine};
use usbward_daemon::frontend::CommandFrontend;
use usbward_daemon::redirect::{CommandQuarantine, RedirectController};
use usbward_daemon::session::Session;

/// usbward daemon - USB device authorization
#[derive(Parser, Debug)]
#[command(name = "usbward-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable professional mode (per-interface technical decisions)
    #[arg(short = 'p', long = "pro")]
    pro: bool,

    /// Enable debug mode (full message dumps)
    #[arg(short = 'd', long)]
    debug: bool,

    /// Path to configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Path to the daemon's channel socket
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Path to the enforcement point's channel socket
    #[arg(long)]
    peer_socket: Option<PathBuf>,

    /// Path to the fingerprint store file
    #[arg(long)]
    store: Option<PathBuf>,

    /// Consent front-end command, launched per decision
    #[arg(long, default_value = "usbward-consent")]
    consent_cmd: PathBuf,

    /// Quarantine hand-off command for denied devices
    #[arg(long, default_value = "usbward-quarantine")]
    quarantine_cmd: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Answer every announcement immediately with an all-enabled decision.
    ///
    /// Hidden benchmarking switch: measures protocol round-trip cost
    /// without a human in the loop.
    #[arg(long, hide = true, conflicts_with = "bench_deny")]
    bench_allow: bool,

    /// Answer every announcement immediately with a denial (exercises the
    /// quarantine path).
    #[arg(long, hide = true)]
    bench_deny: bool,
}

/// Default fingerprint store path.
///
/// `$XDG_STATE_HOME/usbward/fingerprints.dat` when the state directory is
/// set, `/var/lib/usbward/fingerprints.dat` otherwise.
fn default_store_path() -> PathBuf {
    std::env::var("XDG_STATE_HOME").map_or_else(
        |_| PathBuf::from("/var/lib/usbward/fingerprints.dat"),
        |dir| PathBuf::from(dir).join("usbward").join("fingerprints.dat"),
    )
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.config.is_some() {
        warn!("configuration files are not supported yet, ignoring --config");
    }

    let mode = if args.pro {
        DecisionMode::Professional
    } else {
        DecisionMode::Simplified
    };
    let bench = if args.bench_deny {
        Some(BenchVariant::Deny)
    } else if args.bench_allow {
        Some(BenchVariant::Allow)
    } else {
        None
    };
    if bench.is_some() {
        warn!("benchmarking mode is active, the consent front-end will not be invoked");
    }

    let channel_config = ChannelConfig::new(
        args.socket.unwrap_or_else(default_socket_path),
        args.peer_socket.unwrap_or_else(default_peer_socket_path),
    );
    let store_path = args.store.unwrap_or_else(default_store_path);

    let engine = PolicyEngine::new(EngineConfig { mode, bench });
    let redirect = RedirectController::new(Box::new(CommandQuarantine::new(args.quarantine_cmd)));
    let mut consent = CommandFrontend::new(args.consent_cmd);

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register the SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to register the SIGINT handler")?;

    info!(
        mode = ?mode,
        socket = %channel_config.local_path.display(),
        peer = %channel_config.peer_path.display(),
        store = %store_path.display(),
        "usbward daemon starting"
    );

    loop {
        // A bind failure is the one startup error that aborts the process.
        let mut session = Session::establish(channel_config.clone(), &store_path, args.debug)
            .context("failed to bind the channel socket")?;

        let mut shutdown = false;
        tokio::select! {
            result = session.run(&engine, &redirect, &mut consent) => match result {
                Ok(()) => info!("closing the current session"),
                Err(e) => warn!("session ended: {e}"),
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                shutdown = true;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                shutdown = true;
            }
        }
        session.teardown();

        if shutdown {
            info!("usbward daemon stopped");
            return Ok(());
        }
    }
}
