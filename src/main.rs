//! seatdm - display-server lifecycle supervisor
//!
//! Entry point for the single-seat daemon binary: supervises one display
//! server session on one seat. Seat enumeration and multi-seat policy
//! belong to a higher-level service.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use seatdm::config::{self, Config};
use seatdm::supervisor::{create, BackendKind, SessionRequest, SupervisorEvent};

/// Command-line arguments for seatdm
#[derive(Parser, Debug)]
#[command(name = "seatdm")]
#[command(version, about = "Display-server lifecycle supervisor", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Seat to supervise
    #[arg(long, env = "SEATDM_SEAT", default_value = "seat0")]
    pub seat: String,

    /// Virtual terminal to start the display server on
    #[arg(long, env = "SEATDM_VT", default_value = "1")]
    pub vt: u32,

    /// Session command, overriding the configured one
    #[arg(long)]
    pub session: Option<String>,

    /// Run against a nested display server instead of real hardware
    #[arg(long = "test-mode")]
    pub test_mode: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    info!("seatdm v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config).unwrap_or_else(|e| {
        warn!("Failed to load config: {:#}, using defaults", e);
        Config::default_config()
    });
    config.validate()?;
    let config = Arc::new(config);

    let request = SessionRequest {
        seat_name: args.seat.clone(),
        terminal_id: args.vt,
        session_command: args.session.or_else(|| config.x11.session_command.clone()),
        test_mode: args.test_mode,
    };

    let (mut server, mut events) = create(BackendKind::X11, Arc::clone(&config), request);

    info!(
        "Supervising {} session on {} (vt {})",
        server.session_type(),
        args.seat,
        args.vt
    );
    server.start().await?;

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(SupervisorEvent::Started { display_name }) => {
                        info!("Session running on display {}", display_name);
                    }
                    Some(SupervisorEvent::ProcessExited { status }) => {
                        info!("Helper exited with status {:?}", status.and_then(|s| s.code()));
                    }
                    Some(SupervisorEvent::Stopped) | None => {
                        info!("Session stopped");
                        break;
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, stopping session");
                server.stop().await?;
            }
            _ = sigint.recv() => {
                info!("Interrupted, stopping session");
                server.stop().await?;
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .compact()
        .init();
}
