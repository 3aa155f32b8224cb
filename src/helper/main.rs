//! seatdm-x11-helper
//!
//! Entry point for the helper binary. Spawned by the daemon with the
//! session parameters on the command line; all diagnostics go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error};

use seatdm::config::{self, Config};
use seatdm::helper::{connect, HelperInvocation, Runner};

/// Exit code for a missing or invalid mandatory argument.
const EXIT_USAGE: u8 = 127;

/// Command-line arguments for seatdm-x11-helper
#[derive(Parser, Debug)]
#[command(name = "seatdm-x11-helper")]
#[command(version, about = "seatdm X11 helper", long_about = None)]
struct Args {
    /// Channel socket path for reporting back to the daemon
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Seat name
    #[arg(long)]
    seat: Option<String>,

    /// Terminal identifier
    #[arg(long)]
    vt: Option<String>,

    /// Auth file path
    #[arg(long)]
    auth: Option<PathBuf>,

    /// Session command
    #[arg(long)]
    session: Option<String>,

    /// Enable test mode
    #[arg(long = "test-mode")]
    test_mode: bool,

    /// Configuration file path
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose);

    // Mandatory flags are checked by hand so a missing one exits with the
    // distinguished code, before any channel connection is attempted
    let Some(socket) = args.socket else {
        error!("Please specify a socket name with --socket");
        return ExitCode::from(EXIT_USAGE);
    };
    let Some(seat_name) = args.seat else {
        error!("Please specify a seat name with --seat");
        return ExitCode::from(EXIT_USAGE);
    };
    let Some(vt) = args.vt else {
        error!("Please specify a terminal identifier with --vt");
        return ExitCode::from(EXIT_USAGE);
    };
    let Ok(terminal_id) = vt.parse::<u32>() else {
        error!("Terminal identifier must be a number");
        return ExitCode::from(EXIT_USAGE);
    };
    let Some(auth_file_path) = args.auth else {
        error!("Please specify an auth file with --auth");
        return ExitCode::from(EXIT_USAGE);
    };

    let config = Arc::new(Config::load(&args.config).unwrap_or_else(|e| {
        debug!("Using built-in configuration: {:#}", e);
        Config::default_config()
    }));

    let channel = match connect(&socket).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let invocation = HelperInvocation {
        seat_name,
        terminal_id,
        auth_file_path,
        session_command: args.session,
        test_mode: args.test_mode,
    };
    let mut runner = Runner::new(config, invocation, channel);

    if let Err(e) = runner.start().await {
        error!("{:#}", e);
        runner.stop().await;
        return ExitCode::FAILURE;
    }

    match runner.supervise().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
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
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .compact()
        .init();
}
