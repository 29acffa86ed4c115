pub mod bridge;
pub mod config;
pub mod hat;
pub mod mqtt;

use crate::bridge::EventBridge;
use crate::config::{Config, Overrides};
use crate::hat::SenseHat;
use crate::mqtt::MqttMirror;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Streams Sense HAT joystick events to stdout as JSON lines.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (defaults to <config dir>/sensehat-bridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit every event, including rapid repeats
    #[arg(long, conflicts_with = "debounce_ms")]
    no_debounce: bool,

    /// Debounce window in milliseconds
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(args.verbose)?;

    let mut config = match &args.config {
        Some(path) => Config::load_required(path)?,
        None => Config::load(&Config::default_path())?,
    };
    config.apply_overrides(&Overrides {
        no_debounce: args.no_debounce,
        debounce_ms: args.debounce_ms,
    });

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("Opening Sense HAT");
    let hat = SenseHat::open(&config.device.hat_settings())
        .map_err(|e| eyre!("Failed to open Sense HAT: {}", e))?;
    info!(
        "Sense HAT ready: joystick {}, LED matrix {}",
        hat.joystick_path().display(),
        hat.framebuffer_path().display()
    );

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone())?;

    let mirror = config
        .mqtt
        .enabled
        .then(|| MqttMirror::spawn(&config.mqtt));

    // stdout carries the event stream, logs and diagnostics go to stderr
    let bridge = EventBridge::create(
        Box::new(hat),
        Box::new(std::io::stdout()),
        Box::new(std::io::stderr()),
        config.bridge_settings(),
        mirror,
    );

    let stats = bridge.start()?.run_until_cancelled(&cancel).await?;
    info!(
        "Shut down cleanly after {} polls: {} events, {} emitted, {} debounced",
        stats.polls, stats.received, stats.emitted, stats.suppressed
    );
    Ok(())
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging(if verbose { Level::DEBUG } else { Level::INFO });
    Ok(())
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Cancels `cancel` on SIGINT or SIGTERM
fn spawn_signal_listener(cancel: CancellationToken) -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        let interrupt = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, stopping"),
                Err(e) => {
                    // SIGTERM stays available
                    error!("Unable to listen for interrupts: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = interrupt => {}
            _ = terminate.recv() => info!("Terminate signal received, stopping"),
        }
        cancel.cancel();
    });
    Ok(())
}
