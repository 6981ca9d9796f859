//! `aimotion-cli` – AIMotion Link entry point
//!
//! This binary wires the stack together and runs it until Ctrl-C:
//!
//! 1. Loads `~/.aimotion/config.toml`, writing the defaults when the file is
//!    absent.
//! 2. Registers the configured drone (simulated) in a [`DroneRegistry`].
//! 3. Spawns the [`PoseRelay`] on the event bus's motion-capture topic.
//! 4. Serves the command protocol with [`TrajectoryServer`].

mod config;

use std::sync::Arc;

use colored::Colorize;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use aimotion_hal::sim::{SIM_MEMORY_SIZE, SimBroadcaster, SimDrone};
use aimotion_hal::{DroneRegistry, PartitionWriter};
use aimotion_middleware::{EventBus, PoseRelay, Topic};
use aimotion_server::TrajectoryServer;
use aimotion_types::{AimError, EventPayload};

#[tokio::main]
async fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the filter (default "info"); AIMOTION_LOG_FORMAT=json
    // switches to newline-delimited JSON.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("AIMOTION_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    print_banner();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_signal.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => write_default_config(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    if let Err(e) = run(cfg, shutdown).await {
        error!(error = %e, "aimotion stopped with an error");
        println!("{}: {}", "Fatal".red().bold(), e);
        std::process::exit(1);
    }
    println!("{}", "  ✓ Exiting AIMotion.".green());
}

async fn run(cfg: config::Config, shutdown: Arc<Notify>) -> Result<(), AimError> {
    let writer = PartitionWriter::new(cfg.partition_table(SIM_MEMORY_SIZE)?);
    let flight = cfg.flight_slots()?;

    let mut registry = DroneRegistry::new();
    registry.register(SimDrone::new(cfg.drone_id.clone()));

    let bus = EventBus::default();

    // Nothing in this binary produces mocap frames. The motion-capture
    // client (the tracking-system bridge feeding `EventPayload::MocapFrame`)
    // publishes them on `Topic::MotionCapture`; until one is attached the
    // relay idles.
    let relay = PoseRelay::new(
        Arc::new(SimBroadcaster::new()),
        cfg.broadcast_port,
        cfg.broadcast_channel,
    );
    tokio::spawn(relay.run(bus.subscribe_to(Topic::MotionCapture)));
    tokio::spawn(log_flight_events(bus.clone()));

    let server = TrajectoryServer::new(registry, writer, flight)
        .with_port(cfg.tcp_port)
        .with_bus(bus)
        .with_settings(cfg.session_settings());

    println!(
        "  Listening for commands on port {} (drone {})\n",
        cfg.tcp_port.to_string().bold(),
        cfg.drone_id.bold()
    );

    tokio::select! {
        result = server.run() => result,
        _ = shutdown.notified() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}

/// Log what the drone is flying.
async fn log_flight_events(bus: EventBus) {
    let mut events = bus.subscribe_to(Topic::FlightEvents);
    drop(bus);
    while let Ok(event) = events.recv().await {
        match event.payload {
            EventPayload::TrajectoryActivated { drone_id, slot, mode } => {
                info!(drone = %drone_id, slot, %mode, "trajectory activated");
            }
            EventPayload::DroneFault { drone_id, message } => {
                warn!(drone = %drone_id, %message, "drone fault");
            }
            EventPayload::MocapFrame(_) => {}
        }
    }
}

fn write_default_config() -> config::Config {
    let mut cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} No configuration found, defaults saved to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║            AIMotion Link             ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  {} {}",
        "AIMotion Link".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Drone command & trajectory streaming");
    println!();
}
