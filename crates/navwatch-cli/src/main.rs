//! `navwatch-cli` – the navaid status monitor daemon.
//!
//! This binary wires the whole stack together:
//!
//! 1. Loads `navwatch.toml` (or `$NAVWATCH_CONFIG`) with the equipment
//!    descriptors and timing knobs.
//! 2. Binds one dedicated UDP socket per enabled equipment; per-equipment
//!    bind failures are reported without aborting the rest.
//! 3. Starts the periodic liveness sweep and the WebSocket fanout server.
//! 4. Intercepts **Ctrl-C** to close every socket and exit cleanly.
//!
//! `navwatch sim <port> [interval_ms]` runs a local equipment simulator
//! instead of the daemon.

mod config;
mod sim;

use std::time::Duration;

use colored::Colorize;
use navwatch_bus::EventBus;
use navwatch_fanout::FanoutServer;
use navwatch_net::SocketManager;
use navwatch_tracker::EquipmentTracker;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // Initialise tracing-subscriber using RUST_LOG (defaults to "info").
    // Set NAVWATCH_LOG_FORMAT=json to emit newline-delimited JSON logs
    // suitable for log aggregators.  Operator-facing startup output still
    // uses println! for UX consistency.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("NAVWATCH_LOG_FORMAT").as_deref() == Ok("json") {
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

    // ── Simulator subcommand ──────────────────────────────────────────────
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("sim") {
        let Some(port) = args.get(2).and_then(|p| p.parse::<u16>().ok()) else {
            eprintln!("usage: navwatch sim <port> [interval_ms]");
            std::process::exit(2);
        };
        let interval = args
            .get(3)
            .and_then(|ms| ms.parse::<u64>().ok())
            .map(Duration::from_millis);
        if let Err(e) = sim::run(port, interval).await {
            eprintln!("{}: {}", "Simulator error".red(), e);
            std::process::exit(1);
        }
        return;
    }

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            println!(
                "  No config at {}; using defaults (no equipment).",
                config::config_path().display()
            );
            config::Config::default()
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Core wiring ───────────────────────────────────────────────────────
    let tracker = EquipmentTracker::new(cfg.history_capacity);
    let bus = EventBus::default();
    let manager =
        SocketManager::new(tracker.clone(), bus.clone()).with_strict_sources(cfg.strict_sources);

    // ── Bulk socket start, reported per equipment ─────────────────────────
    let enabled = cfg.equipment.iter().filter(|d| d.enabled).count();
    let failures = manager.start(&cfg.equipment).await;
    for (id, err) in &failures {
        println!("  {} {} – {}", "✗".red(), id.bold(), err);
    }
    println!(
        "  {} of {} enabled equipment listening.\n",
        (enabled - failures.len()).to_string().green().bold(),
        enabled
    );

    // ── Background liveness sweep ─────────────────────────────────────────
    let sweeper = tracker.spawn_liveness_sweeper(
        Duration::from_millis(cfg.sweep_interval_ms),
        Duration::from_millis(cfg.liveness_timeout_ms),
    );

    // ── Fanout server + shutdown ──────────────────────────────────────────
    let fanout = FanoutServer::new(bus.clone(), tracker.clone())
        .with_port(cfg.fanout_port)
        .with_heartbeat_interval(Duration::from_millis(cfg.heartbeat_interval_ms));
    println!(
        "  Fanout listening on {}\n",
        format!("ws://0.0.0.0:{}", cfg.fanout_port).bold().cyan()
    );

    tokio::select! {
        result = fanout.run() => {
            if let Err(e) = result {
                error!(error = %e, "fanout server failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "⚠  Ctrl-C received – closing sockets …".yellow().bold());
        }
    }

    sweeper.abort();
    manager.stop().await;
    info!("shutdown complete");
    println!("{}", "  ✓ All sockets closed.  Exiting navwatch.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      navwatch – navaid monitor       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
}
