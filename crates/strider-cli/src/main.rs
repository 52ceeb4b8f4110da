//! `strider-cli` – Strider Command Line Interface
//!
//! This binary is the ignition switch for the Strider teleop stack.  It:
//!
//! 1. Loads `~/.strider/config.toml`, writing the defaults on first run.
//! 2. Initialises tracing (console + append-only operational log file +
//!    optional OTLP export).
//! 3. Starts a [`Session`] against the robot backend, bringing up the
//!    lease keepalive and the estop endpoint.
//! 4. Serves single-character command tokens over HTTP until Ctrl-C,
//!    SIGTERM, or the quit token (`Tab`) shuts the loop down.

mod config;
mod telemetry;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use strider_console::ConsoleServer;
use strider_core::Session;
use strider_link::SimRobot;
use tokio::sync::{mpsc, watch};
use tracing::{error, warn};

fn main() -> ExitCode {
    print_banner();

    // ── Configuration Vault ───────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Structured logging ────────────────────────────────────────────────
    // Initialise tracing before the Tokio runtime exists; the telemetry
    // module relies on that ordering for its OTLP exporter choice.
    // Set STRIDER_LOG_FORMAT=json for newline-delimited JSON console logs.
    let _telemetry = telemetry::init_tracing("strider", Path::new(&cfg.log_file));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start async runtime".red());
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> ExitCode {
    // ── Shutdown signal ───────────────────────────────────────────────────
    // SIGINT/SIGTERM and the quit token all funnel into one watch flag.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let ctrlc_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Termination signal received – shutting down …".yellow().bold()
        );
        let _ = ctrlc_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Robot backend ─────────────────────────────────────────────────────
    // The vendor SDK bridge lives out of tree; the simulated robot
    // exercises the identical session stack.
    println!(
        "  Robot {} · backend: {}",
        cfg.robot_host.bold(),
        "simulated".bold()
    );
    let robot = SimRobot::new();

    // ── Session ───────────────────────────────────────────────────────────
    let mut session = Session::new(
        robot.services(),
        cfg.image_source.clone(),
        Arc::clone(&shutdown_tx),
    );
    if let Err(err) = session.start().await {
        error!(%err, "failed to initialize robot communication");
        println!("{}: {err}", "Startup failed".red());
        return ExitCode::FAILURE;
    }
    for line in session.status_lines() {
        println!("  {}", line.dimmed());
    }

    // ── Command console ───────────────────────────────────────────────────
    let (commands_tx, commands_rx) = mpsc::channel(16);
    let console = ConsoleServer::new(commands_tx).with_port(cfg.console_port);
    let console_shutdown = Arc::clone(&shutdown_tx);
    let console_handle = tokio::spawn(async move {
        let result = console.run(shutdown_rx).await;
        if let Err(err) = &result {
            error!(%err, "console server failed");
            // Without a front door there is nothing left to serve.
            let _ = console_shutdown.send(true);
        }
        result
    });
    println!(
        "  Drive with e.g. {}\n",
        format!("curl http://localhost:{}/w", cfg.console_port)
            .bold()
            .cyan()
    );

    // ── Serve until shutdown ──────────────────────────────────────────────
    session.serve(commands_rx).await;

    let console_failed = !matches!(console_handle.await, Ok(Ok(())));

    for msg in session.state().recent_messages() {
        println!("  {}", msg.dimmed());
    }
    println!("{}", "  ✓ Keepalives stopped, lease returned.".green());
    println!("{}", "  ✓ Exiting Strider.".green());

    if console_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______       _     __       "#.bold().cyan());
    println!("{}", r#"  / __/ /______(_)___/ /__ ____"#.bold().cyan());
    println!("{}", r#" _\ \/ __/ __/ / __  / -_) __/ "#.bold().cyan());
    println!("{}", r#"/___/\__/_/ /_/\__,_/\__/_/    "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Strider".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Legged-robot teleop shell");
    println!();
}
