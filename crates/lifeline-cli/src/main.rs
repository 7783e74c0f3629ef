//! `lifeline-cli` – Lifeline Command Line Interface
//!
//! This binary runs the Lifeline agent in a terminal.  It:
//!
//! 1. Checks for `~/.lifeline/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Boots the stack: SQLite state store and event log, Tokio alarm and work
//!    schedulers, messaging channel, agent, then restores any alarms and
//!    heartbeats that were live when the previous process stopped.
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/status`, `/arm`, `/dms`, `/ok`, `/sms`, `/help`, …).
//! 4. Intercepts **Ctrl-C** to stop the schedulers and exit.  Durable state is
//!    kept, so the next start picks up where this one left off.

mod app;
mod config;
mod console;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use lifeline_types::DeclaredIntent;

use crate::config::Secret;

fn main() {
    // Developer log (RUST_LOG, LIFELINE_LOG_FORMAT, OTEL_EXPORTER_OTLP_ENDPOINT).
    // User-facing output still uses println!.
    let _telemetry = lifeline_runtime::init_tracing("lifeline");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        println!("{}", "  ✓ Agent state kept for the next start.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    if !cfg.is_configured() {
        println!(
            "  {} No trusted contact or trigger phrase yet. Use {} before {}.",
            "Note:".yellow(),
            "/settings".bold(),
            "/arm".bold()
        );
    }

    // ── Boot ──────────────────────────────────────────────────────────────
    let app = match app::App::boot(&cfg) {
        Ok(app) => app,
        Err(e) => {
            println!("{}: {}", "Boot failed".red().bold(), e);
            std::process::exit(1);
        }
    };
    drop(cfg);

    println!();
    println!(
        "  Type {} for a list of commands.\n",
        "/help".bold().cyan()
    );

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&app, shutdown);
    app.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      Lifeline First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Lifeline.\n");

    let mut cfg = config::Config::default();

    cfg.trusted_contact = repl::prompt_str("  Trusted contact (phone number): ", "");
    println!("  The trigger phrase activates live tracking when your contact sends it.");
    println!("  Sending it with {} pauses tracking again.", "-STOP".bold());
    cfg.trigger_phrase = Secret::from(repl::prompt_str("  Trigger phrase: ", ""));

    println!("  What are you up to?");
    for (i, intent) in DeclaredIntent::ALL.iter().enumerate() {
        println!("    {}) {}", i + 1, intent);
    }
    let choice = repl::prompt_str("  Enter choice [1]: ", "1");
    cfg.declared_intent = choice
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| DeclaredIntent::ALL.get(i).copied())
        .unwrap_or_default();

    let webhook = repl::prompt_str("  Webhook URL for outbound messages [console]: ", "");
    cfg.webhook_url = webhook;

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __   _ ___     ___         "#.bold().cyan());
    println!("{}", r#"  / /  (_) _/__  / (_)__  ___ "#.bold().cyan());
    println!("{}", r#" / /__/ / _/ -_)/ / / _ \/ -_)"#.bold().cyan());
    println!("{}", r#"/____/_/_/ \__//_/_/_//_/\__/ "#.bold().cyan());
    println!();
    println!("  {} {}",
        "Lifeline".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Personal safety agent");
    println!();
}
