//! REPL – Read-Eval-Print Loop for the Lifeline interactive shell.
//!
//! Supported slash-commands:
//!   /help                        – show this list
//!   /status                      – agent, DMS and heartbeat status
//!   /settings                    – interactively edit `~/.lifeline/config.toml`
//!   /arm  /disarm                – arm the agent / stop everything
//!   /intent [name]               – show or set the declared intent
//!   /dms on|off|preset <name>|set <min> <sec>
//!   /ok                          – confirm "I'm OK"
//!   /sms <sender> <body…>        – simulate an inbound message
//!   /battery <pct|unknown>       – set the simulated battery level
//!   /location <lat> <lon> | cached <lat> <lon> | off
//!   /log [n] [agent|safety|command]
//!   /export <file>               – write the event log as NDJSON
//!   /clear-log                   – empty the event log
//!   /quit | /exit                – exit the CLI

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local, Utc};
use lifeline_runtime::CommandOutcome;
use lifeline_types::{DeclaredIntent, DmsConfig, DmsPhase, LifelineError, LogCategory};

use crate::app::App;
use crate::config::{self, Config, Secret};

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(app: &App, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    let prompt = format!("{} ", "lifeline>".bold().cyan());

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        editor.add_history_entry(cmd).ok();

        let mut words = cmd.split_whitespace();
        let head = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        match head {
            "/help" => cmd_help(),
            "/status" => cmd_status(app),
            "/settings" => cmd_settings(app),
            "/arm" => report(app.agent.arm(), "Agent armed. Waiting for the trigger phrase."),
            "/disarm" => report(app.agent.disarm(), "Disarmed → all systems stopped."),
            "/intent" => cmd_intent(app, &args),
            "/dms" => cmd_dms(app, &args),
            "/ok" => report(app.agent.confirm_safe(), "Confirmed. Next check scheduled."),
            "/sms" => cmd_sms(app, &args),
            "/battery" => cmd_battery(app, &args),
            "/location" => cmd_location(app, &args),
            "/log" => cmd_log(app, &args),
            "/export" => cmd_export(app, &args),
            "/clear-log" => match app.log.clear() {
                Ok(()) => println!("{}", "✓ Event log cleared.".green()),
                Err(e) => println!("{}: {}", "Error".red(), e),
            },
            "/quit" | "/exit" => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            other => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Lifeline Commands".bold().underline());
    println!("  {}      – agent, DMS and heartbeat status", "/status".bold().cyan());
    println!("  {}    – edit ~/.lifeline/config.toml", "/settings".bold().cyan());
    println!("  {} – arm the agent / stop everything", "/arm  /disarm".bold().cyan());
    println!("  {} – show or set the declared intent", "/intent [name]".bold().cyan());
    println!(
        "  {} – dead man's switch",
        "/dms on|off|preset <frequent|balanced|relaxed>|set <min> <sec>".bold().cyan()
    );
    println!("  {}          – answer a safety check with \"I'm OK\"", "/ok".bold().cyan());
    println!("  {} – simulate an inbound message", "/sms <sender> <body…>".bold().cyan());
    println!("  {} – simulated battery level", "/battery <pct|unknown>".bold().cyan());
    println!(
        "  {} – simulated location",
        "/location <lat> <lon> | cached <lat> <lon> | off".bold().cyan()
    );
    println!("  {} – recent event log entries", "/log [n] [agent|safety|command]".bold().cyan());
    println!("  {} – export the event log as NDJSON", "/export <file>".bold().cyan());
    println!("  {}   – empty the event log", "/clear-log".bold().cyan());
    println!("  {} – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(app: &App) {
    let status = match app.agent.status() {
        Ok(status) => status,
        Err(e) => {
            println!("{}: {}", "Error reading status".red(), e);
            return;
        }
    };

    println!("{}", "Agent".bold().underline());
    println!("  Configured     : {}", flag(status.configured));
    println!("  Armed          : {}", flag(status.armed));
    println!("  Panic mode     : {}", flag(status.panic_active));
    println!("  Suspended      : {}", flag(status.suspended));
    println!("  Intent         : {}", status.declared_intent.to_string().yellow());
    match status.policy {
        Some(policy) => println!(
            "  Heartbeat      : {} every {} min",
            policy.mode.to_string().yellow(),
            policy.interval_minutes
        ),
        None => println!("  Heartbeat      : {}", "idle".dimmed()),
    }
    println!("  Last heartbeat : {}", when(status.last_heartbeat_at));
    println!("  Messages via   : {}", app.channel_label.dimmed());

    println!("{}", "Dead man's switch".bold().underline());
    let phase = match status.dms_phase {
        DmsPhase::Disabled => status.dms_phase.to_string().dimmed(),
        DmsPhase::TimeoutArmed => status.dms_phase.to_string().red().bold(),
        _ => status.dms_phase.to_string().green(),
    };
    println!("  Phase          : {}", phase);
    println!(
        "  Cadence        : check every {} min, respond within {}s",
        status.dms_config.check_interval_minutes, status.dms_config.timeout_seconds
    );
    println!("  Missed checks  : {}", status.missed_count);
    println!("  Next check     : {}", when(status.next_check_at));
    println!("  Response due   : {}", when(status.next_timeout_at));
    println!("  Last confirmed : {}", when(status.last_confirmed_at));
    println!("  Keep-alive     : {}", flag(app.keep_alive.is_active()));

    let pending: Vec<String> = app.alarms.pending().iter().map(ToString::to_string).collect();
    let units = app.work.scheduled();
    println!("{}", "Schedulers".bold().underline());
    println!("  Alarms         : {}", list(&pending));
    println!("  Work units     : {}", list(&units));
    if app.panic_presence.is_active() {
        println!("  Panic presence : {}", app.panic_presence.display().dimmed());
    }
}

fn cmd_settings(app: &App) {
    let mut cfg = load_config_or_default();

    println!("{}", "Settings Editor".bold().underline());
    println!("  (press Enter to keep the current value)");
    cfg.trusted_contact = prompt_str(
        &format!("  Trusted contact   [{}]: ", cfg.trusted_contact),
        &cfg.trusted_contact,
    );
    let shown = if cfg.trigger_phrase.is_empty() { "not set" } else { "hidden" };
    let trigger = prompt_str(&format!("  Trigger phrase    [{shown}]: "), "");
    if !trigger.is_empty() {
        cfg.trigger_phrase = Secret::from(trigger);
    }
    let intent = prompt_str(
        &format!("  Declared intent   [{}]: ", cfg.declared_intent),
        cfg.declared_intent.as_str(),
    );
    match intent.parse::<DeclaredIntent>() {
        Ok(intent) => cfg.declared_intent = intent,
        Err(e) => println!("  {} {} – keeping {}", "Warning:".yellow(), e, cfg.declared_intent),
    }
    cfg.battery_capacity_mah = prompt_u32(
        &format!("  Battery capacity  [{} mAh]: ", cfg.battery_capacity_mah),
        cfg.battery_capacity_mah,
    );
    cfg.check_interval_minutes = prompt_u32(
        &format!("  Check interval    [{} min]: ", cfg.check_interval_minutes),
        cfg.check_interval_minutes,
    );
    cfg.timeout_seconds = prompt_u32(
        &format!("  Response timeout  [{} s]: ", cfg.timeout_seconds),
        cfg.timeout_seconds,
    );
    cfg.webhook_url = prompt_str(
        &format!("  Webhook URL       [{}]: ", display_or(&cfg.webhook_url, "console")),
        &cfg.webhook_url,
    );
    if cfg.webhook_url == "-" {
        cfg.webhook_url.clear();
    }

    let dms_config = match cfg.dms_config() {
        Ok(dms_config) => dms_config,
        Err(e) => {
            println!("{}: {} – settings not saved", "Invalid cadence".red(), e);
            return;
        }
    };

    if let Err(e) = config::save(&cfg) {
        println!("{}: {}", "Error saving config".red(), e);
        return;
    }
    println!(
        "{} {}",
        "✓ Settings saved to".green(),
        config::config_path().display().to_string().bold()
    );

    let applied = apply_settings(app, &cfg, dms_config);
    if let Err(e) = applied {
        println!("{}: {}", "Error applying settings".red(), e);
    }
    println!("  {}", "Database and webhook changes apply on next start.".dimmed());
}

fn apply_settings(app: &App, cfg: &Config, dms_config: DmsConfig) -> Result<(), LifelineError> {
    if cfg.is_configured() {
        app.agent
            .configure(&cfg.trusted_contact, cfg.trigger_phrase.expose())?;
    }
    app.agent.set_battery_capacity(cfg.battery_capacity_mah)?;
    app.agent.set_intent(cfg.declared_intent)?;
    if app.agent.dms().config()? != dms_config {
        app.agent.set_dms_config(dms_config)?;
    }
    Ok(())
}

fn cmd_intent(app: &App, args: &[&str]) {
    let Some(raw) = args.first() else {
        match app.agent.status() {
            Ok(status) => println!("  Intent: {}", status.declared_intent.to_string().yellow()),
            Err(e) => println!("{}: {}", "Error".red(), e),
        }
        let names: Vec<&str> = DeclaredIntent::ALL.iter().map(DeclaredIntent::as_str).collect();
        println!("  Options: {}", names.join(", ").dimmed());
        return;
    };
    let intent = match raw.parse::<DeclaredIntent>() {
        Ok(intent) => intent,
        Err(e) => {
            println!("{}: {}", "Error".red(), e);
            return;
        }
    };
    match app.agent.set_intent(intent) {
        Ok(Some(policy)) => println!(
            "{} {} → {} every {} min",
            "✓ Intent".green(),
            intent.to_string().bold(),
            policy.mode.to_string().yellow(),
            policy.interval_minutes
        ),
        Ok(None) => println!("{} {}", "✓ Intent".green(), intent.to_string().bold()),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn cmd_dms(app: &App, args: &[&str]) {
    match args {
        ["on"] => report(app.agent.enable_dms(), "Dead man's switch enabled."),
        ["off"] => report(app.agent.disable_dms(), "Dead man's switch disabled."),
        ["preset", name] => match DmsConfig::preset(name) {
            Some(preset) => report(
                app.agent.set_dms_config(preset),
                &format!(
                    "Preset applied: check every {} min, respond within {}s.",
                    preset.check_interval_minutes, preset.timeout_seconds
                ),
            ),
            None => println!(
                "{} '{}'. Try frequent, balanced or relaxed.",
                "Unknown preset".red(),
                name.yellow()
            ),
        },
        ["set", minutes, seconds] => match DmsConfig::parse(minutes, seconds) {
            Ok(dms_config) => report(app.agent.set_dms_config(dms_config), "DMS cadence updated."),
            Err(e) => println!("{}: {}", "Error".red(), e),
        },
        _ => println!(
            "Usage: {}",
            "/dms on|off|preset <frequent|balanced|relaxed>|set <min> <sec>".bold()
        ),
    }
}

fn cmd_sms(app: &App, args: &[&str]) {
    let [sender, body @ ..] = args else {
        println!("Usage: {}", "/sms <sender> <body…>".bold());
        return;
    };
    let body = body.join(" ");
    match app.agent.handle_inbound(sender, &body) {
        Ok(CommandOutcome::Activated) => println!("{}", "🚨 Panic mode activated.".red().bold()),
        Ok(CommandOutcome::Suspended) => println!("{}", "⏸  Heartbeats paused.".yellow()),
        Ok(CommandOutcome::Rejected) => {
            println!("{}", "✗ Trigger from an unauthorized sender rejected.".red())
        }
        Ok(CommandOutcome::Ignored) => println!("{}", "Message ignored.".dimmed()),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn cmd_battery(app: &App, args: &[&str]) {
    match args {
        ["unknown"] => {
            app.battery.set(None);
            println!("  Battery: {}", "unknown".yellow());
        }
        [raw] => match raw.trim_end_matches('%').parse::<u8>() {
            Ok(pct) if pct <= 100 => {
                app.battery.set(Some(pct));
                println!("  Battery: {}", format!("{pct}%").yellow());
            }
            _ => println!("{} '{}'", "Not a battery level:".red(), raw.yellow()),
        },
        _ => println!("Usage: {}", "/battery <pct|unknown>".bold()),
    }
}

fn cmd_location(app: &App, args: &[&str]) {
    match args {
        ["off"] => {
            app.location.set_live(None);
            app.location.set_last_known(None);
            println!("  Location: {}", "unavailable".yellow());
        }
        ["cached", lat, lon] => match coords(lat, lon) {
            Some(fix) => {
                app.location.set_live(None);
                app.location.set_last_known(Some(fix));
                println!("  Location: last known {:?}", fix);
            }
            None => println!("{}", "Invalid coordinates.".red()),
        },
        [lat, lon] => match coords(lat, lon) {
            Some(fix) => {
                app.location.set_live(Some(fix));
                app.location.set_last_known(Some(fix));
                println!("  Location: live {:?}", fix);
            }
            None => println!("{}", "Invalid coordinates.".red()),
        },
        _ => println!(
            "Usage: {}",
            "/location <lat> <lon> | cached <lat> <lon> | off".bold()
        ),
    }
}

fn cmd_log(app: &App, args: &[&str]) {
    let mut limit = 20;
    let mut categories = Vec::new();
    for arg in args {
        if let Ok(n) = arg.parse::<usize>() {
            limit = n;
        } else {
            match arg.parse::<LogCategory>() {
                Ok(category) => categories.push(category),
                Err(e) => {
                    println!("{}: {}", "Error".red(), e);
                    return;
                }
            }
        }
    }

    let entries = if categories.is_empty() {
        app.log.recent(limit)
    } else {
        app.log.recent_in(&categories, limit)
    };
    match entries {
        Ok(entries) if entries.is_empty() => println!("  {}", "(no entries)".dimmed()),
        Ok(entries) => {
            for entry in entries {
                let category = match entry.category {
                    LogCategory::Safety => entry.category.to_string().red(),
                    LogCategory::Command => entry.category.to_string().magenta(),
                    LogCategory::Agent => entry.category.to_string().cyan(),
                };
                println!(
                    "  {} {:>8} {}",
                    entry
                        .timestamp
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string()
                        .dimmed(),
                    category,
                    entry.message
                );
            }
        }
        Err(e) => println!("{}: {}", "Error reading log".red(), e),
    }
}

fn cmd_export(app: &App, args: &[&str]) {
    let [path] = args else {
        println!("Usage: {}", "/export <file>".bold());
        return;
    };
    let written = app
        .log
        .export_ndjson()
        .map_err(|e| e.to_string())
        .and_then(|ndjson| std::fs::write(path, ndjson).map_err(|e| e.to_string()));
    match written {
        Ok(()) => println!("{} {}", "✓ Event log exported to".green(), path.bold()),
        Err(e) => println!("{}: {}", "Export failed".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn report(result: Result<(), LifelineError>, success: &str) {
    match result {
        Ok(()) => println!("{} {}", "✓".green().bold(), success),
        Err(e) => println!("{}: {}", "Error".red(), e),
    }
}

fn flag(on: bool) -> colored::ColoredString {
    if on { "yes".green() } else { "no".dimmed() }
}

fn when(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.with_timezone(&Local).format("%H:%M:%S").to_string(),
        None => "–".to_string(),
    }
}

fn list(items: &[String]) -> String {
    if items.is_empty() { "none".to_string() } else { items.join(", ") }
}

fn display_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() { fallback } else { value }
}

pub(crate) fn coords(lat: &str, lon: &str) -> Option<(f64, f64)> {
    let lat = lat.parse::<f64>().ok()?;
    let lon = lon.parse::<f64>().ok()?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

fn load_config_or_default() -> Config {
    match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {} – using defaults", "Config error".red(), e);
            Config::default()
        }
    }
}

/// Prompt for a u32 value.  Returns `default` when the user presses Enter.
fn prompt_u32(msg: &str, default: u32) -> u32 {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<u32>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not a number, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}
