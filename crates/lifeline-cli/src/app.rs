//! Boot sequence and the wired-up Lifeline stack.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use lifeline_kernel::{Clock, SystemClock};
use lifeline_memory::{EventLog, StateStore};
use lifeline_middleware::sim::{SimBattery, SimLocation};
use lifeline_middleware::{
    AlarmScheduler, MessagingChannel, TokioAlarmScheduler, TokioWorkScheduler, WebhookChannel,
    WorkScheduler,
};
use lifeline_runtime::{Agent, DmsController, Escalator, HeartbeatTask, PolicyEngine};
use lifeline_types::{DmsEvent, LifelineError};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::Config;
use crate::console::{ConsoleChannel, ConsoleNotifier, ConsolePresence};

/// Battery level the simulator starts at.
const INITIAL_BATTERY_PCT: u8 = 80;

pub struct App {
    pub agent: Arc<Agent>,
    pub log: Arc<EventLog>,
    pub battery: Arc<SimBattery>,
    pub location: Arc<SimLocation>,
    pub keep_alive: Arc<ConsolePresence>,
    pub panic_presence: Arc<ConsolePresence>,
    pub alarms: Arc<TokioAlarmScheduler>,
    pub work: Arc<TokioWorkScheduler>,
    /// Where outbound messages go, for display.
    pub channel_label: String,
    // Dropped last: scheduler tasks live on it.
    runtime: Runtime,
}

impl App {
    /// Open storage, start the schedulers, wire the agent and restore state.
    pub fn boot(cfg: &Config) -> Result<App, String> {
        println!();
        println!("{}", "═══════════════════════════════════════".bold());
        println!("{}", "        Lifeline Boot Sequence         ".bold().cyan());
        println!("{}", "═══════════════════════════════════════".bold());

        // ── Step 1 – State store ───────────────────────────────────────────
        step(1, &format!("Opening state store {}", cfg.database_path.yellow()));
        if let Some(parent) = Path::new(&cfg.database_path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| failed(&e))?;
        }
        let store = StateStore::open(&cfg.database_path).map_err(|e| failed(&e))?;
        ok();

        // ── Step 2 – Event log ─────────────────────────────────────────────
        step(2, "Opening event log");
        let log = Arc::new(EventLog::open(&cfg.database_path).map_err(|e| failed(&e))?);
        ok();

        // ── Step 3 – Schedulers ────────────────────────────────────────────
        step(3, "Starting alarm and work schedulers");
        let runtime = Runtime::new().map_err(|e| failed(&e))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel::<DmsEvent>();
        let alarms = Arc::new(TokioAlarmScheduler::new(
            runtime.handle().clone(),
            events_tx,
            cfg.exact_alarms,
        ));
        let work = Arc::new(TokioWorkScheduler::new(runtime.handle().clone()));
        if cfg.exact_alarms {
            ok();
        } else {
            println!("{}", "OK (inexact alarms)".yellow());
        }

        // ── Step 4 – Messaging channel ─────────────────────────────────────
        step(4, "Configuring messaging channel");
        let (channel, channel_label): (Arc<dyn MessagingChannel>, String) =
            if cfg.webhook_url.trim().is_empty() {
                (Arc::new(ConsoleChannel), "console".to_string())
            } else {
                let url = cfg.webhook_url.trim().to_string();
                (Arc::new(WebhookChannel::new(url.clone())), format!("webhook {url}"))
            };
        println!("{} ({})", "OK".green(), channel_label.dimmed());

        // ── Step 5 – Agent ─────────────────────────────────────────────────
        step(5, "Wiring agent");
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let battery = Arc::new(SimBattery::new(Some(INITIAL_BATTERY_PCT)));
        let location = Arc::new(SimLocation::new());
        let keep_alive = Arc::new(ConsolePresence::new("DMS keep-alive"));
        let panic_presence = Arc::new(ConsolePresence::new("Panic mode"));

        let escalator = Escalator::new(
            location.clone(),
            battery.clone(),
            channel.clone(),
            log.clone(),
            clock.clone(),
        );
        let dms = Arc::new(DmsController::new(
            store.clone(),
            alarms.clone() as Arc<dyn AlarmScheduler>,
            Arc::new(ConsoleNotifier),
            keep_alive.clone(),
            escalator,
            log.clone(),
            clock.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatTask::new(
            store.clone(),
            location.clone(),
            battery.clone(),
            channel,
            log.clone(),
            clock,
        ));
        let policy = PolicyEngine::new(
            store.clone(),
            work.clone() as Arc<dyn WorkScheduler>,
            panic_presence.clone(),
            heartbeat,
            log.clone(),
        );
        let agent = Arc::new(Agent::new(
            store.clone(),
            dms.clone(),
            policy,
            work.clone(),
            panic_presence.clone(),
            log.clone(),
        ));
        runtime.spawn(pump_events(events_rx, dms));
        sync_config(&agent, &store, cfg).map_err(|e| failed(&e))?;
        ok();

        // ── Step 6 – Restore ───────────────────────────────────────────────
        step(6, "Restoring alarms and heartbeats");
        agent.restore().map_err(|e| failed(&e))?;
        ok();

        println!("{}", "═══════════════════════════════════════".bold());
        info!(db = %cfg.database_path, channel = %channel_label, "lifeline booted");

        Ok(App {
            agent,
            log,
            battery,
            location,
            keep_alive,
            panic_presence,
            alarms,
            work,
            channel_label,
            runtime,
        })
    }

    /// Cancel timers and stop the runtime.  Durable state is left as is so the
    /// next boot can restore it.
    pub fn shutdown(self) {
        self.work.cancel_all();
        self.runtime.shutdown_timeout(std::time::Duration::from_secs(2));
    }
}

/// Route fired alarms to the controller one at a time, off the async workers.
async fn pump_events(mut events: mpsc::UnboundedReceiver<DmsEvent>, dms: Arc<DmsController>) {
    while let Some(event) = events.recv().await {
        let controller = dms.clone();
        match tokio::task::spawn_blocking(move || controller.handle(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(?event, error = %e, "DMS callback failed"),
            Err(e) => error!(?event, error = %e, "DMS callback panicked"),
        }
    }
}

/// Push the config file into the state store where it differs.
fn sync_config(agent: &Agent, store: &StateStore, cfg: &Config) -> Result<(), LifelineError> {
    let state = store.lock().agent_state()?;

    if cfg.is_configured()
        && (state.trusted_contact != cfg.trusted_contact.trim()
            || state.trigger_phrase != cfg.trigger_phrase.expose().trim())
    {
        agent.configure(&cfg.trusted_contact, cfg.trigger_phrase.expose())?;
    }
    if state.battery_capacity_mah != cfg.battery_capacity_mah {
        agent.set_battery_capacity(cfg.battery_capacity_mah)?;
    }
    if state.declared_intent != cfg.declared_intent {
        agent.set_intent(cfg.declared_intent)?;
    }
    let dms_config = cfg.dms_config()?;
    if agent.dms().config()? != dms_config {
        agent.set_dms_config(dms_config)?;
    }
    Ok(())
}

fn step(n: u8, label: &str) {
    print!("  [{n}/6] {} … ", label.bold());
    io::stdout().flush().ok();
}

fn ok() {
    println!("{}", "OK".green());
}

fn failed(e: &dyn std::fmt::Display) -> String {
    println!("{}", "FAILED".red());
    e.to_string()
}
