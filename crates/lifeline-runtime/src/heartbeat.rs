//! [`HeartbeatTask`] – one panic-mode status message.
//!
//! Each run is bounded: at most one message, one event-log entry and one
//! last-heartbeat update.  The task checks the agent flags twice, once before
//! gathering signals and once (under the lock) before committing, so a
//! suspension that lands while a location fix is pending still wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lifeline_kernel::confidence::{self, Confidence};
use lifeline_kernel::{Clock, policy};
use lifeline_memory::{EventLog, StateStore};
use lifeline_middleware::{BatteryReader, LocationProvider, MessagingChannel};
use lifeline_types::{AgentState, DeclaredIntent, HeartbeatPolicy, Location, LogCategory};
use tracing::{debug, info, warn};

use crate::signals::{SignalTimeouts, locate};

/// Outcome of one [`HeartbeatTask::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Not armed, suspended, or panic mode inactive.
    Skipped,
    Sent { policy: HeartbeatPolicy, confidence: Confidence },
    Failed { policy: HeartbeatPolicy, error: String },
}

impl HeartbeatOutcome {
    /// The policy the run was computed under, if it ran.
    pub fn policy(&self) -> Option<HeartbeatPolicy> {
        match self {
            HeartbeatOutcome::Skipped => None,
            HeartbeatOutcome::Sent { policy, .. } | HeartbeatOutcome::Failed { policy, .. } => {
                Some(*policy)
            }
        }
    }
}

fn heartbeat_due(state: &AgentState) -> bool {
    state.armed && state.panic_active && !state.suspended
}

/// Compose the status message sent to the trusted contact.
pub fn heartbeat_message(
    at: DateTime<Utc>,
    battery_pct: Option<u8>,
    capacity_mah: u32,
    location: Option<&Location>,
    intent: DeclaredIntent,
    policy: HeartbeatPolicy,
) -> String {
    let (battery, power) = match battery_pct {
        Some(pct) => {
            let mah = u64::from(pct) * u64::from(capacity_mah) / 100;
            (format!("🔋 {pct}%"), format!("⚡ Est. Power: {mah} mAh"))
        }
        None => (
            "🔋 Battery unknown".to_string(),
            "⚡ Est. Power: unknown".to_string(),
        ),
    };
    let place = match location {
        Some(fix) => format!("📍 {}", fix.map_link()),
        None => "📍 Location unavailable (searching…)".to_string(),
    };
    let source = location.map(|fix| fix.source.label()).unwrap_or("None");

    format!(
        "🚨 PANIC MODE ACTIVE\n\
         🕒 {time} | {battery}\n\
         {power}\n\
         \n\
         {place}\n\
         \n\
         🧠 Agent State:\n\
         Intent: {intent}\n\
         Mode: {mode}\n\
         Interval: {interval} min\n\
         \n\
         🛰️ Source: {source}",
        time = at.format("%H:%M %Z"),
        mode = policy.mode.label(),
        interval = policy.interval_minutes,
    )
}

pub struct HeartbeatTask {
    store: StateStore,
    location: Arc<dyn LocationProvider>,
    battery: Arc<dyn BatteryReader>,
    channel: Arc<dyn MessagingChannel>,
    log: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    timeouts: SignalTimeouts,
}

impl HeartbeatTask {
    pub fn new(
        store: StateStore,
        location: Arc<dyn LocationProvider>,
        battery: Arc<dyn BatteryReader>,
        channel: Arc<dyn MessagingChannel>,
        log: Arc<EventLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            location,
            battery,
            channel,
            log,
            clock,
            timeouts: SignalTimeouts::HEARTBEAT,
        }
    }

    pub fn battery(&self) -> Option<u8> {
        self.battery.percent()
    }

    pub fn run(&self) -> HeartbeatOutcome {
        let state = match self.store.lock().agent_state() {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "heartbeat could not read agent state");
                return HeartbeatOutcome::Skipped;
            }
        };
        if !heartbeat_due(&state) {
            debug!(
                armed = state.armed,
                panic = state.panic_active,
                suspended = state.suspended,
                "heartbeat skipped"
            );
            return HeartbeatOutcome::Skipped;
        }

        let location = locate(self.location.as_ref(), self.timeouts);
        let battery = self.battery.percent();
        let policy = policy::decide(state.declared_intent, battery, false);
        let now = self.clock.now();

        // Commit under the lock only if still due.
        let cold_start = {
            let mut guard = self.store.lock();
            let current = match guard.agent_state() {
                Ok(current) => current,
                Err(e) => {
                    warn!(error = %e, "heartbeat could not re-read agent state");
                    return HeartbeatOutcome::Skipped;
                }
            };
            if !heartbeat_due(&current) {
                debug!("agent state changed while gathering signals; heartbeat dropped");
                return HeartbeatOutcome::Skipped;
            }
            let previous = guard.last_heartbeat_at().unwrap_or(None);
            if let Err(e) = guard.set_last_heartbeat_at(now) {
                warn!(error = %e, "failed to record heartbeat time");
            }
            previous.is_none()
        };

        let confidence =
            confidence::estimate(location.map(|fix| fix.source), battery, cold_start);
        let body = heartbeat_message(
            now,
            battery,
            state.battery_capacity_mah,
            location.as_ref(),
            state.declared_intent,
            policy,
        );
        let source = location.map(|fix| fix.source.label()).unwrap_or("None");

        match self.channel.send(&state.trusted_contact, &body) {
            Ok(()) => {
                info!(
                    mode = %policy.mode,
                    source,
                    confidence = confidence.score,
                    level = %confidence.level,
                    "heartbeat sent"
                );
                self.log.record(
                    LogCategory::Agent,
                    &format!("Heartbeat sent ({source}, confidence={}%)", confidence.score),
                );
                HeartbeatOutcome::Sent { policy, confidence }
            }
            Err(e) => {
                warn!(error = %e, "heartbeat delivery failed");
                self.log
                    .record(LogCategory::Agent, &format!("Heartbeat failed: {e}"));
                HeartbeatOutcome::Failed {
                    policy,
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lifeline_kernel::ManualClock;
    use lifeline_kernel::confidence::ConfidenceLevel;
    use lifeline_middleware::sim::{OutboxChannel, SimBattery, SimLocation};
    use lifeline_types::{LocationSource, PolicyMode};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 22, 15, 0).unwrap()
    }

    struct Rig {
        store: StateStore,
        location: Arc<SimLocation>,
        battery: Arc<SimBattery>,
        outbox: Arc<OutboxChannel>,
        log: Arc<EventLog>,
        task: HeartbeatTask,
    }

    fn rig(state: AgentState) -> Rig {
        let store = StateStore::in_memory();
        store.lock().put_agent_state(&state).unwrap();
        let location = Arc::new(SimLocation::new());
        let battery = Arc::new(SimBattery::new(Some(80)));
        let outbox = Arc::new(OutboxChannel::new());
        let log = Arc::new(EventLog::open_in_memory().unwrap());
        let task = HeartbeatTask::new(
            store.clone(),
            location.clone(),
            battery.clone(),
            outbox.clone(),
            log.clone(),
            Arc::new(ManualClock::new(at())),
        );
        Rig { store, location, battery, outbox, log, task }
    }

    fn panic_state() -> AgentState {
        AgentState {
            armed: true,
            panic_active: true,
            trusted_contact: "5550100".into(),
            trigger_phrase: "PANIC-42".into(),
            declared_intent: DeclaredIntent::Crowded,
            battery_capacity_mah: 4000,
            ..AgentState::default()
        }
    }

    #[test]
    fn message_layout() {
        let fix = Location { latitude: 1.0, longitude: 2.0, source: LocationSource::Live };
        let msg = heartbeat_message(
            at(),
            Some(50),
            4000,
            Some(&fix),
            DeclaredIntent::Traveling,
            HeartbeatPolicy::new(PolicyMode::Survival, 60),
        );
        assert!(msg.starts_with("🚨 PANIC MODE ACTIVE\n🕒 22:15 UTC | 🔋 50%"));
        assert!(msg.contains("⚡ Est. Power: 2000 mAh"));
        assert!(msg.contains("Intent: TRAVELING\nMode: SURVIVAL\nInterval: 60 min"));
        assert!(msg.ends_with("🛰️ Source: GPS / Network (Live)"));
    }

    #[test]
    fn message_without_signals() {
        let msg = heartbeat_message(
            at(),
            None,
            4000,
            None,
            DeclaredIntent::Normal,
            HeartbeatPolicy::new(PolicyMode::AdaptiveHighBattery, 15),
        );
        assert!(msg.contains("🔋 Battery unknown"));
        assert!(msg.contains("📍 Location unavailable (searching…)"));
        assert!(msg.contains("Mode: ADAPTIVE (High Battery)"));
    }

    #[test]
    fn skipped_unless_armed_panicking_and_not_suspended() {
        let cases = [
            AgentState { armed: false, ..panic_state() },
            AgentState { panic_active: false, ..panic_state() },
            AgentState { suspended: true, ..panic_state() },
        ];
        for state in cases {
            let r = rig(state);
            assert_eq!(r.task.run(), HeartbeatOutcome::Skipped);
            assert!(r.outbox.sent().is_empty());
            assert!(r.log.is_empty().unwrap());
        }
    }

    #[test]
    fn cold_start_then_warm() {
        let r = rig(panic_state());
        r.location.set_live(Some((40.0, -3.0)));

        let first = r.task.run();
        match first {
            HeartbeatOutcome::Sent { policy, confidence } => {
                assert_eq!(policy, HeartbeatPolicy::new(PolicyMode::Visibility, 15));
                assert_eq!(confidence.score, 90);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(r.store.lock().last_heartbeat_at().unwrap(), Some(at()));

        let second = r.task.run();
        match second {
            HeartbeatOutcome::Sent { confidence, .. } => {
                assert_eq!(confidence.score, 100);
                assert_eq!(confidence.level, ConfidenceLevel::High);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(r.outbox.sent().len(), 2);
        assert_eq!(r.log.len().unwrap(), 2);
        assert_eq!(
            r.log.recent(1).unwrap()[0].message,
            "Heartbeat sent (GPS / Network (Live), confidence=100%)"
        );
    }

    #[test]
    fn low_battery_selects_critical_mode() {
        let r = rig(panic_state());
        r.battery.set(Some(9));
        let outcome = r.task.run();
        assert_eq!(
            outcome.policy(),
            Some(HeartbeatPolicy::new(PolicyMode::SurvivalCriticalBattery, 60))
        );
        assert!(r.outbox.sent()[0].1.contains("Mode: SURVIVAL (Critical Battery)"));
    }

    #[test]
    fn delivery_failure_is_logged_once() {
        let r = rig(panic_state());
        r.outbox.set_failing(true);
        assert!(matches!(r.task.run(), HeartbeatOutcome::Failed { .. }));
        assert_eq!(r.log.len().unwrap(), 1);
        assert!(r.log.recent(1).unwrap()[0].message.starts_with("Heartbeat failed"));
    }
}
