//! [`Agent`] – the lifecycle facade the shell talks to.
//!
//! The agent owns the panic-mode side of Lifeline (arm, disarm, intent,
//! remote commands) and forwards DMS operations to the [`DmsController`].
//! State is read and written under the [`StateStore`] lock; presence, work
//! scheduling and policy re-evaluation happen after the lock is released.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lifeline_kernel::{Command, CommandGate, GateDecision};
use lifeline_memory::{EventLog, StateStore};
use lifeline_middleware::{PresenceLease, WorkScheduler};
use lifeline_types::{
    DeclaredIntent, DmsConfig, DmsPhase, HeartbeatPolicy, LifelineError, LogCategory,
};
use tracing::{debug, info, instrument, warn};

use crate::controller::DmsController;
use crate::policy_engine::{HEARTBEAT_UNIT, PolicyEngine};

/// Display shown on the panic presence while heartbeats are paused.
pub const SUSPENDED_DISPLAY: &str = "Heartbeats paused • Awaiting re-activation";

/// What an inbound message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Activated,
    Suspended,
    /// Trigger phrase from an unauthorized sender.
    Rejected,
    Ignored,
}

/// Point-in-time view for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub armed: bool,
    pub suspended: bool,
    pub panic_active: bool,
    pub configured: bool,
    pub declared_intent: DeclaredIntent,
    pub dms_phase: DmsPhase,
    pub dms_config: DmsConfig,
    pub missed_count: u32,
    pub next_check_at: Option<DateTime<Utc>>,
    pub next_timeout_at: Option<DateTime<Utc>>,
    pub last_confirmed_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Policy behind the running heartbeat, if any.
    pub policy: Option<HeartbeatPolicy>,
}

pub struct Agent {
    store: StateStore,
    dms: Arc<DmsController>,
    policy: Arc<PolicyEngine>,
    work: Arc<dyn WorkScheduler>,
    panic_presence: Arc<dyn PresenceLease>,
    gate: CommandGate,
    log: Arc<EventLog>,
}

impl Agent {
    pub fn new(
        store: StateStore,
        dms: Arc<DmsController>,
        policy: Arc<PolicyEngine>,
        work: Arc<dyn WorkScheduler>,
        panic_presence: Arc<dyn PresenceLease>,
        log: Arc<EventLog>,
    ) -> Self {
        Self {
            store,
            dms,
            policy,
            work,
            panic_presence,
            gate: CommandGate::default(),
            log,
        }
    }

    pub fn with_gate(mut self, gate: CommandGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn dms(&self) -> &DmsController {
        &self.dms
    }

    // ── Configuration & lifecycle ─────────────────────────────────────────

    /// Store the trusted contact and trigger phrase.  Both must be non-blank.
    pub fn configure(&self, contact: &str, trigger: &str) -> Result<(), LifelineError> {
        let contact = contact.trim();
        let trigger = trigger.trim();
        if contact.is_empty() {
            return Err(LifelineError::InvalidConfig("trusted contact is blank".into()));
        }
        if trigger.is_empty() {
            return Err(LifelineError::InvalidConfig("trigger phrase is blank".into()));
        }
        {
            let mut guard = self.store.lock();
            let mut state = guard.agent_state()?;
            state.trusted_contact = contact.to_string();
            state.trigger_phrase = trigger.to_string();
            guard.put_agent_state(&state)?;
        }
        info!("agent configuration saved");
        self.log.record(LogCategory::Agent, "Configuration saved");
        Ok(())
    }

    pub fn set_battery_capacity(&self, capacity_mah: u32) -> Result<(), LifelineError> {
        if capacity_mah == 0 {
            return Err(LifelineError::InvalidConfig(
                "battery capacity must be greater than zero".into(),
            ));
        }
        let mut guard = self.store.lock();
        let mut state = guard.agent_state()?;
        state.battery_capacity_mah = capacity_mah;
        guard.put_agent_state(&state)?;
        Ok(())
    }

    /// Requires a trusted contact and trigger phrase.
    pub fn arm(&self) -> Result<(), LifelineError> {
        {
            let mut guard = self.store.lock();
            let mut state = guard.agent_state()?;
            if !state.is_configured() {
                return Err(LifelineError::NotConfigured(
                    "set a trusted contact and trigger phrase before arming".into(),
                ));
            }
            if state.armed {
                debug!("arm requested while already armed");
                return Ok(());
            }
            state.armed = true;
            guard.put_agent_state(&state)?;
        }
        info!("agent armed");
        self.log.record(LogCategory::Agent, "Agent armed");
        self.policy.reevaluate()?;
        Ok(())
    }

    /// Stop everything: heartbeats, the DMS and both presence leases.
    ///
    /// The disarmed state is persisted first so an in-flight heartbeat cannot
    /// reschedule itself after the cancellation.
    pub fn disarm(&self) -> Result<(), LifelineError> {
        {
            let mut guard = self.store.lock();
            let mut state = guard.agent_state()?;
            state.disarm();
            guard.put_agent_state(&state)?;
        }
        self.work.cancel_all();
        self.policy.stop();
        self.dms.disable()?;
        self.panic_presence.stop();
        info!("agent disarmed");
        self.log
            .record(LogCategory::Agent, "Disarmed → all systems stopped");
        Ok(())
    }

    pub fn set_intent(&self, intent: DeclaredIntent) -> Result<Option<HeartbeatPolicy>, LifelineError> {
        {
            let mut guard = self.store.lock();
            let mut state = guard.agent_state()?;
            state.declared_intent = intent;
            guard.put_agent_state(&state)?;
        }
        info!(%intent, "declared intent changed");
        self.log
            .record(LogCategory::Agent, &format!("Intent set → {intent}"));
        self.policy.reevaluate()
    }

    /// Bring leases, alarms and heartbeats back after a process restart.
    pub fn restore(&self) -> Result<(), LifelineError> {
        self.dms.restore()?;
        let state = self.store.lock().agent_state()?;
        if state.armed && state.panic_active {
            self.panic_presence.start();
            if state.suspended {
                self.panic_presence.set_display(SUSPENDED_DISPLAY);
            }
        }
        self.policy.reevaluate()?;
        Ok(())
    }

    // ── Remote commands ───────────────────────────────────────────────────

    /// Route one inbound `(sender, body)` message.
    #[instrument(skip(self, body))]
    pub fn handle_inbound(&self, sender: &str, body: &str) -> Result<CommandOutcome, LifelineError> {
        let decision = {
            let mut guard = self.store.lock();
            let mut state = guard.agent_state()?;
            let decision = self.gate.evaluate(&state, sender, body);
            match decision {
                GateDecision::Authorized(Command::Activate) => {
                    state.panic_active = true;
                    state.suspended = false;
                    guard.put_agent_state(&state)?;
                }
                GateDecision::Authorized(Command::Suspend) => {
                    state.suspended = true;
                    guard.put_agent_state(&state)?;
                }
                _ => {}
            }
            decision
        };

        match decision {
            GateDecision::NotArmed => {
                debug!("inbound message ignored: agent not armed");
                Ok(CommandOutcome::Ignored)
            }
            GateDecision::Unauthorized { attempted_trigger: true } => {
                warn!("trigger phrase from unauthorized sender rejected");
                self.log.record(
                    LogCategory::Command,
                    &format!("Rejected trigger from unauthorized sender {sender}"),
                );
                Ok(CommandOutcome::Rejected)
            }
            GateDecision::Unauthorized { attempted_trigger: false } => {
                Ok(CommandOutcome::Ignored)
            }
            GateDecision::Authorized(Command::Activate) => {
                self.panic_presence.start();
                info!("panic mode activated by trusted contact");
                self.log
                    .record(LogCategory::Command, "Trigger accepted → panic mode active");
                self.policy.reevaluate()?;
                Ok(CommandOutcome::Activated)
            }
            GateDecision::Authorized(Command::Suspend) => {
                self.work.cancel(HEARTBEAT_UNIT);
                self.policy.stop();
                self.panic_presence.set_display(SUSPENDED_DISPLAY);
                info!("heartbeats suspended by trusted contact");
                self.log
                    .record(LogCategory::Command, "Stop command accepted → heartbeats paused");
                Ok(CommandOutcome::Suspended)
            }
            GateDecision::Authorized(Command::Ignore) => {
                debug!("authorized sender, unrecognised body");
                Ok(CommandOutcome::Ignored)
            }
        }
    }

    // ── DMS passthroughs ──────────────────────────────────────────────────

    pub fn enable_dms(&self) -> Result<(), LifelineError> {
        self.dms.enable()
    }

    pub fn disable_dms(&self) -> Result<(), LifelineError> {
        self.dms.disable()
    }

    /// The user's "I'm OK".
    pub fn confirm_safe(&self) -> Result<(), LifelineError> {
        self.dms.confirm()
    }

    pub fn set_dms_config(&self, config: DmsConfig) -> Result<(), LifelineError> {
        self.dms.apply_config(config)
    }

    // ── Status ────────────────────────────────────────────────────────────

    pub fn status(&self) -> Result<AgentStatus, LifelineError> {
        let guard = self.store.lock();
        let state = guard.agent_state()?;
        let runtime = guard.dms_runtime()?;
        let config = guard.dms_config()?;
        let last_heartbeat_at = guard.last_heartbeat_at()?;
        drop(guard);

        Ok(AgentStatus {
            armed: state.armed,
            suspended: state.suspended,
            panic_active: state.panic_active,
            configured: state.is_configured(),
            declared_intent: state.declared_intent,
            dms_phase: runtime.phase(),
            dms_config: config,
            missed_count: runtime.missed_count,
            next_check_at: runtime.next_check_at,
            next_timeout_at: runtime.next_timeout_at,
            last_confirmed_at: runtime.last_confirmed_at,
            last_heartbeat_at,
            policy: self.policy.active(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lifeline_kernel::ManualClock;
    use lifeline_middleware::sim::{
        OutboxChannel, RecordingAlarms, RecordingNotifier, RecordingPresence, RecordingWork,
        SimBattery, SimLocation,
    };
    use lifeline_types::{CHECK_ALARM, PolicyMode};

    use crate::escalation::Escalator;
    use crate::heartbeat::HeartbeatTask;

    struct Rig {
        store: StateStore,
        alarms: Arc<RecordingAlarms>,
        work: Arc<RecordingWork>,
        keep_alive: Arc<RecordingPresence>,
        panic_presence: Arc<RecordingPresence>,
        outbox: Arc<OutboxChannel>,
        log: Arc<EventLog>,
        agent: Agent,
    }

    fn rig_with(store: StateStore) -> Rig {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 2, 18, 30, 0).unwrap()));
        let alarms = Arc::new(RecordingAlarms::new());
        let work = Arc::new(RecordingWork::new());
        let keep_alive = Arc::new(RecordingPresence::new());
        let panic_presence = Arc::new(RecordingPresence::new());
        let location = Arc::new(SimLocation::new());
        let battery = Arc::new(SimBattery::new(Some(60)));
        let outbox = Arc::new(OutboxChannel::new());
        let log = Arc::new(EventLog::open_in_memory().unwrap());

        let escalator = Escalator::new(
            location.clone(),
            battery.clone(),
            outbox.clone(),
            log.clone(),
            clock.clone(),
        );
        let dms = Arc::new(DmsController::new(
            store.clone(),
            alarms.clone(),
            Arc::new(RecordingNotifier::new()),
            keep_alive.clone(),
            escalator,
            log.clone(),
            clock.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatTask::new(
            store.clone(),
            location,
            battery,
            outbox.clone(),
            log.clone(),
            clock,
        ));
        let policy = PolicyEngine::new(
            store.clone(),
            work.clone(),
            panic_presence.clone(),
            heartbeat,
            log.clone(),
        );
        let agent = Agent::new(
            store.clone(),
            dms,
            policy,
            work.clone(),
            panic_presence.clone(),
            log.clone(),
        );
        Rig { store, alarms, work, keep_alive, panic_presence, outbox, log, agent }
    }

    fn rig() -> Rig {
        rig_with(StateStore::in_memory())
    }

    fn armed_rig() -> Rig {
        let r = rig();
        r.agent.configure("5550100", "PANIC-42").unwrap();
        r.agent.arm().unwrap();
        r
    }

    #[test]
    fn configure_rejects_blank_values() {
        let r = rig();
        assert!(matches!(
            r.agent.configure("  ", "PANIC-42"),
            Err(LifelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            r.agent.configure("5550100", ""),
            Err(LifelineError::InvalidConfig(_))
        ));
        assert!(!r.agent.status().unwrap().configured);
    }

    #[test]
    fn arm_requires_configuration() {
        let r = rig();
        assert!(matches!(r.agent.arm(), Err(LifelineError::NotConfigured(_))));
        assert!(!r.agent.status().unwrap().armed);
    }

    #[test]
    fn arming_alone_does_not_start_heartbeats() {
        let r = armed_rig();
        assert!(r.agent.status().unwrap().armed);
        assert!(!r.work.is_scheduled(HEARTBEAT_UNIT));
        assert!(!r.panic_presence.is_active());
    }

    #[test]
    fn trigger_activates_panic_mode() {
        let r = armed_rig();
        let outcome = r.agent.handle_inbound("+1-555-0100", "panic-42").unwrap();
        assert_eq!(outcome, CommandOutcome::Activated);

        let status = r.agent.status().unwrap();
        assert!(status.panic_active);
        assert!(!status.suspended);
        assert_eq!(status.policy, Some(HeartbeatPolicy::new(PolicyMode::AdaptiveHighBattery, 15)));
        assert!(r.panic_presence.is_active());
        assert!(r.work.is_scheduled(HEARTBEAT_UNIT));

        r.work.run_pending_once();
        let sent = r.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "5550100");
        assert!(sent[0].1.starts_with("🚨 PANIC MODE ACTIVE"));
    }

    #[test]
    fn stop_phrase_suspends_but_keeps_panic_active() {
        let r = armed_rig();
        r.agent.handle_inbound("5550100", "PANIC-42").unwrap();
        let outcome = r.agent.handle_inbound("5550100", " panic-42-stop ").unwrap();
        assert_eq!(outcome, CommandOutcome::Suspended);

        let status = r.agent.status().unwrap();
        assert!(status.panic_active);
        assert!(status.suspended);
        assert_eq!(status.policy, None);
        assert!(!r.work.is_scheduled(HEARTBEAT_UNIT));
        assert_eq!(r.panic_presence.display().as_deref(), Some(SUSPENDED_DISPLAY));

        // A re-activation resumes.
        r.agent.handle_inbound("5550100", "PANIC-42").unwrap();
        assert!(!r.agent.status().unwrap().suspended);
        assert!(r.work.is_scheduled(HEARTBEAT_UNIT));
    }

    #[test]
    fn unauthorized_trigger_is_rejected_and_audited() {
        let r = armed_rig();
        let outcome = r.agent.handle_inbound("5550199", "PANIC-42").unwrap();
        assert_eq!(outcome, CommandOutcome::Rejected);
        assert!(!r.agent.status().unwrap().panic_active);
        let entry = &r.log.recent_in(&[LogCategory::Command], 1).unwrap()[0];
        assert!(entry.message.contains("5550199"));
    }

    #[test]
    fn unrelated_messages_are_ignored() {
        let r = armed_rig();
        assert_eq!(
            r.agent.handle_inbound("5550199", "hello").unwrap(),
            CommandOutcome::Ignored
        );
        assert_eq!(
            r.agent.handle_inbound("5550100", "are you ok?").unwrap(),
            CommandOutcome::Ignored
        );
        assert!(r.log.recent_in(&[LogCategory::Command], 10).unwrap().is_empty());
    }

    #[test]
    fn commands_ignored_while_disarmed() {
        let r = rig();
        r.agent.configure("5550100", "PANIC-42").unwrap();
        assert_eq!(
            r.agent.handle_inbound("5550100", "PANIC-42").unwrap(),
            CommandOutcome::Ignored
        );
        assert!(!r.agent.status().unwrap().panic_active);
    }

    #[test]
    fn intent_change_reschedules_heartbeat() {
        let r = armed_rig();
        r.agent.handle_inbound("5550100", "PANIC-42").unwrap();
        let policy = r.agent.set_intent(DeclaredIntent::Traveling).unwrap();
        assert_eq!(policy, Some(HeartbeatPolicy::new(PolicyMode::Survival, 60)));
        assert_eq!(
            r.panic_presence.display().as_deref(),
            Some("Mode: SURVIVAL • Update every 60 min")
        );
    }

    #[test]
    fn intent_change_while_idle_schedules_nothing() {
        let r = armed_rig();
        assert_eq!(r.agent.set_intent(DeclaredIntent::Crowded).unwrap(), None);
        assert_eq!(r.agent.status().unwrap().declared_intent, DeclaredIntent::Crowded);
        assert_eq!(r.work.recurring_count(), 0);
    }

    #[test]
    fn disarm_stops_everything() {
        let r = armed_rig();
        r.agent.enable_dms().unwrap();
        r.agent.handle_inbound("5550100", "PANIC-42").unwrap();

        r.agent.disarm().unwrap();

        let status = r.agent.status().unwrap();
        assert!(!status.armed && !status.panic_active && !status.suspended);
        assert_eq!(status.dms_phase, DmsPhase::Disabled);
        assert_eq!(r.work.recurring_count(), 0);
        assert_eq!(r.work.pending_once(), 0);
        assert_eq!(r.alarms.live_count(), 0);
        assert!(!r.keep_alive.is_active());
        assert!(!r.panic_presence.is_active());
        assert_eq!(
            r.log.recent(1).unwrap()[0].message,
            "Disarmed → all systems stopped"
        );
        // Contact and trigger survive.
        assert!(status.configured);
    }

    #[test]
    fn dms_runs_independently_of_panic_mode() {
        let r = rig();
        r.agent.enable_dms().unwrap();
        let status = r.agent.status().unwrap();
        assert_eq!(status.dms_phase, DmsPhase::WaitingForCheck);
        assert!(r.alarms.scheduled_at(CHECK_ALARM).is_some());
        assert!(r.keep_alive.is_active());
        assert!(!r.panic_presence.is_active());
    }

    #[test]
    fn restore_resumes_panic_heartbeats() {
        let first = armed_rig();
        first.agent.handle_inbound("5550100", "PANIC-42").unwrap();

        let second = rig_with(first.store.clone());
        second.agent.restore().unwrap();
        assert!(second.panic_presence.is_active());
        assert!(second.work.is_scheduled(HEARTBEAT_UNIT));
        assert_eq!(second.work.pending_once(), 1);
    }

    #[test]
    fn restore_keeps_suspension() {
        let first = armed_rig();
        first.agent.handle_inbound("5550100", "PANIC-42").unwrap();
        first.agent.handle_inbound("5550100", "PANIC-42-STOP").unwrap();

        let second = rig_with(first.store.clone());
        second.agent.restore().unwrap();
        assert!(!second.work.is_scheduled(HEARTBEAT_UNIT));
        assert_eq!(second.panic_presence.display().as_deref(), Some(SUSPENDED_DISPLAY));
    }

    #[test]
    fn status_reports_last_heartbeat() {
        let r = armed_rig();
        assert_eq!(r.agent.status().unwrap().last_heartbeat_at, None);
        r.agent.handle_inbound("5550100", "PANIC-42").unwrap();
        r.work.run_pending_once();
        assert!(r.agent.status().unwrap().last_heartbeat_at.is_some());
    }

    #[test]
    fn battery_capacity_must_be_positive() {
        let r = rig();
        assert!(r.agent.set_battery_capacity(0).is_err());
        r.agent.set_battery_capacity(3200).unwrap();
        assert_eq!(r.store.lock().agent_state().unwrap().battery_capacity_mah, 3200);
    }
}
