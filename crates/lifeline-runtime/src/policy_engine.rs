//! [`PolicyEngine`] – turns the current agent state into a heartbeat schedule.
//!
//! [`PolicyEngine::reevaluate`] is called whenever the intent, the armed flag
//! or the suspended flag changes.  Battery-driven changes are picked up by the
//! heartbeat itself: every run recomputes the policy, and if the cadence moved
//! the recurring unit is rescheduled without an extra immediate run.
//!
//! Scheduling decisions are made while holding the [`StateStore`] lock, so a
//! suspend or disarm that lands mid-heartbeat can never be undone by a
//! reschedule based on the state read before it.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use lifeline_kernel::policy;
use lifeline_memory::{EventLog, StateStore};
use lifeline_middleware::{PresenceLease, WorkScheduler, WorkUnit};
use lifeline_types::{AgentState, HeartbeatPolicy, LifelineError, LogCategory};
use tracing::{debug, info, warn};

use crate::heartbeat::HeartbeatTask;

/// Name of the recurring heartbeat unit.
pub const HEARTBEAT_UNIT: &str = "panic_heartbeat";

pub struct PolicyEngine {
    me: Weak<PolicyEngine>,
    store: StateStore,
    work: Arc<dyn WorkScheduler>,
    presence: Arc<dyn PresenceLease>,
    heartbeat: Arc<HeartbeatTask>,
    log: Arc<EventLog>,
    /// Policy behind the currently scheduled unit.
    active: Mutex<Option<HeartbeatPolicy>>,
}

impl PolicyEngine {
    /// `presence` is the panic-mode lease, not the DMS keep-alive.
    pub fn new(
        store: StateStore,
        work: Arc<dyn WorkScheduler>,
        presence: Arc<dyn PresenceLease>,
        heartbeat: Arc<HeartbeatTask>,
        log: Arc<EventLog>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store,
            work,
            presence,
            heartbeat,
            log,
            active: Mutex::new(None),
        })
    }

    /// The policy behind the scheduled heartbeat, `None` when none is running.
    pub fn active(&self) -> Option<HeartbeatPolicy> {
        *self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Recompute the policy from persisted state and apply it.
    ///
    /// Returns `None` (and cancels the heartbeat) unless the agent is armed,
    /// in panic mode and not suspended.
    pub fn reevaluate(&self) -> Result<Option<HeartbeatPolicy>, LifelineError> {
        let guard = self.store.lock();
        let state = guard.agent_state()?;
        if !heartbeats_enabled(&state) {
            self.stop();
            return Ok(None);
        }
        let policy = policy::decide(state.declared_intent, self.heartbeat.battery(), false);
        self.apply(policy, true)?;
        drop(guard);
        Ok(Some(policy))
    }

    /// Cancel the recurring heartbeat.
    pub fn stop(&self) {
        self.work.cancel(HEARTBEAT_UNIT);
        let previous = self.active.lock().unwrap_or_else(|p| p.into_inner()).take();
        if previous.is_some() {
            debug!("heartbeat unit cancelled");
        }
    }

    fn apply(&self, policy: HeartbeatPolicy, run_now: bool) -> Result<(), LifelineError> {
        if policy.is_suspended() {
            self.stop();
            return Ok(());
        }

        let interval = Duration::from_secs(u64::from(policy.interval_minutes) * 60);
        let unit = self.unit();
        self.work
            .schedule_every(HEARTBEAT_UNIT, interval, interval, unit.clone())?;
        *self.active.lock().unwrap_or_else(|p| p.into_inner()) = Some(policy);
        if run_now {
            self.work.enqueue_once(unit);
        }

        self.presence.set_display(&format!(
            "Mode: {} • Update every {} min",
            policy.mode.label(),
            policy.interval_minutes
        ));
        info!(mode = %policy.mode, interval_min = policy.interval_minutes, "policy applied");
        self.log.record(
            LogCategory::Agent,
            &format!("Policy applied → {} ({}m)", policy.mode, policy.interval_minutes),
        );
        Ok(())
    }

    fn unit(&self) -> WorkUnit {
        let me = self.me.clone();
        Arc::new(move || {
            if let Some(engine) = me.upgrade() {
                engine.tick();
            }
        })
    }

    /// One heartbeat, then follow the battery if the cadence moved.
    fn tick(&self) {
        let Some(policy) = self.heartbeat.run().policy() else {
            return;
        };
        if self.active() == Some(policy) {
            return;
        }

        let guard = self.store.lock();
        match guard.agent_state() {
            Ok(state) if heartbeats_enabled(&state) => {}
            Ok(_) => {
                debug!("heartbeat stopped during the run; not rescheduling");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read agent state; not rescheduling");
                return;
            }
        }
        info!(mode = %policy.mode, "battery level changed the heartbeat policy");
        if let Err(e) = self.apply(policy, false) {
            warn!(error = %e, "failed to reschedule heartbeat");
        }
        drop(guard);
    }
}

fn heartbeats_enabled(state: &AgentState) -> bool {
    state.armed && state.panic_active && !state.suspended
}
