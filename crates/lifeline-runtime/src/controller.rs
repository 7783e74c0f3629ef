//! [`DmsController`] – drives the dead man's switch against real collaborators.
//!
//! Every entry point follows the same path:
//!
//! 1. take the [`StateStore`] lock,
//! 2. read config and runtime, compute the [`Transition`] with
//!    [`DeadMansSwitch::step`],
//! 3. persist the new runtime, then apply the alarm / notification /
//!    presence effects,
//! 4. release the lock and, if the transition asked for it, escalate.
//!
//! Escalation performs location and network I/O, so it runs after step 4.
//! Everything before it is fast and happens atomically with respect to other
//! callbacks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lifeline_kernel::dead_mans_switch::{DmsEffect, Transition, check_notification};
use lifeline_kernel::{Clock, DeadMansSwitch};
use lifeline_memory::{EventLog, StateStore, StoreGuard};
use lifeline_middleware::{AlarmPrecision, AlarmScheduler, Notifier, PresenceLease};
use lifeline_types::{
    AlarmId, CHECK_ALARM, DMS_NOTIFICATION_ID, DmsConfig, DmsEvent, DmsRuntime, LifelineError,
    LogCategory, TIMEOUT_ALARM,
};
use tracing::{error, info, instrument, warn};

use crate::escalation::{EscalationRequest, Escalator};

pub struct DmsController {
    store: StateStore,
    alarms: Arc<dyn AlarmScheduler>,
    notifier: Arc<dyn Notifier>,
    keep_alive: Arc<dyn PresenceLease>,
    escalator: Escalator,
    log: Arc<EventLog>,
    clock: Arc<dyn Clock>,
}

impl DmsController {
    pub fn new(
        store: StateStore,
        alarms: Arc<dyn AlarmScheduler>,
        notifier: Arc<dyn Notifier>,
        keep_alive: Arc<dyn PresenceLease>,
        escalator: Escalator,
        log: Arc<EventLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            alarms,
            notifier,
            keep_alive,
            escalator,
            log,
            clock,
        }
    }

    // ── Entry points ──────────────────────────────────────────────────────

    pub fn enable(&self) -> Result<(), LifelineError> {
        self.handle(DmsEvent::Enable)
    }

    /// Idempotent; safe when never enabled.
    pub fn disable(&self) -> Result<(), LifelineError> {
        self.handle(DmsEvent::Disable)
    }

    pub fn on_check_fired(&self) -> Result<(), LifelineError> {
        self.handle(DmsEvent::CheckFired)
    }

    pub fn on_timeout_fired(&self) -> Result<(), LifelineError> {
        self.handle(DmsEvent::TimeoutFired)
    }

    pub fn confirm(&self) -> Result<(), LifelineError> {
        self.handle(DmsEvent::Confirmed)
    }

    /// Route one event through the state machine.
    #[instrument(skip(self))]
    pub fn handle(&self, event: DmsEvent) -> Result<(), LifelineError> {
        let escalation = {
            let mut guard = self.store.lock();
            self.apply(&mut guard, event)?
        };
        if let Some(request) = escalation {
            self.escalator.escalate(&request);
        }
        Ok(())
    }

    /// Replace the DMS cadence.
    ///
    /// While enabled this is `disable`, store, `enable` under one lock, so the
    /// cycle restarts from now with the new values.
    pub fn apply_config(&self, config: DmsConfig) -> Result<(), LifelineError> {
        let config = DmsConfig::new(config.check_interval_minutes, config.timeout_seconds)?;
        let mut guard = self.store.lock();
        if guard.dms_runtime()?.enabled {
            self.apply(&mut guard, DmsEvent::Disable)?;
            guard.put_dms_config(&config)?;
            self.apply(&mut guard, DmsEvent::Enable)?;
        } else {
            guard.put_dms_config(&config)?;
        }
        info!(
            interval_min = config.check_interval_minutes,
            timeout_s = config.timeout_seconds,
            "DMS configuration updated"
        );
        self.log.record(
            LogCategory::Safety,
            &format!(
                "DMS config set: check every {} min, respond within {}s",
                config.check_interval_minutes, config.timeout_seconds
            ),
        );
        Ok(())
    }

    /// Rebuild the live alarm from persisted state after a process restart.
    ///
    /// A deadline that passed while the process was down fires immediately.
    pub fn restore(&self) -> Result<(), LifelineError> {
        let mut guard = self.store.lock();
        let mut runtime = guard.dms_runtime()?;
        if !runtime.enabled {
            return Ok(());
        }

        self.keep_alive.start();
        match (runtime.next_timeout_at, runtime.next_check_at) {
            (Some(deadline), _) => {
                let config = guard.dms_config()?;
                self.notifier
                    .show(&check_notification(runtime.missed_count, config.timeout_seconds));
                self.schedule(TIMEOUT_ALARM, deadline);
            }
            (None, Some(due)) => self.schedule(CHECK_ALARM, due),
            (None, None) => {
                // Interrupted between a check firing and its window opening.
                let now = self.clock.now();
                runtime.next_check_at = Some(now);
                guard.put_dms_runtime(&runtime)?;
                self.schedule(CHECK_ALARM, now);
            }
        }
        info!(phase = %runtime.phase(), missed = runtime.missed_count, "DMS restored");
        self.log.record(
            LogCategory::Safety,
            &format!("DMS restored after restart ({})", runtime.phase()),
        );
        Ok(())
    }

    pub fn runtime(&self) -> Result<DmsRuntime, LifelineError> {
        Ok(self.store.lock().dms_runtime()?)
    }

    pub fn config(&self) -> Result<DmsConfig, LifelineError> {
        Ok(self.store.lock().dms_config()?)
    }

    // ── Internals ─────────────────────────────────────────────────────────

    /// Compute, persist and apply one transition.  Returns the escalation to
    /// perform once the lock is released.
    fn apply(
        &self,
        guard: &mut StoreGuard<'_>,
        event: DmsEvent,
    ) -> Result<Option<EscalationRequest>, LifelineError> {
        let config = guard.dms_config()?;
        let runtime = guard.dms_runtime()?;
        let now = self.clock.now();

        let Transition { runtime: next, effects } =
            DeadMansSwitch::new(config).step(&runtime, event, now);
        if effects.is_empty() {
            return Ok(None);
        }
        guard.put_dms_runtime(&next)?;

        let mut escalation = None;
        for effect in effects {
            match effect {
                DmsEffect::ScheduleAlarm { id, at } => self.schedule(id, at),
                DmsEffect::CancelAlarm(id) => self.alarms.cancel(id),
                DmsEffect::ShowNotification(notification) => self.notifier.show(&notification),
                DmsEffect::DismissNotification => self.notifier.cancel(DMS_NOTIFICATION_ID),
                DmsEffect::StartPresence => self.keep_alive.start(),
                DmsEffect::StopPresence => self.keep_alive.stop(),
                // The runtime is already persisted; later effects must still run.
                DmsEffect::Escalate { missed_count } => match guard.agent_state() {
                    Ok(state) => {
                        escalation = Some(EscalationRequest {
                            contact: state.trusted_contact,
                            trigger: state.trigger_phrase,
                            missed_count,
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "escalation skipped: agent state unreadable");
                        self.log
                            .record(LogCategory::Safety, &format!("Escalation skipped: {e}"));
                    }
                },
                DmsEffect::Log(message) => {
                    info!(phase = %next.phase(), "{message}");
                    self.log.record(LogCategory::Safety, &message);
                }
            }
        }
        Ok(escalation)
    }

    /// Scheduling problems are logged, never raised: the persisted deadline
    /// still lets `restore` rebuild the alarm.
    fn schedule(&self, id: AlarmId, at: DateTime<Utc>) {
        match self.alarms.schedule_at(id, at) {
            Ok(AlarmPrecision::Exact) => {}
            Ok(AlarmPrecision::Window(window)) => {
                warn!(alarm = %id, window_min = window.as_secs() / 60, "exact alarm permission missing");
                self.log.record(
                    LogCategory::Safety,
                    "Exact alarm permission missing, using inexact window",
                );
            }
            Err(e) => {
                error!(alarm = %id, error = %e, "failed to schedule alarm");
                self.log
                    .record(LogCategory::Safety, &format!("Failed to schedule {id}: {e}"));
            }
        }
    }
}
