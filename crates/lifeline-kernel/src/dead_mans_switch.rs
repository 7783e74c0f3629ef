//! [`DeadMansSwitch`] – the check / timeout / confirm state machine.
//!
//! The switch periodically asks the user to confirm they are OK.  A check
//! opens a response window; if the window closes without a confirmation the
//! miss is counted and the trusted contact is alerted.
//!
//! ```text
//!             Enable                  CheckFired
//!  DISABLED ─────────► WAITING_FOR_CHECK ─────────► TIMEOUT_ARMED
//!     ▲                    ▲     ▲                    │      │
//!     │ Disable (any)      │     └──── Confirmed ─────┘      │
//!     │                    └──── TimeoutFired (escalate) ────┘
//! ```
//!
//! [`DeadMansSwitch::step`] is pure.  The caller persists the returned
//! [`DmsRuntime`] and performs the [`DmsEffect`]s in order.
//!
//! Alarm deliveries are treated as hints, not facts: a `CheckFired` or
//! `TimeoutFired` whose persisted deadline does not match (it was cancelled,
//! rescheduled, or delivered twice) yields no effects.  An accepted delivery
//! cancels its own alarm, so at most one of `CHECK` and `TIMEOUT` is live.

use chrono::{DateTime, Duration, Utc};
use lifeline_types::{
    AlarmId, CHECK_ALARM, DMS_NOTIFICATION_ID, DmsConfig, DmsEvent, DmsRuntime, Notification,
    NotificationAction, TIMEOUT_ALARM,
};
use tracing::debug;

/// Alarms may be delivered marginally before their deadline.
const EARLY_DELIVERY_TOLERANCE_SECS: i64 = 1;

fn is_early(now: DateTime<Utc>, due: DateTime<Utc>) -> bool {
    now + Duration::seconds(EARLY_DELIVERY_TOLERANCE_SECS) < due
}

// ────────────────────────────────────────────────────────────────────────────
// Effects
// ────────────────────────────────────────────────────────────────────────────

/// A side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum DmsEffect {
    /// Schedule (or replace) the alarm with this identity.
    ScheduleAlarm { id: AlarmId, at: DateTime<Utc> },
    CancelAlarm(AlarmId),
    ShowNotification(Notification),
    DismissNotification,
    /// Acquire the keep-alive presence lease.
    StartPresence,
    StopPresence,
    /// Alert the trusted contact.  Performed outside the state lock.
    Escalate { missed_count: u32 },
    /// A human-readable line for the SAFETY event log.
    Log(String),
}

/// Output of [`DeadMansSwitch::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub runtime: DmsRuntime,
    pub effects: Vec<DmsEffect>,
}

impl Transition {
    fn ignored(runtime: &DmsRuntime) -> Self {
        Self {
            runtime: runtime.clone(),
            effects: Vec::new(),
        }
    }

    /// `true` when the event was absorbed without any change.
    pub fn is_noop(&self) -> bool {
        self.effects.is_empty()
    }
}

/// The notification shown when a check fires.
pub fn check_notification(missed_count: u32, timeout_seconds: u32) -> Notification {
    let title = if missed_count > 0 {
        format!("⚠️ {missed_count} safety checks missed")
    } else {
        "Quick Safety Check".to_string()
    };
    Notification {
        id: DMS_NOTIFICATION_ID,
        title,
        body: format!("Confirm 'I'm OK' within {timeout_seconds}s"),
        actions: vec![NotificationAction {
            label: "I'm OK".to_string(),
            event: DmsEvent::Confirmed,
        }],
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DeadMansSwitch
// ────────────────────────────────────────────────────────────────────────────

/// Transition function of the dead man's switch for one [`DmsConfig`].
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use lifeline_kernel::dead_mans_switch::{DeadMansSwitch, DmsEffect};
/// use lifeline_types::{CHECK_ALARM, DmsConfig, DmsEvent, DmsRuntime};
///
/// let dms = DeadMansSwitch::new(DmsConfig::default());
/// let now = Utc::now();
/// let t = dms.step(&DmsRuntime::default(), DmsEvent::Enable, now);
///
/// assert!(t.runtime.enabled);
/// assert!(t.effects.contains(&DmsEffect::ScheduleAlarm { id: CHECK_ALARM, at: now }));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DeadMansSwitch {
    config: DmsConfig,
}

impl DeadMansSwitch {
    pub fn new(config: DmsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    /// Compute the transition for `event` delivered at `now`.
    pub fn step(&self, runtime: &DmsRuntime, event: DmsEvent, now: DateTime<Utc>) -> Transition {
        match event {
            DmsEvent::Enable => self.enable(now),
            DmsEvent::Disable => Self::disable(),
            DmsEvent::CheckFired => self.check_fired(runtime, now),
            DmsEvent::TimeoutFired => self.timeout_fired(runtime, now),
            DmsEvent::Confirmed => self.confirmed(runtime, now),
        }
    }

    /// (Re)arm from `now`.  Any open response window is discarded.
    fn enable(&self, now: DateTime<Utc>) -> Transition {
        Transition {
            runtime: DmsRuntime {
                enabled: true,
                last_confirmed_at: Some(now),
                missed_count: 0,
                next_check_at: Some(now),
                next_timeout_at: None,
            },
            effects: vec![
                DmsEffect::StartPresence,
                DmsEffect::CancelAlarm(TIMEOUT_ALARM),
                DmsEffect::ScheduleAlarm { id: CHECK_ALARM, at: now },
                DmsEffect::Log(format!(
                    "DMS enabled (check every {} min, respond within {}s)",
                    self.config.check_interval_minutes, self.config.timeout_seconds
                )),
            ],
        }
    }

    /// Safe in every state, including when never enabled.
    fn disable() -> Transition {
        Transition {
            runtime: DmsRuntime::default(),
            effects: vec![
                DmsEffect::CancelAlarm(CHECK_ALARM),
                DmsEffect::CancelAlarm(TIMEOUT_ALARM),
                DmsEffect::DismissNotification,
                DmsEffect::StopPresence,
                DmsEffect::Log("DMS disabled".to_string()),
            ],
        }
    }

    fn check_fired(&self, runtime: &DmsRuntime, now: DateTime<Utc>) -> Transition {
        if !runtime.enabled {
            debug!("check alarm delivered while disabled; ignoring");
            return Transition::ignored(runtime);
        }
        if runtime.next_timeout_at.is_some() {
            debug!("check alarm delivered while a response window is open; ignoring");
            return Transition::ignored(runtime);
        }
        if let Some(due) = runtime.next_check_at {
            if is_early(now, due) {
                debug!(due = %due, now = %now, "stale check alarm; ignoring");
                return Transition::ignored(runtime);
            }
        }

        let deadline = now + self.config.timeout();
        Transition {
            runtime: DmsRuntime {
                next_check_at: None,
                next_timeout_at: Some(deadline),
                ..runtime.clone()
            },
            effects: vec![
                DmsEffect::CancelAlarm(CHECK_ALARM),
                DmsEffect::ShowNotification(check_notification(
                    runtime.missed_count,
                    self.config.timeout_seconds,
                )),
                DmsEffect::ScheduleAlarm { id: TIMEOUT_ALARM, at: deadline },
                DmsEffect::Log(format!(
                    "Safety check issued (missed so far: {})",
                    runtime.missed_count
                )),
            ],
        }
    }

    fn timeout_fired(&self, runtime: &DmsRuntime, now: DateTime<Utc>) -> Transition {
        if !runtime.enabled {
            debug!("timeout alarm delivered while disabled; ignoring");
            return Transition::ignored(runtime);
        }
        let Some(due) = runtime.next_timeout_at else {
            debug!("timeout alarm delivered with no open response window; ignoring");
            return Transition::ignored(runtime);
        };
        if is_early(now, due) {
            debug!(due = %due, now = %now, "stale timeout alarm; ignoring");
            return Transition::ignored(runtime);
        }

        let missed_count = runtime.missed_count.saturating_add(1);
        let next_check = now + self.config.check_interval();
        Transition {
            runtime: DmsRuntime {
                missed_count,
                next_check_at: Some(next_check),
                next_timeout_at: None,
                ..runtime.clone()
            },
            effects: vec![
                DmsEffect::CancelAlarm(TIMEOUT_ALARM),
                DmsEffect::Escalate { missed_count },
                DmsEffect::ScheduleAlarm { id: CHECK_ALARM, at: next_check },
                DmsEffect::Log(format!("Missed safety check #{missed_count} → escalating")),
            ],
        }
    }

    /// A confirmation resets the cycle.  Escalations already sent stand.
    fn confirmed(&self, runtime: &DmsRuntime, now: DateTime<Utc>) -> Transition {
        if !runtime.enabled {
            debug!("confirmation while disabled; ignoring");
            return Transition::ignored(runtime);
        }

        let next_check = now + self.config.check_interval();
        Transition {
            runtime: DmsRuntime {
                enabled: true,
                last_confirmed_at: Some(now),
                missed_count: 0,
                next_check_at: Some(next_check),
                next_timeout_at: None,
            },
            effects: vec![
                DmsEffect::CancelAlarm(TIMEOUT_ALARM),
                DmsEffect::DismissNotification,
                DmsEffect::ScheduleAlarm { id: CHECK_ALARM, at: next_check },
                DmsEffect::Log("User confirmed OK".to_string()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lifeline_types::DmsPhase;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    fn dms() -> DeadMansSwitch {
        DeadMansSwitch::new(DmsConfig::new(30, 600).unwrap())
    }

    fn scheduled(effects: &[DmsEffect]) -> Vec<(AlarmId, DateTime<Utc>)> {
        effects
            .iter()
            .filter_map(|e| match e {
                DmsEffect::ScheduleAlarm { id, at } => Some((*id, *at)),
                _ => None,
            })
            .collect()
    }

    fn enabled_at(now: DateTime<Utc>) -> DmsRuntime {
        dms().step(&DmsRuntime::default(), DmsEvent::Enable, now).runtime
    }

    #[test]
    fn enable_schedules_one_check_now() {
        let t = dms().step(&DmsRuntime::default(), DmsEvent::Enable, t0());
        assert_eq!(t.runtime.phase(), DmsPhase::WaitingForCheck);
        assert_eq!(t.runtime.missed_count, 0);
        assert_eq!(t.runtime.last_confirmed_at, Some(t0()));
        assert_eq!(scheduled(&t.effects), vec![(CHECK_ALARM, t0())]);
        assert!(t.effects.contains(&DmsEffect::CancelAlarm(TIMEOUT_ALARM)));
        assert!(t.effects.contains(&DmsEffect::StartPresence));
    }

    #[test]
    fn enable_while_timeout_armed_rearms_from_now() {
        let rt = enabled_at(t0());
        let rt = dms().step(&rt, DmsEvent::CheckFired, t0()).runtime;
        let later = t0() + Duration::minutes(3);
        let t = dms().step(&rt, DmsEvent::Enable, later);
        assert_eq!(t.runtime.next_timeout_at, None);
        assert_eq!(t.runtime.next_check_at, Some(later));
        assert!(t.effects.contains(&DmsEffect::CancelAlarm(TIMEOUT_ALARM)));
    }

    #[test]
    fn check_fired_opens_response_window() {
        let rt = enabled_at(t0());
        let t = dms().step(&rt, DmsEvent::CheckFired, t0());
        assert_eq!(t.runtime.phase(), DmsPhase::TimeoutArmed);
        let deadline = t0() + Duration::seconds(600);
        assert_eq!(t.runtime.next_timeout_at, Some(deadline));
        assert_eq!(scheduled(&t.effects), vec![(TIMEOUT_ALARM, deadline)]);
        let shown = t.effects.iter().find_map(|e| match e {
            DmsEffect::ShowNotification(n) => Some(n.clone()),
            _ => None,
        });
        let shown = shown.expect("notification shown");
        assert_eq!(shown.title, "Quick Safety Check");
        assert_eq!(shown.body, "Confirm 'I'm OK' within 600s");
        assert_eq!(shown.actions[0].event, DmsEvent::Confirmed);
    }

    #[test]
    fn check_then_confirm_resets_cycle() {
        let rt = enabled_at(t0());
        let rt = dms().step(&rt, DmsEvent::CheckFired, t0()).runtime;
        let confirm_at = t0() + Duration::minutes(2);
        let t = dms().step(&rt, DmsEvent::Confirmed, confirm_at);

        assert_eq!(t.runtime.missed_count, 0);
        assert_eq!(t.runtime.next_timeout_at, None);
        let next = confirm_at + Duration::minutes(30);
        assert_eq!(t.runtime.next_check_at, Some(next));
        assert_eq!(scheduled(&t.effects), vec![(CHECK_ALARM, next)]);

        // The timeout is cancelled before the next check is scheduled.
        let cancel = t
            .effects
            .iter()
            .position(|e| *e == DmsEffect::CancelAlarm(TIMEOUT_ALARM))
            .unwrap();
        let schedule = t
            .effects
            .iter()
            .position(|e| matches!(e, DmsEffect::ScheduleAlarm { .. }))
            .unwrap();
        assert!(cancel < schedule);
        assert!(t.effects.contains(&DmsEffect::DismissNotification));
    }

    #[test]
    fn check_then_timeout_escalates_and_reschedules() {
        let rt = enabled_at(t0());
        let rt = dms().step(&rt, DmsEvent::CheckFired, t0()).runtime;
        let fired = t0() + Duration::seconds(600);
        let t = dms().step(&rt, DmsEvent::TimeoutFired, fired);

        assert_eq!(t.runtime.missed_count, 1);
        assert_eq!(t.runtime.phase(), DmsPhase::WaitingForCheck);
        let next = fired + Duration::minutes(30);
        assert_eq!(scheduled(&t.effects), vec![(CHECK_ALARM, next)]);
        assert!(t.effects.contains(&DmsEffect::Escalate { missed_count: 1 }));
    }

    #[test]
    fn repeated_misses_accumulate_and_change_title() {
        let mut rt = enabled_at(t0());
        let mut now = t0();
        for expected in 1..=3 {
            rt = dms().step(&rt, DmsEvent::CheckFired, now).runtime;
            now += Duration::seconds(600);
            rt = dms().step(&rt, DmsEvent::TimeoutFired, now).runtime;
            assert_eq!(rt.missed_count, expected);
            now += Duration::minutes(30);
        }
        let notification = check_notification(rt.missed_count, 600);
        assert_eq!(notification.title, "⚠️ 3 safety checks missed");
    }

    #[test]
    fn confirm_after_escalation_does_not_retract_it() {
        let rt = enabled_at(t0());
        let rt = dms().step(&rt, DmsEvent::CheckFired, t0()).runtime;
        let fired = t0() + Duration::seconds(600);
        let rt = dms().step(&rt, DmsEvent::TimeoutFired, fired).runtime;

        let t = dms().step(&rt, DmsEvent::Confirmed, fired + Duration::minutes(1));
        assert_eq!(t.runtime.missed_count, 0);
        assert!(!t.effects.iter().any(|e| matches!(e, DmsEffect::Escalate { .. })));
        assert_eq!(scheduled(&t.effects).len(), 1);
    }

    #[test]
    fn events_while_disabled_are_noops() {
        let rt = DmsRuntime::default();
        for event in [DmsEvent::CheckFired, DmsEvent::TimeoutFired, DmsEvent::Confirmed] {
            let t = dms().step(&rt, event, t0());
            assert!(t.is_noop(), "{event:?} should be ignored");
            assert_eq!(t.runtime, rt);
        }
    }

    #[test]
    fn disable_is_idempotent() {
        let never = dms().step(&DmsRuntime::default(), DmsEvent::Disable, t0());
        let rt = enabled_at(t0());
        let once = dms().step(&rt, DmsEvent::Disable, t0());
        let twice = dms().step(&once.runtime, DmsEvent::Disable, t0());

        for t in [&never, &once, &twice] {
            assert_eq!(t.runtime, DmsRuntime::default());
            assert!(t.effects.contains(&DmsEffect::CancelAlarm(CHECK_ALARM)));
            assert!(t.effects.contains(&DmsEffect::CancelAlarm(TIMEOUT_ALARM)));
            assert!(t.effects.contains(&DmsEffect::StopPresence));
            assert!(scheduled(&t.effects).is_empty());
        }
    }

    #[test]
    fn duplicate_timeout_delivery_is_ignored() {
        let rt = enabled_at(t0());
        let rt = dms().step(&rt, DmsEvent::CheckFired, t0()).runtime;
        let fired = t0() + Duration::seconds(600);
        let rt = dms().step(&rt, DmsEvent::TimeoutFired, fired).runtime;

        let dup = dms().step(&rt, DmsEvent::TimeoutFired, fired + Duration::seconds(5));
        assert!(dup.is_noop());
        assert_eq!(dup.runtime.missed_count, 1);
    }

    #[test]
    fn duplicate_check_delivery_is_ignored() {
        let rt = enabled_at(t0());
        let rt = dms().step(&rt, DmsEvent::CheckFired, t0()).runtime;
        let dup = dms().step(&rt, DmsEvent::CheckFired, t0() + Duration::seconds(3));
        assert!(dup.is_noop());
        assert_eq!(dup.runtime.next_timeout_at, rt.next_timeout_at);
    }

    #[test]
    fn early_check_delivery_is_stale() {
        let rt = enabled_at(t0());
        let rt = dms()
            .step(&rt, DmsEvent::Confirmed, t0() + Duration::minutes(1))
            .runtime;
        // The check from before the confirmation arrives late but the
        // persisted deadline has moved 30 minutes out.
        let t = dms().step(&rt, DmsEvent::CheckFired, t0() + Duration::minutes(2));
        assert!(t.is_noop());
    }

    #[test]
    fn timeout_before_deadline_is_stale() {
        let rt = enabled_at(t0());
        let rt = dms().step(&rt, DmsEvent::CheckFired, t0()).runtime;
        let t = dms().step(&rt, DmsEvent::TimeoutFired, t0() + Duration::seconds(30));
        assert!(t.is_noop());
    }

    #[test]
    fn late_timeout_anchors_next_check_on_delivery() {
        let rt = enabled_at(t0());
        let rt = dms().step(&rt, DmsEvent::CheckFired, t0()).runtime;
        // Delivered 9 minutes late by an inexact alarm window.
        let fired = t0() + Duration::seconds(600) + Duration::minutes(9);
        let t = dms().step(&rt, DmsEvent::TimeoutFired, fired);
        assert_eq!(t.runtime.next_check_at, Some(fired + Duration::minutes(30)));
    }
}
