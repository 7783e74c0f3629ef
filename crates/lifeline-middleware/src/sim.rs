//! In-memory collaborators for tests and dry runs.
//!
//! Every type here implements one port from [`crate::ports`] and records what
//! was asked of it, so the full Lifeline stack can run headless and tests can
//! assert on the exact alarms, work units, notifications and messages that
//! were produced.  None of them spawn threads or touch the network.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use lifeline_middleware::ports::AlarmScheduler;
//! use lifeline_middleware::sim::RecordingAlarms;
//! use lifeline_types::CHECK_ALARM;
//!
//! let alarms = RecordingAlarms::new();
//! let at = Utc::now();
//! alarms.schedule_at(CHECK_ALARM, at).unwrap();
//! assert_eq!(alarms.scheduled_at(CHECK_ALARM), Some(at));
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lifeline_types::{AlarmId, LifelineError, Location, LocationSource, Notification};

use crate::ports::{
    AlarmPrecision, AlarmScheduler, BatteryReader, LocationProvider, MessagingChannel, Notifier,
    PresenceLease, WorkScheduler, WorkUnit,
};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Alarms
// ────────────────────────────────────────────────────────────────────────────

/// Records live alarms without ever firing them.  Tests deliver the fired
/// event by hand.
pub struct RecordingAlarms {
    live: Mutex<HashMap<AlarmId, DateTime<Utc>>>,
    precision: Mutex<AlarmPrecision>,
    fail: AtomicBool,
}

impl Default for RecordingAlarms {
    fn default() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            precision: Mutex::new(AlarmPrecision::Exact),
            fail: AtomicBool::new(false),
        }
    }
}

impl RecordingAlarms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Precision reported by subsequent `schedule_at` calls.
    pub fn set_precision(&self, precision: AlarmPrecision) {
        *locked(&self.precision) = precision;
    }

    /// Make subsequent `schedule_at` calls fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn scheduled_at(&self, id: AlarmId) -> Option<DateTime<Utc>> {
        locked(&self.live).get(&id).copied()
    }

    pub fn live_count(&self) -> usize {
        locked(&self.live).len()
    }
}

impl AlarmScheduler for RecordingAlarms {
    fn schedule_at(&self, id: AlarmId, at: DateTime<Utc>) -> Result<AlarmPrecision, LifelineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LifelineError::Scheduling(format!("alarm {id}: simulated failure")));
        }
        locked(&self.live).insert(id, at);
        Ok(*locked(&self.precision))
    }

    fn cancel(&self, id: AlarmId) {
        locked(&self.live).remove(&id);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Work
// ────────────────────────────────────────────────────────────────────────────

struct RecurringEntry {
    interval: Duration,
    initial_delay: Duration,
    unit: WorkUnit,
}

/// Records recurring units and one-shot runs.  Nothing runs until a test
/// calls [`RecordingWork::run`] or [`RecordingWork::run_pending_once`].
#[derive(Default)]
pub struct RecordingWork {
    recurring: Mutex<HashMap<String, RecurringEntry>>,
    once: Mutex<Vec<WorkUnit>>,
}

impl RecordingWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        locked(&self.recurring).contains_key(name)
    }

    /// `(interval, initial_delay)` of the unit scheduled under `name`.
    pub fn schedule_of(&self, name: &str) -> Option<(Duration, Duration)> {
        locked(&self.recurring)
            .get(name)
            .map(|e| (e.interval, e.initial_delay))
    }

    pub fn recurring_count(&self) -> usize {
        locked(&self.recurring).len()
    }

    pub fn pending_once(&self) -> usize {
        locked(&self.once).len()
    }

    /// Run one tick of the unit scheduled under `name`.  Returns `false` if
    /// no such unit exists.
    pub fn run(&self, name: &str) -> bool {
        // Clone out of the lock: the unit may reschedule itself.
        let unit = locked(&self.recurring).get(name).map(|e| e.unit.clone());
        match unit {
            Some(unit) => {
                unit();
                true
            }
            None => false,
        }
    }

    /// Drain and run every enqueued one-shot unit.  Returns how many ran.
    pub fn run_pending_once(&self) -> usize {
        let units: Vec<WorkUnit> = locked(&self.once).drain(..).collect();
        for unit in &units {
            unit();
        }
        units.len()
    }
}

impl WorkScheduler for RecordingWork {
    fn schedule_every(
        &self,
        name: &str,
        interval: Duration,
        initial_delay: Duration,
        unit: WorkUnit,
    ) -> Result<(), LifelineError> {
        if interval.is_zero() {
            return Err(LifelineError::Scheduling(format!(
                "unit '{name}': interval must be non-zero"
            )));
        }
        locked(&self.recurring).insert(
            name.to_string(),
            RecurringEntry { interval, initial_delay, unit },
        );
        Ok(())
    }

    fn cancel(&self, name: &str) {
        locked(&self.recurring).remove(name);
    }

    fn cancel_all(&self) {
        locked(&self.recurring).clear();
        locked(&self.once).clear();
    }

    fn enqueue_once(&self, unit: WorkUnit) {
        locked(&self.once).push(unit);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Notifications & presence
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    active: Mutex<HashMap<u32, Notification>>,
    shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The notification currently displayed under `id`.
    pub fn active(&self, id: u32) -> Option<Notification> {
        locked(&self.active).get(&id).cloned()
    }

    /// Every notification ever shown, oldest first.
    pub fn history(&self) -> Vec<Notification> {
        locked(&self.shown).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, notification: &Notification) {
        locked(&self.active).insert(notification.id, notification.clone());
        locked(&self.shown).push(notification.clone());
    }

    fn cancel(&self, id: u32) {
        locked(&self.active).remove(&id);
    }
}

#[derive(Default)]
pub struct RecordingPresence {
    active: AtomicBool,
    display: Mutex<Option<String>>,
}

impl RecordingPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn display(&self) -> Option<String> {
        locked(&self.display).clone()
    }
}

impl PresenceLease for RecordingPresence {
    fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        *locked(&self.display) = None;
    }

    fn set_display(&self, text: &str) {
        *locked(&self.display) = Some(text.to_string());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Signals
// ────────────────────────────────────────────────────────────────────────────

/// Settable location source.  Records the timeouts it was called with.
#[derive(Default)]
pub struct SimLocation {
    live: Mutex<Option<(f64, f64)>>,
    cached: Mutex<Option<(f64, f64)>>,
    requests: Mutex<Vec<(LocationSource, Duration)>>,
}

impl SimLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_live(&self, fix: Option<(f64, f64)>) {
        *locked(&self.live) = fix;
    }

    pub fn set_last_known(&self, fix: Option<(f64, f64)>) {
        *locked(&self.cached) = fix;
    }

    /// `(kind, timeout)` of every request, oldest first.
    pub fn requests(&self) -> Vec<(LocationSource, Duration)> {
        locked(&self.requests).clone()
    }
}

impl LocationProvider for SimLocation {
    fn current(&self, timeout: Duration) -> Option<Location> {
        locked(&self.requests).push((LocationSource::Live, timeout));
        (*locked(&self.live)).map(|(latitude, longitude)| Location {
            latitude,
            longitude,
            source: LocationSource::Live,
        })
    }

    fn last_known(&self, timeout: Duration) -> Option<Location> {
        locked(&self.requests).push((LocationSource::LastKnown, timeout));
        (*locked(&self.cached)).map(|(latitude, longitude)| Location {
            latitude,
            longitude,
            source: LocationSource::LastKnown,
        })
    }
}

#[derive(Default)]
pub struct SimBattery {
    percent: Mutex<Option<u8>>,
}

impl SimBattery {
    pub fn new(percent: Option<u8>) -> Self {
        Self {
            percent: Mutex::new(percent),
        }
    }

    pub fn set(&self, percent: Option<u8>) {
        *locked(&self.percent) = percent.map(|p| p.min(100));
    }
}

impl BatteryReader for SimBattery {
    fn percent(&self) -> Option<u8> {
        *locked(&self.percent)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Messaging
// ────────────────────────────────────────────────────────────────────────────

/// Captures outbound messages instead of sending them.
#[derive(Default)]
pub struct OutboxChannel {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl OutboxChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// `(destination, body)` of every delivered message, oldest first.
    pub fn sent(&self) -> Vec<(String, String)> {
        locked(&self.sent).clone()
    }
}

impl MessagingChannel for OutboxChannel {
    fn send(&self, destination: &str, body: &str) -> Result<(), LifelineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LifelineError::Delivery {
                destination: destination.to_string(),
                details: "simulated outage".to_string(),
            });
        }
        locked(&self.sent).push((destination.to_string(), body.to_string()));
        Ok(())
    }
}
