//! [`TokioAlarmScheduler`] – wall-clock alarms on a Tokio runtime.
//!
//! Each scheduled alarm is one sleeping task.  When it wakes it sends
//! [`AlarmId::fired_event`] on the event channel; the receiver routes the
//! event to the DMS controller.  Scheduling an id that is already pending
//! aborts the old task first, so an id is live at most once.
//!
//! When exact alarms are not permitted the deadline is rounded up to the next
//! [`INEXACT_WINDOW`] boundary, mirroring how a power-managed OS batches
//! inexact alarms.  The caller is told via [`AlarmPrecision::Window`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lifeline_types::{AlarmId, DmsEvent, LifelineError};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ports::{AlarmPrecision, AlarmScheduler};

/// Width of the coarse window used without the exact-alarm permission.
pub const INEXACT_WINDOW: Duration = Duration::from_secs(10 * 60);

pub struct TokioAlarmScheduler {
    handle: Handle,
    events: UnboundedSender<DmsEvent>,
    timers: Mutex<HashMap<AlarmId, JoinHandle<()>>>,
    exact_allowed: bool,
}

impl TokioAlarmScheduler {
    /// `handle` is the runtime the alarm tasks are spawned on; fired events
    /// are sent on `events`.
    pub fn new(handle: Handle, events: UnboundedSender<DmsEvent>, exact_allowed: bool) -> Self {
        Self {
            handle,
            events,
            timers: Mutex::new(HashMap::new()),
            exact_allowed,
        }
    }

    /// Ids whose alarm has not fired or been cancelled yet.
    pub fn pending(&self) -> Vec<AlarmId> {
        self.timers()
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(id, _)| *id)
            .collect()
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<AlarmId, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Round `at` up to the next [`INEXACT_WINDOW`] boundary.
pub fn window_deadline(at: DateTime<Utc>) -> DateTime<Utc> {
    let window = INEXACT_WINDOW.as_secs() as i64;
    let secs = at.timestamp();
    let rem = secs.rem_euclid(window);
    if rem == 0 && at.timestamp_subsec_nanos() == 0 {
        return at;
    }
    DateTime::from_timestamp(secs - rem + window, 0).unwrap_or(at)
}

impl AlarmScheduler for TokioAlarmScheduler {
    fn schedule_at(&self, id: AlarmId, at: DateTime<Utc>) -> Result<AlarmPrecision, LifelineError> {
        let (fire_at, precision) = if self.exact_allowed {
            (at, AlarmPrecision::Exact)
        } else {
            warn!(alarm = %id, "exact alarms not permitted; using a {}-minute window", INEXACT_WINDOW.as_secs() / 60);
            (window_deadline(at), AlarmPrecision::Window(INEXACT_WINDOW))
        };

        if self.events.is_closed() {
            return Err(LifelineError::Scheduling(format!(
                "alarm {id}: event receiver has shut down"
            )));
        }

        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let events = self.events.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(alarm = %id, "alarm fired");
            if events.send(id.fired_event()).is_err() {
                warn!(alarm = %id, "alarm fired after the event receiver shut down");
            }
        });

        if let Some(previous) = self.timers().insert(id, task) {
            previous.abort();
        }
        debug!(alarm = %id, at = %fire_at, "alarm scheduled");
        Ok(precision)
    }

    fn cancel(&self, id: AlarmId) {
        if let Some(task) = self.timers().remove(&id) {
            task.abort();
            debug!(alarm = %id, "alarm cancelled");
        }
    }
}

impl Drop for TokioAlarmScheduler {
    fn drop(&mut self) {
        for (_, task) in self.timers().drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lifeline_types::{CHECK_ALARM, TIMEOUT_ALARM};
    use tokio::sync::mpsc;

    const QUIET: Duration = Duration::from_millis(150);

    #[tokio::test]
    async fn past_deadline_fires_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmScheduler::new(Handle::current(), tx, true);

        let precision = alarms.schedule_at(TIMEOUT_ALARM, Utc::now()).unwrap();
        assert_eq!(precision, AlarmPrecision::Exact);
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("alarm should fire");
        assert_eq!(event, Some(DmsEvent::TimeoutFired));
    }

    #[tokio::test]
    async fn cancelled_alarm_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmScheduler::new(Handle::current(), tx, true);

        alarms
            .schedule_at(CHECK_ALARM, Utc::now() + chrono::Duration::milliseconds(50))
            .unwrap();
        alarms.cancel(CHECK_ALARM);
        assert!(alarms.pending().is_empty());
        assert!(tokio::time::timeout(QUIET, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn rescheduling_replaces_previous_alarm() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmScheduler::new(Handle::current(), tx, true);

        alarms
            .schedule_at(CHECK_ALARM, Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        alarms.schedule_at(CHECK_ALARM, Utc::now()).unwrap();
        assert_eq!(alarms.pending().len(), 1);

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert_eq!(first.unwrap(), Some(DmsEvent::CheckFired));
        assert!(tokio::time::timeout(QUIET, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn cancelling_unknown_alarm_is_noop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmScheduler::new(Handle::current(), tx, true);
        alarms.cancel(TIMEOUT_ALARM);
        assert!(alarms.pending().is_empty());
    }

    #[tokio::test]
    async fn inexact_mode_reports_window() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let alarms = TokioAlarmScheduler::new(Handle::current(), tx, false);
        let precision = alarms
            .schedule_at(CHECK_ALARM, Utc::now() + chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(precision, AlarmPrecision::Window(INEXACT_WINDOW));
        alarms.cancel(CHECK_ALARM);
    }

    #[tokio::test]
    async fn closed_receiver_is_a_scheduling_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let alarms = TokioAlarmScheduler::new(Handle::current(), tx, true);
        assert!(matches!(
            alarms.schedule_at(CHECK_ALARM, Utc::now()),
            Err(LifelineError::Scheduling(_))
        ));
    }

    #[test]
    fn window_deadline_rounds_up() {
        let at = Utc.with_ymd_and_hms(2026, 2, 3, 10, 3, 20).unwrap();
        assert_eq!(window_deadline(at), Utc.with_ymd_and_hms(2026, 2, 3, 10, 10, 0).unwrap());
        let boundary = Utc.with_ymd_and_hms(2026, 2, 3, 10, 20, 0).unwrap();
        assert_eq!(window_deadline(boundary), boundary);
    }
}
