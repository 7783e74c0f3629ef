//! Collaborator traits.
//!
//! All ports are synchronous and object-safe.  Core callbacks run on blocking
//! threads and hold `Arc<dyn Port>` handles, so implementations must be
//! `Send + Sync`.
//!
//! | Port | Used by | Failure mode |
//! |---|---|---|
//! | [`AlarmScheduler`] | DMS controller | may degrade to a coarse window |
//! | [`WorkScheduler`] | policy engine | rejects a zero interval |
//! | [`Notifier`] | DMS controller | best effort |
//! | [`PresenceLease`] | DMS controller, agent | best effort |
//! | [`LocationProvider`] | escalation, heartbeat | `None` on timeout / denial |
//! | [`BatteryReader`] | escalation, heartbeat, policy | `None` when unknown |
//! | [`MessagingChannel`] | escalation, heartbeat | error is logged, never retried |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lifeline_types::{AlarmId, LifelineError, Location, Notification};

/// How precisely a scheduled alarm will fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmPrecision {
    Exact,
    /// Exact alarms are not permitted; the alarm fires somewhere inside a
    /// window of this width.
    Window(Duration),
}

/// Absolute wall-clock alarms keyed by [`AlarmId`].
pub trait AlarmScheduler: Send + Sync {
    /// Schedule `id` at `at`, replacing any alarm with the same identity.
    /// A deadline in the past fires immediately.
    fn schedule_at(&self, id: AlarmId, at: DateTime<Utc>) -> Result<AlarmPrecision, LifelineError>;

    /// Cancel `id`.  Cancelling an alarm that is not scheduled is a no-op.
    fn cancel(&self, id: AlarmId);
}

/// A unit of work run on a blocking thread.
pub type WorkUnit = Arc<dyn Fn() + Send + Sync>;

/// Named recurring work.
pub trait WorkScheduler: Send + Sync {
    /// Run `unit` every `interval` after `initial_delay`, replacing any unit
    /// already scheduled under `name`.
    fn schedule_every(
        &self,
        name: &str,
        interval: Duration,
        initial_delay: Duration,
        unit: WorkUnit,
    ) -> Result<(), LifelineError>;

    fn cancel(&self, name: &str);

    fn cancel_all(&self);

    /// Run `unit` once, as soon as possible.
    fn enqueue_once(&self, unit: WorkUnit);
}

/// User-visible notifications.  Showing a notification with an id that is
/// already displayed replaces it.
pub trait Notifier: Send + Sync {
    fn show(&self, notification: &Notification);
    fn cancel(&self, id: u32);
}

/// Keeps the process (or device) awake while safety features are active.
pub trait PresenceLease: Send + Sync {
    fn start(&self);
    fn stop(&self);
    /// One-line status shown while the lease is held.
    fn set_display(&self, text: &str);
}

pub trait LocationProvider: Send + Sync {
    /// A fresh fix, or `None` if none arrives within `timeout`.
    fn current(&self, timeout: Duration) -> Option<Location>;
    /// The last cached fix, or `None` if none is available within `timeout`.
    fn last_known(&self, timeout: Duration) -> Option<Location>;
}

pub trait BatteryReader: Send + Sync {
    /// Charge level in percent, `None` when unknown.
    fn percent(&self) -> Option<u8>;
}

/// Out-of-band text channel to the trusted contact.
pub trait MessagingChannel: Send + Sync {
    fn send(&self, destination: &str, body: &str) -> Result<(), LifelineError>;
}
