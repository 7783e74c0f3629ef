//! `lifeline-middleware` – Collaborators
//!
//! Everything Lifeline needs from the outside world (timers, notifications,
//! radios, the message channel) is expressed as a narrow trait in [`ports`].
//! The core never depends on a concrete implementation.
//!
//! # Modules
//!
//! - [`ports`] – the collaborator traits: [`AlarmScheduler`][ports::AlarmScheduler],
//!   [`WorkScheduler`][ports::WorkScheduler], [`Notifier`][ports::Notifier],
//!   [`PresenceLease`][ports::PresenceLease], [`LocationProvider`][ports::LocationProvider],
//!   [`BatteryReader`][ports::BatteryReader] and
//!   [`MessagingChannel`][ports::MessagingChannel].
//! - [`alarm`] – [`TokioAlarmScheduler`][alarm::TokioAlarmScheduler]: absolute-time
//!   alarms on a Tokio runtime, delivered as [`DmsEvent`][lifeline_types::DmsEvent]s
//!   on an mpsc channel.  Degrades to a coarse window when exact alarms are
//!   not permitted.
//! - [`work`] – [`TokioWorkScheduler`][work::TokioWorkScheduler]: named,
//!   deduplicated recurring work plus one-shot runs.
//! - [`webhook`] – [`WebhookChannel`][webhook::WebhookChannel]: a
//!   [`MessagingChannel`][ports::MessagingChannel] that POSTs JSON to an HTTP
//!   SMS gateway.
//! - [`sim`] – in-memory, recording implementations of every port for tests
//!   and dry runs.

pub mod alarm;
pub mod ports;
pub mod sim;
pub mod webhook;
pub mod work;

pub use alarm::TokioAlarmScheduler;
pub use ports::{
    AlarmPrecision, AlarmScheduler, BatteryReader, LocationProvider, MessagingChannel, Notifier,
    PresenceLease, WorkScheduler, WorkUnit,
};
pub use webhook::WebhookChannel;
pub use work::TokioWorkScheduler;
