//! `lifeline-runtime` – orchestration on top of the pure kernel.
//!
//! This crate wires the [`lifeline_kernel`] decisions to the collaborator
//! ports from [`lifeline_middleware`] and the [`StateStore`] boundary from
//! [`lifeline_memory`].  Nothing here knows whether alarms come from Tokio
//! timers or an operating-system scheduler.
//!
//! # Modules
//!
//! - [`controller`] – [`DmsController`]: runs the dead man's switch state
//!   machine, persists each transition and applies its alarm, notification
//!   and keep-alive effects.  Restores live alarms after a restart.
//! - [`escalation`] – [`Escalator`]: composes and sends the missed-check alert
//!   to the trusted contact, outside the state lock.
//! - [`heartbeat`] – [`HeartbeatTask`]: one panic-mode status message with
//!   location, battery, estimated power and a diagnostic confidence score.
//! - [`policy_engine`] – [`PolicyEngine`]: maps intent and battery to a
//!   heartbeat cadence and keeps the `panic_heartbeat` unit in step with it.
//! - [`agent`] – [`Agent`]: arm / disarm, declared intent, remote commands
//!   from the trusted contact, and a status snapshot.
//! - [`signals`] – best-effort location snapshots under fixed time budgets.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.
//!
//! # Locking
//!
//! Every component reads and writes durable state through one
//! [`StateStore`] lock.  Location fixes, battery reads and outbound messages
//! always happen with the lock released.
//!
//! [`StateStore`]: lifeline_memory::StateStore

pub mod agent;
pub mod controller;
pub mod escalation;
pub mod heartbeat;
pub mod policy_engine;
pub mod signals;
pub mod telemetry;

pub use agent::{Agent, AgentStatus, CommandOutcome};
pub use controller::DmsController;
pub use escalation::{EscalationOutcome, EscalationRequest, Escalator};
pub use heartbeat::{HeartbeatOutcome, HeartbeatTask};
pub use policy_engine::{HEARTBEAT_UNIT, PolicyEngine};
pub use signals::SignalTimeouts;
pub use telemetry::{TracerProviderGuard, init_tracing};
