//! `lifeline-kernel` – Safety rules.
//!
//! The deterministic core of Lifeline.  Nothing in this crate performs I/O:
//! every function takes the current state and the current time as input and
//! returns a decision, so the rules can be tested without timers, radios or a
//! database.
//!
//! # Modules
//!
//! - [`clock`] – [`Clock`][clock::Clock]: the injectable wall-clock, with a
//!   [`SystemClock`][clock::SystemClock] and a settable
//!   [`ManualClock`][clock::ManualClock] for tests.
//! - [`dead_mans_switch`] – [`DeadMansSwitch`][dead_mans_switch::DeadMansSwitch]:
//!   the check / timeout / confirm state machine.  Given a
//!   [`DmsEvent`][lifeline_types::DmsEvent] it returns the next
//!   [`DmsRuntime`][lifeline_types::DmsRuntime] and the side effects the
//!   controller must perform.
//! - [`policy`] – [`decide`][policy::decide]: maps declared intent, battery
//!   level and suspension to a [`HeartbeatPolicy`][lifeline_types::HeartbeatPolicy].
//! - [`command_gate`] – [`CommandGate`][command_gate::CommandGate]: sender
//!   authorization and trigger-phrase classification of inbound commands.
//! - [`confidence`] – [`estimate`][confidence::estimate]: diagnostic
//!   confidence score attached to heartbeats.

pub mod clock;
pub mod command_gate;
pub mod confidence;
pub mod dead_mans_switch;
pub mod policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command_gate::{Command, CommandGate, GateDecision};
pub use confidence::{Confidence, ConfidenceLevel};
pub use dead_mans_switch::{DeadMansSwitch, DmsEffect, Transition};
