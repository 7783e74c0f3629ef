//! [`CommandGate`] – authorization of inbound remote commands.
//!
//! Every message arriving on the command channel passes through
//! [`CommandGate::evaluate`] before it can touch agent state.  Three checks
//! run in order:
//!
//! 1. **Armed** – a disarmed agent ignores all traffic.
//! 2. **Sender** – the digits of the sender must end with the digits of the
//!    trusted contact, so `+1 (555) 0100` matches a stored `5550100`.  The
//!    trusted contact must carry at least seven digits, which rules out
//!    trivially short suffixes.
//! 3. **Trigger phrase** – the body must equal the trigger phrase (activate)
//!    or the trigger phrase followed by `-STOP` (suspend), ignoring case and
//!    surrounding whitespace.
//!
//! Sender matching is a string comparison on a spoofable channel.  It keeps
//! accidental messages out; it is not authentication.
//!
//! # Example
//!
//! ```
//! use lifeline_kernel::command_gate::{Command, CommandGate, GateDecision};
//! use lifeline_types::AgentState;
//!
//! let state = AgentState {
//!     armed: true,
//!     trusted_contact: "5550100".into(),
//!     trigger_phrase: "PANIC-42".into(),
//!     ..AgentState::default()
//! };
//! let gate = CommandGate::default();
//!
//! assert_eq!(
//!     gate.evaluate(&state, "+1-555-0100", "panic-42"),
//!     GateDecision::Authorized(Command::Activate),
//! );
//! ```

use lifeline_types::AgentState;

/// Minimum number of digits a trusted contact must have.
pub const MIN_TRUSTED_DIGITS: usize = 7;

/// The lifecycle transition requested by an authorized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Trigger phrase: enter panic mode and resume heartbeats.
    Activate,
    /// `{trigger}-STOP`: pause heartbeats.
    Suspend,
    /// Authorized sender, unrecognised body.
    Ignore,
}

/// Outcome of [`CommandGate::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    NotArmed,
    /// `attempted_trigger` is set when the body contained the trigger phrase,
    /// which makes the rejection worth auditing.
    Unauthorized { attempted_trigger: bool },
    Authorized(Command),
}

#[derive(Debug, Clone, Copy)]
pub struct CommandGate {
    min_trusted_digits: usize,
}

impl Default for CommandGate {
    fn default() -> Self {
        Self {
            min_trusted_digits: MIN_TRUSTED_DIGITS,
        }
    }
}

impl CommandGate {
    pub fn new(min_trusted_digits: usize) -> Self {
        Self { min_trusted_digits }
    }

    /// Decide what an inbound `(sender, body)` pair may do.
    pub fn evaluate(&self, state: &AgentState, sender: &str, body: &str) -> GateDecision {
        if !state.armed {
            return GateDecision::NotArmed;
        }
        if !self.authorize(sender, &state.trusted_contact) {
            return GateDecision::Unauthorized {
                attempted_trigger: contains_trigger(body, &state.trigger_phrase),
            };
        }
        GateDecision::Authorized(classify(body, &state.trigger_phrase))
    }

    /// Suffix match on the digits of `sender` and `trusted`.
    pub fn authorize(&self, sender: &str, trusted: &str) -> bool {
        let sender = normalize_digits(sender);
        let trusted = normalize_digits(trusted);
        if trusted.len() < self.min_trusted_digits || sender.len() < trusted.len() {
            return false;
        }
        sender.ends_with(&trusted)
    }
}

/// Keep only ASCII digits.
pub fn normalize_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Map a message body to a [`Command`].  A blank trigger matches nothing.
pub fn classify(body: &str, trigger: &str) -> Command {
    let trigger = trigger.trim();
    if trigger.is_empty() {
        return Command::Ignore;
    }
    let body = body.trim().to_lowercase();
    let trigger = trigger.to_lowercase();
    if body == trigger {
        Command::Activate
    } else if body == format!("{trigger}-stop") {
        Command::Suspend
    } else {
        Command::Ignore
    }
}

fn contains_trigger(body: &str, trigger: &str) -> bool {
    let trigger = trigger.trim();
    !trigger.is_empty() && body.to_lowercase().contains(&trigger.to_lowercase())
}
