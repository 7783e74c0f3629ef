use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Declared intent
// ─────────────────────────────────────────────────────────────────────────────

/// What the user says they are doing. Drives the heartbeat policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeclaredIntent {
    #[default]
    Normal,
    Traveling,
    Crowded,
    Lost,
    Aggressive,
    SaveBattery,
}

impl DeclaredIntent {
    pub const ALL: [DeclaredIntent; 6] = [
        DeclaredIntent::Normal,
        DeclaredIntent::Traveling,
        DeclaredIntent::Crowded,
        DeclaredIntent::Lost,
        DeclaredIntent::Aggressive,
        DeclaredIntent::SaveBattery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredIntent::Normal => "NORMAL",
            DeclaredIntent::Traveling => "TRAVELING",
            DeclaredIntent::Crowded => "CROWDED",
            DeclaredIntent::Lost => "LOST",
            DeclaredIntent::Aggressive => "AGGRESSIVE",
            DeclaredIntent::SaveBattery => "SAVE_BATTERY",
        }
    }
}

impl fmt::Display for DeclaredIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeclaredIntent {
    type Err = LifelineError;

    /// Case-insensitive; `-` and spaces are accepted in place of `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        DeclaredIntent::ALL
            .into_iter()
            .find(|intent| intent.as_str() == normalized)
            .ok_or_else(|| LifelineError::InvalidConfig(format!("unknown intent '{s}'")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent state
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_BATTERY_CAPACITY_MAH: u32 = 5000;

/// Durable, process-wide agent state.
///
/// `suspended` implies `armed`: use [`AgentState::disarm`] rather than
/// clearing `armed` directly so that suspension and panic mode are cleared
/// together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// The agent accepts commands and runs its scheduling pipeline.
    pub armed: bool,
    /// Heartbeats paused while armed.
    pub suspended: bool,
    /// Panic mode was activated by the trigger phrase.
    pub panic_active: bool,
    /// Escalation and heartbeat destination.
    pub trusted_contact: String,
    /// Case-insensitive shared secret for remote commands.
    pub trigger_phrase: String,
    pub declared_intent: DeclaredIntent,
    /// Used to estimate remaining power in heartbeat messages.
    pub battery_capacity_mah: u32,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            armed: false,
            suspended: false,
            panic_active: false,
            trusted_contact: String::new(),
            trigger_phrase: String::new(),
            declared_intent: DeclaredIntent::Normal,
            battery_capacity_mah: DEFAULT_BATTERY_CAPACITY_MAH,
        }
    }
}

impl AgentState {
    /// A contact and a trigger phrase are both required before arming.
    pub fn is_configured(&self) -> bool {
        !self.trusted_contact.trim().is_empty() && !self.trigger_phrase.trim().is_empty()
    }

    /// Clear `armed` together with everything that depends on it.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.suspended = false;
        self.panic_active = false;
    }

    /// The phrase that pauses heartbeats.
    pub fn stop_phrase(&self) -> String {
        format!("{}-STOP", self.trigger_phrase)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dead man's switch configuration & runtime
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_CHECK_INTERVAL_MINUTES: u32 = 30;
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 600;

/// User-adjustable DMS cadence. Both values are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmsConfig {
    pub check_interval_minutes: u32,
    pub timeout_seconds: u32,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl DmsConfig {
    pub const FREQUENT: DmsConfig = DmsConfig { check_interval_minutes: 15, timeout_seconds: 300 };
    pub const BALANCED: DmsConfig = DmsConfig { check_interval_minutes: 30, timeout_seconds: 600 };
    pub const RELAXED: DmsConfig = DmsConfig { check_interval_minutes: 60, timeout_seconds: 900 };

    /// Validate and build a config.
    ///
    /// # Errors
    ///
    /// [`LifelineError::InvalidConfig`] when either value is zero.
    pub fn new(check_interval_minutes: u32, timeout_seconds: u32) -> Result<Self, LifelineError> {
        if check_interval_minutes == 0 {
            return Err(LifelineError::InvalidConfig(
                "check interval must be at least one minute".to_string(),
            ));
        }
        if timeout_seconds == 0 {
            return Err(LifelineError::InvalidConfig(
                "timeout must be at least one second".to_string(),
            ));
        }
        Ok(Self { check_interval_minutes, timeout_seconds })
    }

    /// Parse raw user input. Nothing is applied unless both fields are valid.
    pub fn parse(check_interval_minutes: &str, timeout_seconds: &str) -> Result<Self, LifelineError> {
        let interval = check_interval_minutes.trim().parse::<u32>().map_err(|_| {
            LifelineError::InvalidConfig(format!(
                "check interval '{check_interval_minutes}' is not a whole number of minutes"
            ))
        })?;
        let timeout = timeout_seconds.trim().parse::<u32>().map_err(|_| {
            LifelineError::InvalidConfig(format!(
                "timeout '{timeout_seconds}' is not a whole number of seconds"
            ))
        })?;
        Self::new(interval, timeout)
    }

    /// Look up a named preset (`frequent`, `balanced`, `relaxed`).
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "frequent" => Some(Self::FREQUENT),
            "balanced" => Some(Self::BALANCED),
            "relaxed" => Some(Self::RELAXED),
            _ => None,
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.check_interval_minutes))
    }

    pub fn timeout(&self) -> Duration {
        Duration::seconds(i64::from(self.timeout_seconds))
    }
}

/// Volatile DMS state, persisted so alarms can be rebuilt after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmsRuntime {
    pub enabled: bool,
    pub last_confirmed_at: Option<DateTime<Utc>>,
    pub missed_count: u32,
    pub next_check_at: Option<DateTime<Utc>>,
    /// Only set while a response window is open.
    pub next_timeout_at: Option<DateTime<Utc>>,
}

/// Phase of the dead man's switch, derived from [`DmsRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmsPhase {
    Disabled,
    WaitingForCheck,
    /// A check fired but no response window is recorded yet.
    CheckIssued,
    TimeoutArmed,
}

impl DmsRuntime {
    pub fn phase(&self) -> DmsPhase {
        match (self.enabled, self.next_check_at, self.next_timeout_at) {
            (false, _, _) => DmsPhase::Disabled,
            (true, _, Some(_)) => DmsPhase::TimeoutArmed,
            (true, Some(_), None) => DmsPhase::WaitingForCheck,
            (true, None, None) => DmsPhase::CheckIssued,
        }
    }
}

impl fmt::Display for DmsPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DmsPhase::Disabled => "DISABLED",
            DmsPhase::WaitingForCheck => "WAITING_FOR_CHECK",
            DmsPhase::CheckIssued => "CHECK_ISSUED",
            DmsPhase::TimeoutArmed => "TIMEOUT_ARMED",
        };
        f.write_str(label)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Heartbeat policy
// ─────────────────────────────────────────────────────────────────────────────

/// Strategy bucket selected by the policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyMode {
    Suspended,
    SurvivalCriticalBattery,
    Survival,
    Visibility,
    Aggressive,
    AdaptiveHighBattery,
    AdaptiveLowBattery,
}

impl PolicyMode {
    pub fn label(&self) -> &'static str {
        match self {
            PolicyMode::Suspended => "SUSPENDED",
            PolicyMode::SurvivalCriticalBattery => "SURVIVAL (Critical Battery)",
            PolicyMode::Survival => "SURVIVAL",
            PolicyMode::Visibility => "VISIBILITY",
            PolicyMode::Aggressive => "AGGRESSIVE",
            PolicyMode::AdaptiveHighBattery => "ADAPTIVE (High Battery)",
            PolicyMode::AdaptiveLowBattery => "ADAPTIVE (Low Battery)",
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Heartbeat cadence produced by the policy engine. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPolicy {
    pub mode: PolicyMode,
    /// `0` when suspended.
    pub interval_minutes: u32,
}

impl HeartbeatPolicy {
    pub fn new(mode: PolicyMode, interval_minutes: u32) -> Self {
        Self { mode, interval_minutes }
    }

    pub fn is_suspended(&self) -> bool {
        self.mode == PolicyMode::Suspended
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Alarms & events
// ─────────────────────────────────────────────────────────────────────────────

/// The two alarm kinds owned by the dead man's switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmAction {
    Check,
    Timeout,
}

/// Stable alarm identity. Scheduling and cancellation must use the same
/// `(action, slot)` pair or the cancellation silently misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlarmId {
    pub action: AlarmAction,
    pub slot: u32,
}

pub const CHECK_ALARM: AlarmId = AlarmId { action: AlarmAction::Check, slot: 8000 };
pub const TIMEOUT_ALARM: AlarmId = AlarmId { action: AlarmAction::Timeout, slot: 8001 };

impl AlarmId {
    /// The event delivered when this alarm fires.
    pub fn fired_event(&self) -> DmsEvent {
        match self.action {
            AlarmAction::Check => DmsEvent::CheckFired,
            AlarmAction::Timeout => DmsEvent::TimeoutFired,
        }
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            AlarmAction::Check => "dms.check",
            AlarmAction::Timeout => "dms.timeout",
        };
        write!(f, "{action}#{}", self.slot)
    }
}

/// Everything the dead man's switch reacts to, routed to one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum DmsEvent {
    Enable,
    Disable,
    CheckFired,
    TimeoutFired,
    Confirmed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications
// ─────────────────────────────────────────────────────────────────────────────

/// Shared id so a new check replaces, rather than stacks on, the previous one.
pub const DMS_NOTIFICATION_ID: u32 = 999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub label: String,
    /// Event delivered when the user taps the action.
    pub event: DmsEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u32,
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Signals
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationSource {
    Live,
    LastKnown,
}

impl LocationSource {
    pub fn label(&self) -> &'static str {
        match self {
            LocationSource::Live => "GPS / Network (Live)",
            LocationSource::LastKnown => "Last Known (Cached)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub source: LocationSource,
}

impl Location {
    pub fn map_link(&self) -> String {
        format!(
            "https://www.google.com/maps/search/?api=1&query={},{}",
            self.latitude, self.longitude
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event log
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogCategory {
    /// Policy, heartbeat and lifecycle decisions.
    Agent,
    /// Dead man's switch flow.
    Safety,
    /// Inbound remote commands, accepted or rejected.
    Command,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Agent => "AGENT",
            LogCategory::Safety => "SAFETY",
            LogCategory::Command => "COMMAND",
        }
    }
}

impl FromStr for LogCategory {
    type Err = LifelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AGENT" => Ok(LogCategory::Agent),
            "SAFETY" => Ok(LogCategory::Safety),
            "COMMAND" => Ok(LogCategory::Command),
            other => Err(LifelineError::InvalidConfig(format!("unknown log category '{other}'"))),
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub category: LogCategory,
    #[serde(rename = "msg")]
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type shared across the Lifeline crates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Agent not configured: {0}")]
    NotConfigured(String),

    #[error("State store error: {0}")]
    Storage(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Delivery to {destination} failed: {details}")]
    Delivery { destination: String, details: String },
}
