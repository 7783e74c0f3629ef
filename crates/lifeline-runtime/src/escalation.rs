//! [`Escalator`] – alerting the trusted contact after a missed check.
//!
//! Escalation is fire-and-forget.  The message is composed from whatever
//! signals are available within their timeouts, sent once, and the outcome
//! is written to the event log.  A failed send is never retried and never
//! propagates to the DMS controller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lifeline_kernel::Clock;
use lifeline_memory::EventLog;
use lifeline_middleware::{BatteryReader, LocationProvider, MessagingChannel};
use lifeline_types::{Location, LogCategory};
use tracing::{info, warn};

use crate::signals::{SignalTimeouts, locate};

/// What to escalate, captured under the state lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationRequest {
    pub contact: String,
    pub trigger: String,
    pub missed_count: u32,
}

/// Outcome of [`Escalator::escalate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    Sent,
    NoContact,
    Failed(String),
}

/// Compose the alert sent to the trusted contact.
pub fn escalation_message(
    at: DateTime<Utc>,
    battery_pct: Option<u8>,
    location: Option<&Location>,
    trigger: &str,
) -> String {
    let battery = match battery_pct {
        Some(pct) => format!("🔋 {pct}%"),
        None => "🔋 Battery unknown".to_string(),
    };
    let map = location
        .map(Location::map_link)
        .unwrap_or_else(|| "(location unavailable)".to_string());

    format!(
        "⚠️ User missed safety checks.\n\
         Try contacting them.\n\
         (NOT necessarily emergency)\n\
         \n\
         🕒 {time} | {battery}\n\
         📍 {map}\n\
         \n\
         to activate live tracking send:\n\
         {trigger}\n\
         \n\
         to pause tracking send:\n\
         {trigger}-STOP",
        time = at.format("%H:%M %Z"),
    )
}

pub struct Escalator {
    location: Arc<dyn LocationProvider>,
    battery: Arc<dyn BatteryReader>,
    channel: Arc<dyn MessagingChannel>,
    log: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    timeouts: SignalTimeouts,
}

impl Escalator {
    pub fn new(
        location: Arc<dyn LocationProvider>,
        battery: Arc<dyn BatteryReader>,
        channel: Arc<dyn MessagingChannel>,
        log: Arc<EventLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            location,
            battery,
            channel,
            log,
            clock,
            timeouts: SignalTimeouts::ESCALATION,
        }
    }

    pub fn with_timeouts(mut self, timeouts: SignalTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Send one alert.  Must be called without the state lock held.
    pub fn escalate(&self, request: &EscalationRequest) -> EscalationOutcome {
        if request.contact.trim().is_empty() {
            warn!(missed = request.missed_count, "no trusted contact set; escalation skipped");
            self.log.record(
                LogCategory::Safety,
                "Escalation skipped: no trusted contact set",
            );
            return EscalationOutcome::NoContact;
        }

        let location = locate(self.location.as_ref(), self.timeouts);
        let battery = self.battery.percent();
        let body = escalation_message(self.clock.now(), battery, location.as_ref(), &request.trigger);

        match self.channel.send(&request.contact, &body) {
            Ok(()) => {
                info!(missed = request.missed_count, located = location.is_some(), "escalation sent");
                self.log.record(
                    LogCategory::Safety,
                    &format!("Escalation sent to trusted contact (missed: {})", request.missed_count),
                );
                EscalationOutcome::Sent
            }
            Err(e) => {
                warn!(error = %e, "escalation delivery failed");
                self.log
                    .record(LogCategory::Safety, &format!("Escalation failed: {e}"));
                EscalationOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lifeline_kernel::ManualClock;
    use lifeline_middleware::sim::{OutboxChannel, SimBattery, SimLocation};
    use lifeline_types::LocationSource;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 4, 14, 5, 0).unwrap()
    }

    struct Rig {
        location: Arc<SimLocation>,
        battery: Arc<SimBattery>,
        outbox: Arc<OutboxChannel>,
        log: Arc<EventLog>,
        escalator: Escalator,
    }

    fn rig() -> Rig {
        let location = Arc::new(SimLocation::new());
        let battery = Arc::new(SimBattery::new(Some(64)));
        let outbox = Arc::new(OutboxChannel::new());
        let log = Arc::new(EventLog::open_in_memory().unwrap());
        let escalator = Escalator::new(
            location.clone(),
            battery.clone(),
            outbox.clone(),
            log.clone(),
            Arc::new(ManualClock::new(at())),
        );
        Rig { location, battery, outbox, log, escalator }
    }

    fn request(contact: &str) -> EscalationRequest {
        EscalationRequest {
            contact: contact.into(),
            trigger: "PANIC-42".into(),
            missed_count: 1,
        }
    }

    #[test]
    fn message_with_all_signals() {
        let loc = Location { latitude: 40.4, longitude: -3.7, source: LocationSource::Live };
        let msg = escalation_message(at(), Some(64), Some(&loc), "PANIC-42");
        assert!(msg.starts_with("⚠️ User missed safety checks."));
        assert!(msg.contains("(NOT necessarily emergency)"));
        assert!(msg.contains("🕒 14:05 UTC | 🔋 64%"));
        assert!(msg.contains("query=40.4,-3.7"));
        assert!(msg.contains("to activate live tracking send:\nPANIC-42\n"));
        assert!(msg.ends_with("to pause tracking send:\nPANIC-42-STOP"));
    }

    #[test]
    fn message_placeholders() {
        let msg = escalation_message(at(), None, None, "PANIC-42");
        assert!(msg.contains("🔋 Battery unknown"));
        assert!(msg.contains("📍 (location unavailable)"));
    }

    #[test]
    fn escalation_sends_to_contact() {
        let rig = rig();
        rig.location.set_last_known(Some((1.5, 2.5)));
        assert_eq!(rig.escalator.escalate(&request("5550100")), EscalationOutcome::Sent);

        let sent = rig.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "5550100");
        assert!(sent[0].1.contains("query=1.5,2.5"));
        assert!(rig.log.recent(1).unwrap()[0].message.contains("Escalation sent"));
    }

    #[test]
    fn blank_contact_skips_send() {
        let rig = rig();
        assert_eq!(rig.escalator.escalate(&request("  ")), EscalationOutcome::NoContact);
        assert!(rig.outbox.sent().is_empty());
        assert!(rig.location.requests().is_empty());
    }

    #[test]
    fn delivery_failure_is_logged_not_raised() {
        let rig = rig();
        rig.outbox.set_failing(true);
        rig.battery.set(None);
        let outcome = rig.escalator.escalate(&request("5550100"));
        assert!(matches!(outcome, EscalationOutcome::Failed(_)));
        let entry = &rig.log.recent(1).unwrap()[0];
        assert_eq!(entry.category, LogCategory::Safety);
        assert!(entry.message.starts_with("Escalation failed"));
    }
}
