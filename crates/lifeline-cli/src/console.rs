//! Terminal stand-ins for the device collaborators.
//!
//! Notifications, presence leases and (without a webhook) outbound messages
//! are printed.  Battery and location come from the settable simulators in
//! `lifeline_middleware::sim` and are driven by `/battery` and `/location`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use lifeline_middleware::{MessagingChannel, Notifier, PresenceLease};
use lifeline_types::{LifelineError, Notification};
use tracing::debug;

/// Prints notifications as boxed blocks.
#[derive(Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn show(&self, notification: &Notification) {
        println!();
        println!("  {} {}", "🔔".yellow(), notification.title.bold().yellow());
        println!("     {}", notification.body);
        for action in &notification.actions {
            println!("     [{}] – type {}", action.label.bold(), "/ok".bold().cyan());
        }
        println!();
    }

    fn cancel(&self, id: u32) {
        debug!(id, "notification dismissed");
    }
}

/// A labelled presence lease.  Only changes are printed.
pub struct ConsolePresence {
    label: &'static str,
    active: AtomicBool,
    display: Mutex<String>,
}

impl ConsolePresence {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            active: AtomicBool::new(false),
            display: Mutex::new(String::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn display(&self) -> String {
        self.display.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl PresenceLease for ConsolePresence {
    fn start(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            println!("  {} {} started", "●".green(), self.label.bold());
        }
    }

    fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            println!("  {} {} stopped", "○".dimmed(), self.label.bold());
        }
        self.display.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    fn set_display(&self, text: &str) {
        let mut display = self.display.lock().unwrap_or_else(|p| p.into_inner());
        if *display != text {
            *display = text.to_string();
            println!("  {} {}: {}", "●".green(), self.label.bold(), text.dimmed());
        }
    }
}

/// Prints outbound messages instead of sending them.
#[derive(Default)]
pub struct ConsoleChannel;

impl MessagingChannel for ConsoleChannel {
    fn send(&self, destination: &str, body: &str) -> Result<(), LifelineError> {
        println!();
        println!("  {} {}", "📤 Message to".bold().magenta(), destination.bold());
        for line in body.lines() {
            println!("  │ {line}");
        }
        println!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_tracks_state_and_display() {
        let lease = ConsolePresence::new("Panic mode");
        assert!(!lease.is_active());
        lease.start();
        lease.set_display("Mode: AGGRESSIVE • Update every 15 min");
        assert!(lease.is_active());
        assert_eq!(lease.display(), "Mode: AGGRESSIVE • Update every 15 min");
        lease.stop();
        assert!(!lease.is_active());
        assert!(lease.display().is_empty());
    }

    #[test]
    fn console_channel_always_succeeds() {
        assert!(ConsoleChannel.send("5550100", "hello\nworld").is_ok());
    }
}
