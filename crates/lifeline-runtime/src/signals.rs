//! Best-effort signal snapshots.
//!
//! Location and battery are optional.  A missing fix or an unknown battery
//! level never aborts an escalation or a heartbeat; callers substitute a
//! placeholder and carry on.

use std::time::Duration;

use lifeline_middleware::LocationProvider;
use lifeline_types::Location;
use tracing::debug;

/// Time budgets for a location snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTimeouts {
    pub live: Duration,
    pub cached: Duration,
}

impl SignalTimeouts {
    /// Used when alerting the trusted contact.
    pub const ESCALATION: SignalTimeouts = SignalTimeouts {
        live: Duration::from_secs(8),
        cached: Duration::from_secs(2),
    };

    pub const HEARTBEAT: SignalTimeouts = SignalTimeouts {
        live: Duration::from_secs(5),
        cached: Duration::from_secs(2),
    };
}

/// A live fix, falling back to the last known one.
pub fn locate(provider: &dyn LocationProvider, timeouts: SignalTimeouts) -> Option<Location> {
    if let Some(fix) = provider.current(timeouts.live) {
        return Some(fix);
    }
    debug!("no live fix within {:?}; trying last known", timeouts.live);
    let cached = provider.last_known(timeouts.cached);
    if cached.is_none() {
        debug!("no location available");
    }
    cached
}
