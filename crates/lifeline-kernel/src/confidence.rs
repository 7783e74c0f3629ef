//! Diagnostic confidence attached to each heartbeat.
//!
//! The score tells the reader of a heartbeat how much to trust it.  It never
//! changes scheduling.

use std::fmt;

use lifeline_types::LocationSource;

use crate::policy::CRITICAL_BATTERY_PCT;

const BASE: i32 = 100;
const NO_LOCATION_PENALTY: i32 = 30;
const CACHED_LOCATION_PENALTY: i32 = 15;
const LOW_BATTERY_PENALTY: i32 = 20;
const COLD_START_PENALTY: i32 = 10;
const FLOOR: i32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfidenceLevel::High => "HIGH",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::Low => "LOW",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confidence {
    /// 40..=100
    pub score: u8,
    pub level: ConfidenceLevel,
}

/// Score one heartbeat.
///
/// `cold_start` is `true` when no previous heartbeat was ever recorded.
/// An unknown battery reading is penalised like a critical one.
pub fn estimate(
    location: Option<LocationSource>,
    battery_pct: Option<u8>,
    cold_start: bool,
) -> Confidence {
    let mut score = BASE;
    match location {
        None => score -= NO_LOCATION_PENALTY,
        Some(LocationSource::LastKnown) => score -= CACHED_LOCATION_PENALTY,
        Some(LocationSource::Live) => {}
    }
    if battery_pct.is_none_or(|pct| pct < CRITICAL_BATTERY_PCT) {
        score -= LOW_BATTERY_PENALTY;
    }
    if cold_start {
        score -= COLD_START_PENALTY;
    }

    let score = score.clamp(FLOOR, BASE) as u8;
    let level = match score {
        85.. => ConfidenceLevel::High,
        65.. => ConfidenceLevel::Medium,
        _ => ConfidenceLevel::Low,
    };
    Confidence { score, level }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_signals_are_high() {
        let c = estimate(Some(LocationSource::Live), Some(80), false);
        assert_eq!(c, Confidence { score: 100, level: ConfidenceLevel::High });
    }

    #[test]
    fn cached_fix_drops_to_high_boundary() {
        let c = estimate(Some(LocationSource::LastKnown), Some(80), false);
        assert_eq!(c.score, 85);
        assert_eq!(c.level, ConfidenceLevel::High);
    }

    #[test]
    fn penalties_accumulate() {
        let c = estimate(None, Some(80), true);
        assert_eq!(c.score, 60);
        assert_eq!(c.level, ConfidenceLevel::Low);

        let c = estimate(Some(LocationSource::LastKnown), Some(80), true);
        assert_eq!(c.score, 75);
        assert_eq!(c.level, ConfidenceLevel::Medium);
    }

    #[test]
    fn unknown_battery_is_penalised() {
        assert_eq!(estimate(Some(LocationSource::Live), None, false).score, 80);
        assert_eq!(estimate(Some(LocationSource::Live), Some(10), false).score, 80);
    }

    #[test]
    fn score_is_floored() {
        let c = estimate(None, None, true);
        assert_eq!(c.score, 40);
        assert_eq!(c.level, ConfidenceLevel::Low);
        assert_eq!(c.level.to_string(), "LOW");
    }
}
