//! Heartbeat policy decision.
//!
//! | condition                         | mode                          | interval |
//! |-----------------------------------|-------------------------------|----------|
//! | suspended                         | `SUSPENDED`                   | 0        |
//! | battery < 15 %                    | `SURVIVAL (Critical Battery)` | 60 min   |
//! | `TRAVELING`, `SAVE_BATTERY`       | `SURVIVAL`                    | 60 min   |
//! | `CROWDED`, `LOST`                 | `VISIBILITY`                  | 15 min   |
//! | `AGGRESSIVE`                      | `AGGRESSIVE`                  | 15 min   |
//! | `NORMAL`, battery > 30 %          | `ADAPTIVE (High Battery)`     | 15 min   |
//! | `NORMAL`, battery ≤ 30 %          | `ADAPTIVE (Low Battery)`      | 60 min   |
//!
//! Rows are evaluated top to bottom; the first match wins.

use lifeline_types::{DeclaredIntent, HeartbeatPolicy, PolicyMode};

/// Below this level every intent falls back to the slow cadence.
pub const CRITICAL_BATTERY_PCT: u8 = 15;
/// Above this level the adaptive mode uses the fast cadence.
pub const HIGH_BATTERY_PCT: u8 = 30;
/// Battery level assumed when the reader has no answer.
pub const UNKNOWN_BATTERY_PCT: u8 = 50;

pub const FAST_INTERVAL_MINUTES: u32 = 15;
pub const SLOW_INTERVAL_MINUTES: u32 = 60;

/// Pick the heartbeat cadence.  Total and deterministic.
///
/// ```
/// use lifeline_kernel::policy::decide;
/// use lifeline_types::{DeclaredIntent, PolicyMode};
///
/// let p = decide(DeclaredIntent::Aggressive, Some(50), false);
/// assert_eq!(p.mode, PolicyMode::Aggressive);
/// assert_eq!(p.interval_minutes, 15);
/// ```
pub fn decide(intent: DeclaredIntent, battery_pct: Option<u8>, suspended: bool) -> HeartbeatPolicy {
    if suspended {
        return HeartbeatPolicy::new(PolicyMode::Suspended, 0);
    }

    let battery = battery_pct.unwrap_or(UNKNOWN_BATTERY_PCT);
    if battery < CRITICAL_BATTERY_PCT {
        return HeartbeatPolicy::new(PolicyMode::SurvivalCriticalBattery, SLOW_INTERVAL_MINUTES);
    }

    match intent {
        DeclaredIntent::Traveling | DeclaredIntent::SaveBattery => {
            HeartbeatPolicy::new(PolicyMode::Survival, SLOW_INTERVAL_MINUTES)
        }
        DeclaredIntent::Crowded | DeclaredIntent::Lost => {
            HeartbeatPolicy::new(PolicyMode::Visibility, FAST_INTERVAL_MINUTES)
        }
        DeclaredIntent::Aggressive => {
            HeartbeatPolicy::new(PolicyMode::Aggressive, FAST_INTERVAL_MINUTES)
        }
        DeclaredIntent::Normal if battery > HIGH_BATTERY_PCT => {
            HeartbeatPolicy::new(PolicyMode::AdaptiveHighBattery, FAST_INTERVAL_MINUTES)
        }
        DeclaredIntent::Normal => {
            HeartbeatPolicy::new(PolicyMode::AdaptiveLowBattery, SLOW_INTERVAL_MINUTES)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspended_wins_over_everything() {
        for intent in DeclaredIntent::ALL {
            for battery in [None, Some(0), Some(10), Some(100)] {
                assert_eq!(
                    decide(intent, battery, true),
                    HeartbeatPolicy::new(PolicyMode::Suspended, 0)
                );
            }
        }
    }

    #[test]
    fn critical_battery_overrides_intent() {
        for intent in DeclaredIntent::ALL {
            assert_eq!(
                decide(intent, Some(10), false),
                HeartbeatPolicy::new(PolicyMode::SurvivalCriticalBattery, 60)
            );
        }
        // 15 itself is not critical.
        assert_eq!(decide(DeclaredIntent::Aggressive, Some(15), false).mode, PolicyMode::Aggressive);
    }

    #[test]
    fn intent_table() {
        let cases = [
            (DeclaredIntent::Traveling, PolicyMode::Survival, 60),
            (DeclaredIntent::SaveBattery, PolicyMode::Survival, 60),
            (DeclaredIntent::Crowded, PolicyMode::Visibility, 15),
            (DeclaredIntent::Lost, PolicyMode::Visibility, 15),
            (DeclaredIntent::Aggressive, PolicyMode::Aggressive, 15),
            (DeclaredIntent::Normal, PolicyMode::AdaptiveHighBattery, 15),
        ];
        for (intent, mode, interval) in cases {
            assert_eq!(
                decide(intent, Some(50), false),
                HeartbeatPolicy::new(mode, interval),
                "{intent}"
            );
        }
    }

    #[test]
    fn adaptive_threshold_is_exclusive() {
        assert_eq!(
            decide(DeclaredIntent::Normal, Some(30), false).mode,
            PolicyMode::AdaptiveLowBattery
        );
        assert_eq!(
            decide(DeclaredIntent::Normal, Some(31), false).mode,
            PolicyMode::AdaptiveHighBattery
        );
    }

    #[test]
    fn unknown_battery_counts_as_half() {
        assert_eq!(
            decide(DeclaredIntent::Normal, None, false),
            decide(DeclaredIntent::Normal, Some(50), false)
        );
    }
}
