//! [`StateStore`] – the single ownership boundary for agent state.
//!
//! Alarm callbacks, recurring heartbeat work, inbound commands and user
//! confirmations can all run concurrently.  None of them touch the key-value
//! store directly: each callback takes one [`StoreGuard`] via
//! [`StateStore::lock`], reads what it needs, computes its transition and
//! writes the result before releasing the guard.  A `TIMEOUT` firing can
//! therefore never interleave with a confirmation that is clearing the same
//! fields.
//!
//! Values are stored as strings.  Reads fall back to the documented default
//! when a key is absent or unparsable, so a corrupted entry degrades to the
//! default instead of stalling the safety loop.
//!
//! # Example
//!
//! ```
//! use lifeline_memory::StateStore;
//!
//! let store = StateStore::in_memory();
//! {
//!     let mut guard = store.lock();
//!     let mut state = guard.agent_state().unwrap();
//!     state.trusted_contact = "5550100".into();
//!     guard.put_agent_state(&state).unwrap();
//! }
//! assert_eq!(store.lock().agent_state().unwrap().trusted_contact, "5550100");
//! ```

use std::fmt::Display;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lifeline_types::{AgentState, DeclaredIntent, DmsConfig, DmsRuntime};
use tracing::warn;

use crate::StoreError;
use crate::kv::{KeyValueStore, MemoryKv, SqliteKv};

mod keys {
    pub const TRUSTED_CONTACT: &str = "trusted_contact";
    pub const TRIGGER_PHRASE: &str = "trigger_phrase";
    pub const BATTERY_CAPACITY: &str = "battery_capacity_mah";
    pub const USER_INTENT: &str = "user_intent";
    pub const SUSPENDED: &str = "agent_suspended";
    pub const PANIC_ACTIVE: &str = "panic_active";
    pub const ARMED: &str = "agent_armed";

    pub const CHECK_INTERVAL_MINUTES: &str = "dms_check_interval_minutes";
    pub const TIMEOUT_SECONDS: &str = "dms_timeout_seconds";

    pub const DMS_ENABLED: &str = "dms_enabled";
    pub const LAST_CONFIRMED: &str = "dms_last_confirmed";
    pub const MISSED_COUNT: &str = "missed_count";
    pub const NEXT_CHECK_AT: &str = "next_check_at";
    pub const NEXT_TIMEOUT_AT: &str = "next_timeout_at";

    pub const HEARTBEAT_LAST_SENT: &str = "heartbeat_last_sent";
}

// ─────────────────────────────────────────────────────────────────────────────
// StateStore
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to the one mutex-guarded key-value store.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<Box<dyn KeyValueStore>>>,
}

impl StateStore {
    pub fn new(kv: impl KeyValueStore + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(kv))),
        }
    }

    /// Open (or create) a SQLite-backed store at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Ok(Self::new(SqliteKv::open(path)?))
    }

    /// A volatile store backed by [`MemoryKv`].
    pub fn in_memory() -> Self {
        Self::new(MemoryKv::new())
    }

    /// Enter the serialized access path.
    ///
    /// A poisoned mutex is recovered rather than propagated: a panic in one
    /// callback must not disable every later safety check.
    pub fn lock(&self) -> StoreGuard<'_> {
        let kv = self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("state store mutex was poisoned; recovering");
            poisoned.into_inner()
        });
        StoreGuard { kv }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StoreGuard
// ─────────────────────────────────────────────────────────────────────────────

/// Exclusive, typed view of the store for the duration of one callback.
pub struct StoreGuard<'a> {
    kv: MutexGuard<'a, Box<dyn KeyValueStore>>,
}

impl StoreGuard<'_> {
    // ── Agent state ───────────────────────────────────────────────────────

    pub fn agent_state(&self) -> Result<AgentState, StoreError> {
        let defaults = AgentState::default();
        Ok(AgentState {
            armed: self.read(keys::ARMED, false)?,
            suspended: self.read(keys::SUSPENDED, false)?,
            panic_active: self.read(keys::PANIC_ACTIVE, false)?,
            trusted_contact: self.read_string(keys::TRUSTED_CONTACT)?,
            trigger_phrase: self.read_string(keys::TRIGGER_PHRASE)?,
            declared_intent: self.read(keys::USER_INTENT, DeclaredIntent::Normal)?,
            battery_capacity_mah: self.read(keys::BATTERY_CAPACITY, defaults.battery_capacity_mah)?,
        })
    }

    /// Persist `state`.  `agent_armed` is written last.
    pub fn put_agent_state(&mut self, state: &AgentState) -> Result<(), StoreError> {
        // Never persist a suspension without the arm it depends on.
        let suspended = state.suspended && state.armed;
        self.kv.set(keys::TRUSTED_CONTACT, &state.trusted_contact)?;
        self.kv.set(keys::TRIGGER_PHRASE, &state.trigger_phrase)?;
        self.kv.set(keys::USER_INTENT, state.declared_intent.as_str())?;
        self.kv
            .set(keys::BATTERY_CAPACITY, &state.battery_capacity_mah.to_string())?;
        self.kv.set(keys::PANIC_ACTIVE, &state.panic_active.to_string())?;
        self.kv.set(keys::SUSPENDED, &suspended.to_string())?;
        self.kv.set(keys::ARMED, &state.armed.to_string())?;
        Ok(())
    }

    // ── DMS configuration ─────────────────────────────────────────────────

    pub fn dms_config(&self) -> Result<DmsConfig, StoreError> {
        let defaults = DmsConfig::default();
        let interval = self.read(keys::CHECK_INTERVAL_MINUTES, defaults.check_interval_minutes)?;
        let timeout = self.read(keys::TIMEOUT_SECONDS, defaults.timeout_seconds)?;
        // A zero that slipped into storage must not produce a busy loop.
        Ok(DmsConfig::new(interval, timeout).unwrap_or(defaults))
    }

    pub fn put_dms_config(&mut self, config: &DmsConfig) -> Result<(), StoreError> {
        self.kv.set(
            keys::CHECK_INTERVAL_MINUTES,
            &config.check_interval_minutes.to_string(),
        )?;
        self.kv
            .set(keys::TIMEOUT_SECONDS, &config.timeout_seconds.to_string())?;
        Ok(())
    }

    // ── DMS runtime ───────────────────────────────────────────────────────

    pub fn dms_runtime(&self) -> Result<DmsRuntime, StoreError> {
        Ok(DmsRuntime {
            enabled: self.read(keys::DMS_ENABLED, false)?,
            last_confirmed_at: self.read_time(keys::LAST_CONFIRMED)?,
            missed_count: self.read(keys::MISSED_COUNT, 0)?,
            next_check_at: self.read_time(keys::NEXT_CHECK_AT)?,
            next_timeout_at: self.read_time(keys::NEXT_TIMEOUT_AT)?,
        })
    }

    /// Persist `runtime`.  The `enabled` flag is written after the deadlines
    /// it guards.
    pub fn put_dms_runtime(&mut self, runtime: &DmsRuntime) -> Result<(), StoreError> {
        if !runtime.enabled {
            return self.clear_dms_runtime();
        }
        self.write_time(keys::LAST_CONFIRMED, runtime.last_confirmed_at)?;
        self.kv
            .set(keys::MISSED_COUNT, &runtime.missed_count.to_string())?;
        self.write_time(keys::NEXT_CHECK_AT, runtime.next_check_at)?;
        self.write_time(keys::NEXT_TIMEOUT_AT, runtime.next_timeout_at)?;
        self.kv.set(keys::DMS_ENABLED, "true")?;
        Ok(())
    }

    /// Drop volatile DMS state.  Configuration is preserved.  The `enabled`
    /// flag goes first.
    pub fn clear_dms_runtime(&mut self) -> Result<(), StoreError> {
        self.kv.remove(keys::DMS_ENABLED)?;
        self.kv.remove(keys::LAST_CONFIRMED)?;
        self.kv.remove(keys::MISSED_COUNT)?;
        self.kv.remove(keys::NEXT_CHECK_AT)?;
        self.kv.remove(keys::NEXT_TIMEOUT_AT)?;
        Ok(())
    }

    // ── Heartbeat bookkeeping ─────────────────────────────────────────────

    /// `None` means no heartbeat was ever sent (cold start).
    pub fn last_heartbeat_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.read_time(keys::HEARTBEAT_LAST_SENT)
    }

    pub fn set_last_heartbeat_at(&mut self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write_time(keys::HEARTBEAT_LAST_SENT, Some(at))
    }

    pub fn clear_last_heartbeat(&mut self) -> Result<(), StoreError> {
        self.kv.remove(keys::HEARTBEAT_LAST_SENT)
    }

    // ── Internal helpers ──────────────────────────────────────────────────

    fn read<T>(&self, key: &str, default: T) -> Result<T, StoreError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.kv.get(key)? {
            None => Ok(default),
            Some(raw) => match raw.parse::<T>() {
                Ok(value) => Ok(value),
                Err(e) => {
                    warn!(key, value = %raw, error = %e, "unparsable stored value; using default");
                    Ok(default)
                }
            },
        }
    }

    fn read_string(&self, key: &str) -> Result<String, StoreError> {
        Ok(self.kv.get(key)?.unwrap_or_default())
    }

    fn read_time(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(raw) = self.kv.get(key)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!(key, value = %raw, error = %e, "unparsable stored timestamp; treating as unset");
                Ok(None)
            }
        }
    }

    fn write_time(&mut self, key: &str, at: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        match at {
            Some(at) => self.kv.set(key, &at.to_rfc3339()),
            None => self.kv.remove(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lifeline_types::DmsPhase;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn fresh_store_yields_defaults() {
        let store = StateStore::in_memory();
        let guard = store.lock();
        assert_eq!(guard.agent_state().unwrap(), AgentState::default());
        assert_eq!(guard.dms_config().unwrap(), DmsConfig::default());
        assert_eq!(guard.dms_runtime().unwrap(), DmsRuntime::default());
        assert_eq!(guard.last_heartbeat_at().unwrap(), None);
    }

    #[test]
    fn agent_state_roundtrip() {
        let store = StateStore::in_memory();
        let state = AgentState {
            armed: true,
            suspended: true,
            panic_active: true,
            trusted_contact: "+1-555-0100".into(),
            trigger_phrase: "PANIC-42".into(),
            declared_intent: DeclaredIntent::Traveling,
            battery_capacity_mah: 4200,
        };
        store.lock().put_agent_state(&state).unwrap();
        assert_eq!(store.lock().agent_state().unwrap(), state);
    }

    #[test]
    fn suspension_is_not_persisted_without_arm() {
        let store = StateStore::in_memory();
        let state = AgentState {
            armed: false,
            suspended: true,
            ..AgentState::default()
        };
        store.lock().put_agent_state(&state).unwrap();
        assert!(!store.lock().agent_state().unwrap().suspended);
    }

    #[test]
    fn runtime_roundtrip_and_clear() {
        let store = StateStore::in_memory();
        let runtime = DmsRuntime {
            enabled: true,
            last_confirmed_at: Some(at(0)),
            missed_count: 2,
            next_check_at: None,
            next_timeout_at: Some(at(10)),
        };
        {
            let mut guard = store.lock();
            guard.put_dms_runtime(&runtime).unwrap();
            assert_eq!(guard.dms_runtime().unwrap(), runtime);
            assert_eq!(guard.dms_runtime().unwrap().phase(), DmsPhase::TimeoutArmed);
        }

        store.lock().clear_dms_runtime().unwrap();
        assert_eq!(store.lock().dms_runtime().unwrap(), DmsRuntime::default());
    }

    #[test]
    fn disabled_runtime_write_clears_state() {
        let store = StateStore::in_memory();
        let mut guard = store.lock();
        guard
            .put_dms_runtime(&DmsRuntime {
                enabled: true,
                next_check_at: Some(at(5)),
                ..DmsRuntime::default()
            })
            .unwrap();
        guard.put_dms_runtime(&DmsRuntime::default()).unwrap();
        assert_eq!(guard.dms_runtime().unwrap(), DmsRuntime::default());
    }

    #[test]
    fn config_is_preserved_when_runtime_is_cleared() {
        let store = StateStore::in_memory();
        let mut guard = store.lock();
        let cfg = DmsConfig::new(45, 120).unwrap();
        guard.put_dms_config(&cfg).unwrap();
        guard.clear_dms_runtime().unwrap();
        assert_eq!(guard.dms_config().unwrap(), cfg);
    }

    #[test]
    fn corrupt_values_fall_back_to_defaults() {
        let mut kv = MemoryKv::new();
        kv.set(keys::MISSED_COUNT, "lots").unwrap();
        kv.set(keys::USER_INTENT, "HIKING").unwrap();
        kv.set(keys::NEXT_CHECK_AT, "yesterday").unwrap();
        kv.set(keys::CHECK_INTERVAL_MINUTES, "0").unwrap();
        kv.set(keys::DMS_ENABLED, "true").unwrap();
        let store = StateStore::new(kv);

        let guard = store.lock();
        let runtime = guard.dms_runtime().unwrap();
        assert!(runtime.enabled);
        assert_eq!(runtime.missed_count, 0);
        assert_eq!(runtime.next_check_at, None);
        assert_eq!(guard.agent_state().unwrap().declared_intent, DeclaredIntent::Normal);
        assert_eq!(guard.dms_config().unwrap(), DmsConfig::default());
    }

    #[test]
    fn heartbeat_timestamp_roundtrip() {
        let store = StateStore::in_memory();
        let mut guard = store.lock();
        let sent = at(30) + Duration::seconds(7);
        guard.set_last_heartbeat_at(sent).unwrap();
        assert_eq!(guard.last_heartbeat_at().unwrap(), Some(sent));
        guard.clear_last_heartbeat().unwrap();
        assert_eq!(guard.last_heartbeat_at().unwrap(), None);
    }

    #[test]
    fn sqlite_store_persists_across_handles() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("state.db").to_string_lossy().to_string();

        {
            let store = StateStore::open(&path).unwrap();
            store.lock().put_dms_config(&DmsConfig::RELAXED).unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.lock().dms_config().unwrap(), DmsConfig::RELAXED);
    }

    #[test]
    fn clones_share_one_store() {
        let store = StateStore::in_memory();
        let other = store.clone();
        other.lock().put_dms_config(&DmsConfig::FREQUENT).unwrap();
        assert_eq!(store.lock().dms_config().unwrap(), DmsConfig::FREQUENT);
    }
}
