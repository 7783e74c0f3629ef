//! Configuration Vault – reads/writes `~/.lifeline/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

use lifeline_types::{
    DEFAULT_BATTERY_CAPACITY_MAH, DEFAULT_CHECK_INTERVAL_MINUTES, DEFAULT_TIMEOUT_SECONDS,
    DeclaredIntent, DmsConfig, LifelineError,
};

/// A string wiped from memory on drop.  `Debug` never prints it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_empty() { "<not set>" } else { "<redacted>" })
    }
}

/// Persisted user configuration stored in `~/.lifeline/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Phone number (or any digit-bearing handle) of the trusted contact.
    #[serde(default)]
    pub trusted_contact: String,

    /// Phrase that activates panic mode when sent by the trusted contact.
    #[serde(default, skip_serializing_if = "Secret::is_empty")]
    pub trigger_phrase: Secret,

    #[serde(default)]
    pub declared_intent: DeclaredIntent,

    /// Used for the estimated-power line of each heartbeat.
    #[serde(default = "default_battery_capacity")]
    pub battery_capacity_mah: u32,

    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u32,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,

    /// SQLite file holding agent state and the event log.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Outbound messages are POSTed here; printed to the console when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub webhook_url: String,

    /// Without this, alarms fire in coarse windows.
    #[serde(default = "default_exact_alarms")]
    pub exact_alarms: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("trusted_contact", &self.trusted_contact)
            .field("trigger_phrase", &self.trigger_phrase)
            .field("declared_intent", &self.declared_intent)
            .field("battery_capacity_mah", &self.battery_capacity_mah)
            .field("check_interval_minutes", &self.check_interval_minutes)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("database_path", &self.database_path)
            .field("webhook_url", &self.webhook_url)
            .field("exact_alarms", &self.exact_alarms)
            .finish()
    }
}

fn default_battery_capacity() -> u32 {
    DEFAULT_BATTERY_CAPACITY_MAH
}
fn default_check_interval() -> u32 {
    DEFAULT_CHECK_INTERVAL_MINUTES
}
fn default_timeout() -> u32 {
    DEFAULT_TIMEOUT_SECONDS
}
fn default_database_path() -> String {
    config_dir_for_home(&home_dir())
        .join("lifeline.db")
        .to_string_lossy()
        .into_owned()
}
fn default_exact_alarms() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trusted_contact: String::new(),
            trigger_phrase: Secret::default(),
            declared_intent: DeclaredIntent::default(),
            battery_capacity_mah: default_battery_capacity(),
            check_interval_minutes: default_check_interval(),
            timeout_seconds: default_timeout(),
            database_path: default_database_path(),
            webhook_url: String::new(),
            exact_alarms: default_exact_alarms(),
        }
    }
}

impl Config {
    /// The stored cadence, validated.
    pub fn dms_config(&self) -> Result<DmsConfig, LifelineError> {
        DmsConfig::new(self.check_interval_minutes, self.timeout_seconds)
    }

    pub fn is_configured(&self) -> bool {
        !self.trusted_contact.trim().is_empty() && !self.trigger_phrase.is_empty()
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn config_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".lifeline")
}

/// Return the path to `~/.lifeline/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    config_dir_for_home(home).join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `LIFELINE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LIFELINE_CONTACT` | `trusted_contact` |
/// | `LIFELINE_TRIGGER` | `trigger_phrase` |
/// | `LIFELINE_INTENT` | `declared_intent` |
/// | `LIFELINE_CHECK_INTERVAL` | `check_interval_minutes` |
/// | `LIFELINE_TIMEOUT` | `timeout_seconds` |
/// | `LIFELINE_DB` | `database_path` |
/// | `LIFELINE_WEBHOOK_URL` | `webhook_url` |
/// | `LIFELINE_EXACT_ALARMS` | `exact_alarms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("LIFELINE_CONTACT") {
        cfg.trusted_contact = v;
    }
    if let Ok(v) = std::env::var("LIFELINE_TRIGGER") {
        cfg.trigger_phrase = Secret::from(v);
    }
    if let Ok(v) = std::env::var("LIFELINE_INTENT")
        && let Ok(intent) = v.parse::<DeclaredIntent>() {
            cfg.declared_intent = intent;
        }
    if let Ok(v) = std::env::var("LIFELINE_CHECK_INTERVAL")
        && let Ok(minutes) = v.trim().parse::<u32>() {
            cfg.check_interval_minutes = minutes;
        }
    if let Ok(v) = std::env::var("LIFELINE_TIMEOUT")
        && let Ok(seconds) = v.trim().parse::<u32>() {
            cfg.timeout_seconds = seconds;
        }
    if let Ok(v) = std::env::var("LIFELINE_DB") {
        cfg.database_path = v;
    }
    if let Ok(v) = std::env::var("LIFELINE_WEBHOOK_URL") {
        cfg.webhook_url = v;
    }
    if let Ok(v) = std::env::var("LIFELINE_EXACT_ALARMS")
        && let Ok(flag) = v.trim().parse::<bool>() {
            cfg.exact_alarms = flag;
        }
}

/// Save the config to disk, creating `~/.lifeline/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let mut raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    let written = write_private(path, &raw);
    raw.zeroize();
    written.map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

/// Write with owner-only read/write (rw-------) on Unix.
#[cfg(unix)]
fn write_private(path: &Path, raw: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .and_then(|mut f| f.write_all(raw.as_bytes()))
}

#[cfg(not(unix))]
fn write_private(path: &Path, raw: &str) -> std::io::Result<()> {
    fs::write(path, raw)
}
