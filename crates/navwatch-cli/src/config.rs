//! Runtime configuration – reads `navwatch.toml`.

use navwatch_types::EquipmentDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted runtime configuration.
///
/// Every scalar has a default so a minimal file (or none at all) still
/// yields a working daemon; equipment descriptors come from `[[equipment]]`
/// tables:
///
/// ```toml
/// liveness_timeout_ms = 30000
///
/// [[equipment]]
/// id = "dme-27l"
/// name = "DME runway 27L"
/// expected_source_ip = "10.0.40.7"
/// listen_port = 5001
/// enabled = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP port of the WebSocket fanout server.
    #[serde(default = "default_fanout_port")]
    pub fanout_port: u16,

    /// Equipment silent for longer than this is demoted to disconnected.
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// Period of the background liveness sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Per-equipment history ring capacity.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Subscriber heartbeat probe interval.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Escalate source-IP mismatches from warnings to errors.
    #[serde(default)]
    pub strict_sources: bool,

    /// Monitored equipment descriptors.
    #[serde(default)]
    pub equipment: Vec<EquipmentDescriptor>,
}

fn default_fanout_port() -> u16 {
    navwatch_fanout::DEFAULT_PORT
}
fn default_liveness_timeout_ms() -> u64 {
    navwatch_tracker::DEFAULT_LIVENESS_TIMEOUT.as_millis() as u64
}
fn default_sweep_interval_ms() -> u64 {
    5_000
}
fn default_history_capacity() -> usize {
    navwatch_tracker::DEFAULT_HISTORY_CAPACITY
}
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fanout_port: default_fanout_port(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            history_capacity: default_history_capacity(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            strict_sources: false,
            equipment: Vec::new(),
        }
    }
}

/// Return the config path: `$NAVWATCH_CONFIG` or `./navwatch.toml`.
pub fn config_path() -> PathBuf {
    std::env::var("NAVWATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("navwatch.toml"))
}

/// Load the config from the default path.  `None` when the file is absent.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
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

/// Apply `NAVWATCH_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `NAVWATCH_FANOUT_PORT` | `fanout_port` |
/// | `NAVWATCH_LIVENESS_TIMEOUT_MS` | `liveness_timeout_ms` |
/// | `NAVWATCH_HISTORY_CAPACITY` | `history_capacity` |
/// | `NAVWATCH_STRICT_SOURCES` | `strict_sources` (`1`/`true`) |
///
/// Unparseable values are ignored, keeping the file's value.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("NAVWATCH_FANOUT_PORT")
        && let Ok(port) = v.parse::<u16>() {
            cfg.fanout_port = port;
        }
    if let Ok(v) = std::env::var("NAVWATCH_LIVENESS_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>() {
            cfg.liveness_timeout_ms = ms;
        }
    if let Ok(v) = std::env::var("NAVWATCH_HISTORY_CAPACITY")
        && let Ok(capacity) = v.parse::<usize>() {
            cfg.history_capacity = capacity;
        }
    if let Ok(v) = std::env::var("NAVWATCH_STRICT_SOURCES") {
        cfg.strict_sources = v == "1" || v.eq_ignore_ascii_case("true");
    }
}

/// Save the config to a specific path, creating parent directories.
#[allow(dead_code)] // used by the admin collaborator and tests
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
