//! Configuration Vault – reads/writes `~/.aimotion/config.toml`.

use aimotion_hal::memory::{MemoryPartition, PartitionTable};
use aimotion_server::{FlightSlots, SessionSettings};
use aimotion_types::{AimError, SlotId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Memory range reserved for one trajectory slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub slot: SlotId,
    pub start_address: u32,
    pub max_size: usize,
}

/// Persisted configuration stored in `~/.aimotion/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port of the command protocol.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// Identifier of the drone the protocol drives.
    #[serde(default = "default_drone_id")]
    pub drone_id: String,

    /// Radio port the pose relay broadcasts on (6 = localization).
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u8,

    #[serde(default = "default_broadcast_channel")]
    pub broadcast_channel: u8,

    /// Seconds to wait for the next chunk of an unfinished payload.
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,

    /// Seconds a connected client may stay silent before it is dropped.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Slot holding the hover fallback trajectory.
    #[serde(default = "default_hover_slot")]
    pub hover_slot: SlotId,

    /// The two slots new trajectories alternate between.
    #[serde(default = "default_working_slots")]
    pub working_slots: [SlotId; 2],

    #[serde(default = "default_partitions")]
    pub partitions: Vec<PartitionConfig>,
}

fn default_tcp_port() -> u16 {
    aimotion_server::DEFAULT_PORT
}
fn default_drone_id() -> String {
    "04".to_string()
}
fn default_broadcast_port() -> u8 {
    aimotion_middleware::pose_relay::DEFAULT_PORT
}
fn default_broadcast_channel() -> u8 {
    aimotion_middleware::pose_relay::DEFAULT_CHANNEL
}
fn default_receive_timeout_secs() -> u64 {
    30
}
fn default_idle_timeout_secs() -> u64 {
    aimotion_server::session::DEFAULT_IDLE_TIMEOUT.as_secs()
}
fn default_max_payload_bytes() -> usize {
    aimotion_server::transmission::DEFAULT_MAX_PAYLOAD_BYTES
}
fn default_hover_slot() -> SlotId {
    1
}
fn default_working_slots() -> [SlotId; 2] {
    [2, 3]
}
fn default_partitions() -> Vec<PartitionConfig> {
    vec![
        PartitionConfig { slot: 1, start_address: 0, max_size: 280 },
        PartitionConfig { slot: 2, start_address: 280, max_size: 1900 },
        PartitionConfig { slot: 3, start_address: 2180, max_size: 1900 },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_port: default_tcp_port(),
            drone_id: default_drone_id(),
            broadcast_port: default_broadcast_port(),
            broadcast_channel: default_broadcast_channel(),
            receive_timeout_secs: default_receive_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_payload_bytes: default_max_payload_bytes(),
            hover_slot: default_hover_slot(),
            working_slots: default_working_slots(),
            partitions: default_partitions(),
        }
    }
}

impl Config {
    /// Build the partition table, checking it against a memory of
    /// `memory_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AimError::Config`] for duplicate, overlapping, or
    /// out-of-memory partitions, or when a used slot has no partition.
    pub fn partition_table(&self, memory_size: usize) -> Result<PartitionTable, AimError> {
        let table = PartitionTable::new(self.partitions.iter().map(|p| MemoryPartition {
            slot: p.slot,
            start_address: p.start_address,
            max_size: p.max_size,
        }))?;
        table.check_fits(memory_size)?;

        let used = [self.hover_slot, self.working_slots[0], self.working_slots[1]];
        if let Some(slot) = used.into_iter().find(|&slot| table.get(slot).is_none()) {
            return Err(AimError::Config(format!("slot {slot} has no memory partition")));
        }
        Ok(table)
    }

    /// # Errors
    ///
    /// See [`FlightSlots::new`].
    pub fn flight_slots(&self) -> Result<FlightSlots, AimError> {
        FlightSlots::new(
            self.hover_slot,
            (self.working_slots[0], self.working_slots[1]),
        )
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            drone_id: self.drone_id.clone(),
            receive_timeout: Duration::from_secs(self.receive_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}

/// Return the path to `~/.aimotion/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".aimotion").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
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
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `AIMOTION_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `AIMOTION_TCP_PORT` | `tcp_port` |
/// | `AIMOTION_DRONE_ID` | `drone_id` |
/// | `AIMOTION_BROADCAST_PORT` | `broadcast_port` |
/// | `AIMOTION_BROADCAST_CHANNEL` | `broadcast_channel` |
/// | `AIMOTION_RECEIVE_TIMEOUT_SECS` | `receive_timeout_secs` |
/// | `AIMOTION_IDLE_TIMEOUT_SECS` | `idle_timeout_secs` |
/// | `AIMOTION_MAX_PAYLOAD_BYTES` | `max_payload_bytes` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("AIMOTION_TCP_PORT")
        && let Ok(port) = v.parse::<u16>() {
            cfg.tcp_port = port;
        }
    if let Ok(v) = std::env::var("AIMOTION_DRONE_ID") {
        cfg.drone_id = v;
    }
    if let Ok(v) = std::env::var("AIMOTION_BROADCAST_PORT")
        && let Ok(port) = v.parse::<u8>() {
            cfg.broadcast_port = port;
        }
    if let Ok(v) = std::env::var("AIMOTION_BROADCAST_CHANNEL")
        && let Ok(channel) = v.parse::<u8>() {
            cfg.broadcast_channel = channel;
        }
    if let Ok(v) = std::env::var("AIMOTION_RECEIVE_TIMEOUT_SECS")
        && let Ok(secs) = v.parse::<u64>() {
            cfg.receive_timeout_secs = secs;
        }
    if let Ok(v) = std::env::var("AIMOTION_IDLE_TIMEOUT_SECS")
        && let Ok(secs) = v.parse::<u64>() {
            cfg.idle_timeout_secs = secs;
        }
    if let Ok(v) = std::env::var("AIMOTION_MAX_PAYLOAD_BYTES")
        && let Ok(bytes) = v.parse::<usize>() {
            cfg.max_payload_bytes = bytes;
        }
}

/// Save the config to disk, creating `~/.aimotion/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.hover_slot, 1);
        assert_eq!(loaded.working_slots, [2, 3]);
        assert_eq!(loaded.partitions, default_partitions());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "broadcast_port = 9\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.broadcast_port, 9);
        assert_eq!(loaded.max_payload_bytes, 8 * 1024 * 1024);
        assert_eq!(loaded.hover_slot, 1);
        assert_eq!(loaded.partitions.len(), 3);
    }

    #[test]
    fn custom_partitions_are_parsed() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
working_slots = [4, 5]
hover_slot = 1

[[partitions]]
slot = 1
start_address = 0
max_size = 200

[[partitions]]
slot = 4
start_address = 200
max_size = 1000

[[partitions]]
slot = 5
start_address = 1200
max_size = 1000
"#,
        )
        .expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        let table = loaded.partition_table(4096).expect("valid table");
        assert_eq!(table.get(5).map(|p| p.start_address), Some(1200));
        let flight = loaded.flight_slots().expect("valid slots");
        assert_eq!(flight.slots.next(), 5);
    }

    #[test]
    fn partition_table_requires_used_slots() {
        let cfg = Config {
            working_slots: [2, 9],
            ..Config::default()
        };
        let err = cfg.partition_table(4096).unwrap_err();
        assert!(err.to_string().contains("slot 9"));
    }

    #[test]
    fn partition_table_rejects_overflowing_memory() {
        let cfg = Config::default();
        assert!(matches!(cfg.partition_table(1024), Err(AimError::Config(_))));
        assert!(cfg.partition_table(4096).is_ok());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tcp_port = \"not a number\"").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn session_settings_follow_config() {
        let cfg = Config {
            receive_timeout_secs: 5,
            idle_timeout_secs: 60,
            max_payload_bytes: 1024,
            ..Config::default()
        };
        let settings = cfg.session_settings();
        assert_eq!(settings.receive_timeout, Duration::from_secs(5));
        assert_eq!(settings.idle_timeout, Duration::from_secs(60));
        assert_eq!(settings.max_payload_bytes, 1024);
        assert_eq!(settings.drone_id, "04");
    }

    #[test]
    fn config_path_points_to_aimotion_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".aimotion"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let result = load_from(&path).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn apply_env_overrides_changes_tcp_port() {
        // SAFETY: each test touches its own variable.
        unsafe { std::env::set_var("AIMOTION_TCP_PORT", "7002") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.tcp_port, 7002);
        unsafe { std::env::remove_var("AIMOTION_TCP_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_drone_id() {
        // SAFETY: each test touches its own variable.
        unsafe { std::env::set_var("AIMOTION_DRONE_ID", "11") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.drone_id, "11");
        unsafe { std::env::remove_var("AIMOTION_DRONE_ID") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_channel() {
        // SAFETY: each test touches its own variable.
        unsafe { std::env::set_var("AIMOTION_BROADCAST_CHANNEL", "300") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.broadcast_channel, 1);
        unsafe { std::env::remove_var("AIMOTION_BROADCAST_CHANNEL") };
    }

    #[test]
    fn apply_env_overrides_changes_receive_timeout() {
        // SAFETY: each test touches its own variable.
        unsafe { std::env::set_var("AIMOTION_RECEIVE_TIMEOUT_SECS", "3") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.receive_timeout_secs, 3);
        unsafe { std::env::remove_var("AIMOTION_RECEIVE_TIMEOUT_SECS") };
    }

    #[test]
    fn apply_env_overrides_changes_idle_timeout() {
        // SAFETY: each test touches its own variable.
        unsafe { std::env::set_var("AIMOTION_IDLE_TIMEOUT_SECS", "45") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.idle_timeout_secs, 45);
        unsafe { std::env::remove_var("AIMOTION_IDLE_TIMEOUT_SECS") };
    }
}
