// src/config.rs

//! Configuration for both halves of the bridge.
//!
//! The structs deserialize from a JSON file named by the
//! `WINDOW_BRIDGE_CONFIG` environment variable. Every struct carries
//! `#[serde(default)]`, so a file only needs the keys it wants to override.
//! The same `Config` is read by the control process and by every device
//! process it spawns.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "WINDOW_BRIDGE_CONFIG";

// --- Top-Level Configuration Structure ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Channel transport and deferred queue settings.
    pub channel: ChannelConfig,
    /// Device process supervision.
    pub lifecycle: LifecycleConfig,
    /// Native display backend used by the device process.
    pub device: DeviceConfig,
}

impl Config {
    /// Loads the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Loads from `WINDOW_BRIDGE_CONFIG` if set, otherwise returns defaults.
    pub fn load_from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => {
                let path = PathBuf::from(path);
                info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            None => {
                info!("{} not set, using default configuration", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }
}

// --- Channel Configuration ---

/// What the deferred queue does when a configured limit is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest deferred message to make room.
    #[default]
    DropOldest,
    /// Refuse the new message and report `QueueFull` to the sender.
    RejectNew,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum number of deferred messages. `None` means unbounded.
    pub deferred_limit: Option<usize>,
    /// Policy applied once `deferred_limit` is reached.
    pub overflow: OverflowPolicy,
}

// --- Lifecycle Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Respawn the device process after it exits or crashes.
    pub respawn: bool,
    /// Upper bound on consecutive respawns. `None` means no limit.
    pub max_respawns: Option<u32>,
    /// Routing id used for the first connection epoch; later epochs count up.
    pub first_routing_id: u64,
    /// Re-issue `CreateWidget` for every open window after a channel reset.
    pub replay_on_reset: bool,
    /// How long a launched device may take to complete the handshake.
    pub handshake_timeout_ms: u64,
    /// Executable to run as the device process. Defaults to the current one.
    pub device_program: Option<PathBuf>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            respawn: true,
            max_respawns: Some(5),
            first_routing_id: 1,
            replay_on_reset: false,
            handshake_timeout_ms: 5000,
            device_program: None,
        }
    }
}

// --- Device Configuration ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process display with one synthetic output; events are injected.
    #[default]
    Headless,
    /// A Wayland compositor reached through `WAYLAND_DISPLAY`.
    Wayland,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub backend: BackendKind,
    /// Geometry advertised by the headless backend's only output.
    pub headless_output: OutputSize,
    /// Number of input seats advertised by the headless backend.
    pub headless_seats: u32,
    /// Directory for the per-epoch Unix sockets.
    pub socket_dir: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            backend: BackendKind::Headless,
            headless_output: OutputSize {
                width: 1920,
                height: 1080,
            },
            headless_seats: 1,
            socket_dir: None,
        }
    }
}

impl DeviceConfig {
    /// Resolves the socket directory: configured value, then
    /// `$XDG_RUNTIME_DIR`, then the system temp dir.
    pub fn resolved_socket_dir(&self) -> PathBuf {
        if let Some(dir) = &self.socket_dir {
            return dir.clone();
        }
        std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}
