//! TOML configuration for the stressgen daemon.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! valid configuration.  Command-line flags are applied on top of whatever is
//! loaded here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::heartbeat::{HEARTBEAT_DELAY_DEFAULT_MICROS, MASTER_PORT_DEFAULT};
use crate::rate::{PacketPlan, Transport, DEFAULT_DELAY_MICROS, DEFAULT_MSG_SIZE, MICROS_PER_SEC};
use crate::schedule::ScheduleSpec;
use crate::singleton::{TakeoverPolicy, LOCK_FILE_DEFAULT};

pub const PING_PORT_DEFAULT: u16 = 50888;

pub const CONFIG_ENV: &str = "STRESSGEN_CONFIG";

pub const SYSTEM_CONFIG_PATH: &str = "/etc/stressgen/stressgen.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for one stressgen process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StressConfig {
    #[serde(default)]
    pub cpu: CpuConfig,
    #[serde(default)]
    pub net: NetConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StressConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded stressgen configuration");
        Ok(config)
    }

    /// Try `$STRESSGEN_CONFIG`, then `/etc/stressgen/stressgen.toml`, then
    /// compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "STRESSGEN_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Effective phase schedule for the load workers.
    pub fn schedule(&self) -> ScheduleSpec {
        ScheduleSpec::symmetric(self.schedule.active_secs, self.schedule.sleep_secs)
    }

    /// Effective packet size and spacing for the load senders.
    pub fn packet_plan(&self) -> PacketPlan {
        let transport = if self.net.raw_frames {
            Transport::RawFrame
        } else {
            Transport::Udp
        };
        let explicit = PacketPlan::explicit(self.net.message_size, self.net.delay_micros);
        PacketPlan::derive(self.net.target_rate, transport, explicit)
    }

    /// Whether any worker would be launched.
    pub fn has_load(&self) -> bool {
        self.cpu.threads > 0 || self.heartbeat.enabled || self.net.raw_frames || !self.net.hosts.is_empty()
    }

    pub fn heartbeat_interval_micros(&self) -> u64 {
        if self.heartbeat.interval_secs == 0 {
            HEARTBEAT_DELAY_DEFAULT_MICROS
        } else {
            self.heartbeat.interval_secs.saturating_mul(MICROS_PER_SEC)
        }
    }
}

// ---------------------------------------------------------------------------
// CPU
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Number of churn threads.
    pub threads: usize,
}

// ---------------------------------------------------------------------------
// Network load
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Destinations for UDP load, one sender each.
    pub hosts: Vec<String>,
    /// Destination UDP port.
    pub port: u16,
    /// Payload bytes per packet when no target rate is set.
    pub message_size: usize,
    /// Inter-packet delay (microseconds) when no target rate is set.
    pub delay_micros: u64,
    /// Target throughput in bytes/second; `0` disables derivation.
    pub target_rate: u64,
    /// Emit raw Ethernet frames instead of UDP (Linux, root only).
    pub raw_frames: bool,
    /// Serialize every transmission across all senders.
    pub serialize_sends: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            port: PING_PORT_DEFAULT,
            message_size: DEFAULT_MSG_SIZE,
            delay_micros: DEFAULT_DELAY_MICROS,
            target_rate: 0,
            raw_frames: false,
            serialize_sends: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Monitoring host; broadcast when unset.
    pub master: Option<String>,
    pub port: u16,
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            master: None,
            port: MASTER_PORT_DEFAULT,
            interval_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub active_secs: u64,
    pub sleep_secs: u64,
    pub desync: Desync,
}

/// How CPU and network phases are offset from each other at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Desync {
    #[default]
    None,
    /// Delay network workers by a random fraction of the active phase.
    Random,
    /// Delay network workers by a full active phase and swap their phases.
    Alternate,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub lock_path: PathBuf,
    /// Stay attached to the terminal.
    pub foreground: bool,
    /// How long to wait for workers after a termination request.
    pub drain_timeout_secs: u64,
    /// Polls while waiting for a previous instance to exit.
    pub takeover_attempts: u32,
    pub takeover_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            lock_path: PathBuf::from(LOCK_FILE_DEFAULT),
            foreground: false,
            drain_timeout_secs: 5,
            takeover_attempts: 7,
            takeover_interval_ms: 1000,
        }
    }
}

impl DaemonConfig {
    pub fn takeover_policy(&self) -> TakeoverPolicy {
        TakeoverPolicy {
            attempts: self.takeover_attempts,
            interval: Duration::from_millis(self.takeover_interval_ms),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
