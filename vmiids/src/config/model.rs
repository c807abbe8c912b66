// src/config/model.rs

use serde::Deserialize;
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

use shared::constants::{DEFAULT_CONTROL_ADDR, DEFAULT_MONITOR_DEVICE, MONITOR_PROMPT};

/// Per-module string options: module name → option name → value.
pub type OptionTable = BTreeMap<String, BTreeMap<String, String>>;

/// Top-level runtime config
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub monitor: MonitorConfig,
    pub collector: CollectorConfig,
    pub control: ControlConfig,
    pub modules: ModulesConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]            pub enable: bool,
    #[serde(default)]            pub file:   Option<String>,
    #[serde(default = "default_level")] pub level: String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: default_level() }
    }
}

/// Where the QEMU monitor can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEndpoint {
    /// Character device such as `/dev/ttyS1`.
    Device(PathBuf),
    /// `unix:/path/to/monitor.sock`
    Unix(PathBuf),
    /// `tcp:host:port`
    Tcp(String),
}

impl FromStr for ConsoleEndpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidEndpoint(s.into()));
        }
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(ConsoleEndpoint::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            if !addr.contains(':') {
                return Err(ConfigError::InvalidEndpoint(s.into()));
            }
            return Ok(ConsoleEndpoint::Tcp(addr.into()));
        }
        Ok(ConsoleEndpoint::Device(PathBuf::from(s.strip_prefix("device:").unwrap_or(s))))
    }
}

/// Typed `[monitor]` section
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub enabled:   bool,
    pub endpoint:  ConsoleEndpoint,
    pub prompt:    String,
    pub timeout:   Duration,
    pub handshake: bool,
}

/// Typed `[collector]` section
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub interval: Duration,
    pub pause_vm: bool,
    /// Notification module that receives module faults.
    pub report_to: Option<String>,
}

/// Typed `[control]` section
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub enabled:        bool,
    pub listen:         SocketAddr,
    pub metrics_listen: Option<SocketAddr>,
}

/// Typed `[modules]` section
#[derive(Debug, Clone, Default)]
pub struct ModulesConfig {
    pub builtin:     Vec<String>,
    pub libraries:   Vec<PathBuf>,
    pub library_dir: Option<PathBuf>,
    pub options:     OptionTable,
}

// ───── raw TOML mirrors ─────────────────────────────────────────────────────

/// Top-level config as deserialized from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)] pub logging:   LoggingConfig,
    #[serde(default)] pub monitor:   RawMonitor,
    #[serde(default)] pub collector: RawCollector,
    #[serde(default)] pub control:   RawControl,
    #[serde(default)] pub modules:   RawModules,
}

#[derive(Debug, Deserialize)]
pub struct RawMonitor {
    #[serde(default = "yes")]               pub enabled:   bool,
    #[serde(default = "default_endpoint")]  pub endpoint:  String,
    #[serde(default = "default_prompt")]    pub prompt:    String,
    #[serde(default = "default_timeout")]   pub timeout:   String,
    #[serde(default = "yes")]               pub handshake: bool,
}

impl Default for RawMonitor {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_endpoint(),
            prompt: default_prompt(),
            timeout: default_timeout(),
            handshake: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawCollector {
    #[serde(default = "default_interval")] pub interval:  String,
    #[serde(default)]                      pub pause_vm:  bool,
    #[serde(default)]                      pub report_to: Option<String>,
}

impl Default for RawCollector {
    fn default() -> Self {
        Self { interval: default_interval(), pause_vm: false, report_to: None }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawControl {
    #[serde(default = "yes")]            pub enabled:        bool,
    #[serde(default = "default_listen")] pub listen:         String,
    #[serde(default)]                    pub metrics_listen: Option<String>,
}

impl Default for RawControl {
    fn default() -> Self {
        Self { enabled: true, listen: default_listen(), metrics_listen: None }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RawModules {
    #[serde(default)] pub builtin:     Vec<String>,
    #[serde(default)] pub libraries:   Vec<String>,
    #[serde(default)] pub library_dir: Option<String>,
    /// Values may be any TOML scalar; they reach modules as strings.
    #[serde(default)] pub options:     BTreeMap<String, BTreeMap<String, toml::Value>>,
}

fn yes() -> bool { true }
fn default_endpoint() -> String { DEFAULT_MONITOR_DEVICE.into() }
fn default_prompt() -> String { MONITOR_PROMPT.into() }
fn default_timeout() -> String { "5s".into() }
fn default_interval() -> String { "5s".into() }
fn default_listen() -> String { DEFAULT_CONTROL_ADDR.into() }

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("invalid console endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("invalid socket address '{0}'")]
    InvalidAddress(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
