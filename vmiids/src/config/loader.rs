// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `vmiids.toml`, deserializes it into the raw mirrors and converts
//! them into the typed runtime `Config`.

use std::{fs, net::SocketAddr, path::{Path, PathBuf}, time::Duration};

use log::Level;

use crate::config::model::{
    CollectorConfig, Config, ConfigError, ConsoleEndpoint, ControlConfig, ModulesConfig,
    MonitorConfig, OptionTable, RawCollector, RawConfig, RawControl, RawModules, RawMonitor,
};
use crate::vmiids_log;

/// Load and parse the configuration at `path`.
/// Logs at DEBUG before reading and INFO on success.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    vmiids_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = parse(&txt)?;
    vmiids_log!(Level::Info, "config", "Loaded config from {:?}", path);
    Ok(cfg)
}

/// Parse configuration text; every table is optional.
pub fn parse(txt: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    Ok(Config {
        logging: raw.logging,
        monitor: convert_monitor(raw.monitor)?,
        collector: convert_collector(raw.collector)?,
        control: convert_control(raw.control)?,
        modules: convert_modules(raw.modules),
    })
}

fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s).map_err(|e| ConfigError::InvalidDuration(s.into(), e))
}

fn parse_addr(s: &str) -> Result<SocketAddr, ConfigError> {
    s.parse().map_err(|_| ConfigError::InvalidAddress(s.into()))
}

fn convert_monitor(raw: RawMonitor) -> Result<MonitorConfig, ConfigError> {
    if raw.prompt.is_empty() {
        return Err(ConfigError::Empty("monitor.prompt"));
    }
    Ok(MonitorConfig {
        enabled: raw.enabled,
        endpoint: raw.endpoint.parse::<ConsoleEndpoint>()?,
        prompt: raw.prompt,
        timeout: parse_duration(&raw.timeout)?,
        handshake: raw.handshake,
    })
}

fn convert_collector(raw: RawCollector) -> Result<CollectorConfig, ConfigError> {
    Ok(CollectorConfig {
        interval: parse_duration(&raw.interval)?,
        pause_vm: raw.pause_vm,
        report_to: raw.report_to.filter(|s| !s.is_empty()),
    })
}

fn convert_control(raw: RawControl) -> Result<ControlConfig, ConfigError> {
    Ok(ControlConfig {
        enabled: raw.enabled,
        listen: parse_addr(&raw.listen)?,
        metrics_listen: raw.metrics_listen.as_deref().map(parse_addr).transpose()?,
    })
}

/// Flatten option values to strings; modules parse what they need.
fn convert_modules(raw: RawModules) -> ModulesConfig {
    let options: OptionTable = raw
        .options
        .into_iter()
        .map(|(module, values)| {
            let values = values
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        toml::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect();
            (module, values)
        })
        .collect();

    vmiids_log!(
        Level::Debug,
        "config",
        "Modules: {} builtin, {} libraries, options for {} module(s)",
        raw.builtin.len(),
        raw.libraries.len(),
        options.len()
    );

    ModulesConfig {
        builtin: raw.builtin,
        libraries: raw.libraries.into_iter().map(PathBuf::from).collect(),
        library_dir: raw.library_dir.map(PathBuf::from),
        options,
    }
}
