// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra bridge

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub type PartitionId = u32;
pub type ZoneId = u32;
pub type OutputId = u32;
pub type SensorId = u32;

/// Default TCP port of the panel's integration module.
pub const DEFAULT_PORT: u16 = 7094;
/// Zone type used when a zone or output omits `type`.
pub const DEFAULT_ZONE_TYPE: &str = "motion";

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 10_000;

/// Arming mode the panel uses when a partition is armed "home".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArmHomeMode {
    #[default]
    Mode1,
    Mode2,
    Mode3,
}

impl ArmHomeMode {
    pub fn from_value(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::Mode1),
            2 => Some(Self::Mode2),
            3 => Some(Self::Mode3),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Mode1 => 1,
            Self::Mode2 => 2,
            Self::Mode3 => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConfig {
    pub name: String,
    pub arm_home_mode: ArmHomeMode,
}

/// A monitored zone or output line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_zone_type")]
    pub zone_type: String,
}

/// An output the user may switch on and off.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditableOutputConfig {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TempSensorConfig {
    pub name: String,
}

/// An entry of [`InstallationConfig::monitored_outputs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitoredOutput {
    Plain(ZoneConfig),
    Switchable(EditableOutputConfig),
}

impl MonitoredOutput {
    pub fn name(&self) -> &str {
        match self {
            Self::Plain(z) => &z.name,
            Self::Switchable(o) => &o.name,
        }
    }

    pub fn is_switchable(&self) -> bool {
        matches!(self, Self::Switchable(_))
    }
}

/// Validated description of one alarm installation.
///
/// Built only through [`RawInstallationConfig::validate`] (or the
/// [`InstallationConfig::from_toml_str`] shortcut) and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationConfig {
    pub host: String,
    pub port: u16,
    pub device_code: Option<String>,
    pub partitions: BTreeMap<PartitionId, PartitionConfig>,
    pub zones: BTreeMap<ZoneId, ZoneConfig>,
    pub outputs: BTreeMap<OutputId, ZoneConfig>,
    pub switchable_outputs: BTreeMap<OutputId, EditableOutputConfig>,
    pub temperature_sensors: BTreeMap<SensorId, TempSensorConfig>,
    pub integration_key: String,
    pub connect_timeout_ms: u64,
    pub keep_alive_interval_ms: u64,
}

impl InstallationConfig {
    /// Parse and validate a TOML document holding the installation keys at its root.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawInstallationConfig = toml::from_str(text)?;
        raw.validate()
    }

    /// Outputs followed by switchable outputs, keyed by output id.
    ///
    /// Each group is ordered by id, not by its position in the file. An id
    /// present in both keeps the position of its plain entry but takes the
    /// switchable entry's value.
    pub fn monitored_outputs(&self) -> Vec<(OutputId, MonitoredOutput)> {
        let mut merged: Vec<(OutputId, MonitoredOutput)> = self
            .outputs
            .iter()
            .map(|(id, z)| (*id, MonitoredOutput::Plain(z.clone())))
            .collect();

        for (id, o) in &self.switchable_outputs {
            let entry = MonitoredOutput::Switchable(o.clone());
            match merged.iter_mut().find(|(existing, _)| existing == id) {
                Some(slot) => slot.1 = entry,
                None => merged.push((*id, entry)),
            }
        }
        merged
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }
}

/// Installation options exactly as read from the configuration file.
///
/// Only syntax is checked at deserialization time; every semantic
/// constraint is enforced by [`RawInstallationConfig::validate`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawInstallationConfig {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<i64>,
    #[serde(default, alias = "code")]
    device_code: Option<String>,
    #[serde(default)]
    partitions: BTreeMap<String, RawPartition>,
    #[serde(default)]
    zones: BTreeMap<String, ZoneConfig>,
    #[serde(default)]
    outputs: BTreeMap<String, ZoneConfig>,
    #[serde(default)]
    switchable_outputs: BTreeMap<String, EditableOutputConfig>,
    #[serde(default)]
    temperature_sensors: BTreeMap<String, TempSensorConfig>,
    #[serde(default)]
    integration_key: String,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_ms: u64,
    #[serde(default = "default_keep_alive_interval")]
    keep_alive_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPartition {
    name: String,
    #[serde(default)]
    arm_home_mode: Option<i64>,
}

fn default_zone_type() -> String {
    DEFAULT_ZONE_TYPE.to_string()
}
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}
fn default_keep_alive_interval() -> u64 {
    DEFAULT_KEEP_ALIVE_INTERVAL_MS
}

impl RawInstallationConfig {
    /// Check every constraint and produce the immutable installation config.
    ///
    /// Per-field checks run first, in declaration order (host, port, ids,
    /// arm modes, timings); the device code requirement is checked last.
    pub fn validate(self) -> Result<InstallationConfig, ConfigError> {
        let host = match self.host {
            Some(h) if !h.trim().is_empty() => h,
            _ => return Err(ConfigError::MissingHost),
        };

        let port = match self.port {
            None => DEFAULT_PORT,
            Some(p) => u16::try_from(p)
                .ok()
                .filter(|p| *p != 0)
                .ok_or(ConfigError::InvalidPort { port: p })?,
        };

        let raw_partitions = coerce_ids("partitions", self.partitions)?;
        let zones = coerce_ids("zones", self.zones)?;
        let outputs = coerce_ids("outputs", self.outputs)?;
        let switchable_outputs = coerce_ids("switchable_outputs", self.switchable_outputs)?;
        let temperature_sensors = coerce_ids("temperature_sensors", self.temperature_sensors)?;

        let mut partitions = BTreeMap::new();
        for (id, p) in raw_partitions {
            let arm_home_mode = match p.arm_home_mode {
                None => ArmHomeMode::default(),
                Some(mode) => ArmHomeMode::from_value(mode)
                    .ok_or(ConfigError::InvalidArmHomeMode { partition: id, mode })?,
            };
            partitions.insert(id, PartitionConfig { name: p.name, arm_home_mode });
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration { option: "connect_timeout_ms" });
        }
        if self.keep_alive_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration { option: "keep_alive_interval_ms" });
        }

        if !switchable_outputs.is_empty() && self.device_code.is_none() {
            return Err(ConfigError::MissingDeviceCode);
        }

        Ok(InstallationConfig {
            host,
            port,
            device_code: self.device_code,
            partitions,
            zones,
            outputs,
            switchable_outputs,
            temperature_sensors,
            integration_key: self.integration_key,
            connect_timeout_ms: self.connect_timeout_ms,
            keep_alive_interval_ms: self.keep_alive_interval_ms,
        })
    }
}

/// Convert string map keys (TOML table keys) into integer ids.
fn coerce_ids<T>(
    section: &'static str,
    raw: BTreeMap<String, T>,
) -> Result<BTreeMap<u32, T>, ConfigError> {
    raw.into_iter()
        .map(|(k, v)| {
            k.trim()
                .parse::<u32>()
                .map(|id| (id, v))
                .map_err(|_| ConfigError::InvalidId { section, key: k })
        })
        .collect()
}
