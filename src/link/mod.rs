// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra bridge

pub mod gateway;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::config::{
    InstallationConfig, MonitoredOutput, OutputId, PartitionConfig, PartitionId, ZoneConfig, ZoneId,
};
use crate::error::Result;
use crate::event::DecodedEvent;

/// Connection to the panel, owned by the [`ConnectionCoordinator`](crate::coordinator::ConnectionCoordinator).
///
/// The coordinator drives one link from two tasks at once: a keep-alive
/// task calling [`run_keep_alive`](PanelLink::run_keep_alive) and a monitor
/// task calling [`next_event`](PanelLink::next_event). Implementations must
/// serialize their own reads and writes so these two never race on the
/// underlying socket.
pub trait PanelLink: Send + Sync + 'static {
    /// Establish the connection. Called at most once per link.
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Release the connection and wake any pending operation.
    ///
    /// Idempotent, and safe to call when `connect` never succeeded.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Keep the panel from timing out an idle session.
    ///
    /// Runs until the link is closed (`Ok`) or fails (`Err`).
    fn run_keep_alive(&self) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next decoded status frame.
    ///
    /// Returns `None` once the link is closed or has failed; the sequence
    /// does not restart. Must be cancel-safe: the monitor task drops the
    /// future when shutting down.
    fn next_event(&self) -> impl Future<Output = Option<DecodedEvent>> + Send;
}

/// Everything a link needs to know about the installation it monitors.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub host: String,
    pub port: u16,
    pub zones: BTreeMap<ZoneId, ZoneConfig>,
    /// Plain and switchable outputs, see [`InstallationConfig::monitored_outputs`].
    pub outputs: Vec<(OutputId, MonitoredOutput)>,
    pub partitions: BTreeMap<PartitionId, PartitionConfig>,
    pub integration_key: String,
    pub keep_alive_interval: Duration,
}

impl LinkSettings {
    pub fn from_config(config: &InstallationConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            zones: config.zones.clone(),
            outputs: config.monitored_outputs(),
            partitions: config.partitions.clone(),
            integration_key: config.integration_key.clone(),
            keep_alive_interval: config.keep_alive_interval(),
        }
    }

    pub fn zone_ids(&self) -> Vec<ZoneId> {
        self.zones.keys().copied().collect()
    }

    pub fn output_ids(&self) -> Vec<OutputId> {
        self.outputs.iter().map(|(id, _)| *id).collect()
    }

    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }
}
