// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra bridge
//
//! # satel-bridge
//!
//! Core of a bridge between a Satel Integra alarm panel and
//! home-automation subscribers.
//!
//! The crate validates the installation configuration, keeps one supervised
//! connection to the panel alive, and fans decoded status changes out to
//! subscribers on three named channels: `panel-status`, `zones-updated` and
//! `outputs-updated`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use satel_bridge::{Channel, ConnectionCoordinator, EventDispatcher, GatewayLink, InstallationConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = InstallationConfig::from_toml_str(
//!         r#"
//!         host = "192.168.1.20"
//!         port = 7094
//!         [zones.3]
//!         name = "Front door"
//!         "#,
//!     )?;
//!
//!     let dispatcher = Arc::new(EventDispatcher::new());
//!     dispatcher.subscribe(Channel::ZonesUpdated, |signal| {
//!         println!("zones: {:?}", signal.payload());
//!         Ok(())
//!     });
//!
//!     let coordinator = ConnectionCoordinator::new(dispatcher.clone());
//!     coordinator.start(&config, GatewayLink::new).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     coordinator.stop().await;
//!     dispatcher.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod link;

// Re-exports for convenience
pub use config::{
    ArmHomeMode, EditableOutputConfig, InstallationConfig, MonitoredOutput, OutputId,
    PartitionConfig, PartitionId, RawInstallationConfig, SensorId, TempSensorConfig, ZoneConfig,
    ZoneId,
};
pub use coordinator::{ConnectionCoordinator, CoordinatorState, Halt};
pub use dispatcher::{Callback, EventDispatcher};
pub use error::{ConfigError, Result, SatelError, SubscriberError};
pub use event::{Channel, DecodedEvent, Signal};
pub use link::gateway::GatewayLink;
pub use link::{LinkSettings, PanelLink};
