// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra bridge

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Duration;
use tracing::{error, info, warn};

use satel_bridge::{
    Channel, ConnectionCoordinator, EventDispatcher, GatewayLink, Halt, InstallationConfig,
    RawInstallationConfig, Signal, SubscriberError,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "satel-bridge")]
#[command(about = "Bridge between a Satel Integra alarm panel and home-automation subscribers")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    panel: RawInstallationConfig,
    #[serde(default)]
    mqtt: Option<MqttToml>,
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
}

fn default_client_id() -> String {
    "satel-bridge".to_string()
}
fn default_publish_topic() -> String {
    "satel".to_string()
}

// Published messages, all share the {now, op, ...} flat structure

#[derive(Serialize)]
struct MqttPanelStatus {
    now: u64,
    op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    partitions: Option<Value>,
}

#[derive(Serialize)]
struct MqttZonesUpdated<'a> {
    now: u64,
    op: &'static str,
    zones: &'a Value,
}

#[derive(Serialize)]
struct MqttOutputsUpdated<'a> {
    now: u64,
    op: &'static str,
    outputs: &'a Value,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

fn load_config(path: &str) -> Result<(InstallationConfig, Option<MqttToml>)> {
    let config_text = std::fs::read_to_string(path).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;
    let installation = config
        .panel
        .validate()
        .context("Invalid [panel] configuration")?;
    Ok((installation, config.mqtt))
}

/// Names of every zone and output, keyed by id.
fn device_names(config: &InstallationConfig) -> (HashMap<u32, String>, HashMap<u32, String>) {
    let zones = config
        .zones
        .iter()
        .map(|(id, zone)| (*id, zone.name.clone()))
        .collect();
    let outputs = config
        .monitored_outputs()
        .into_iter()
        .map(|(id, output)| (id, output.name().to_string()))
        .collect();
    (zones, outputs)
}

/// Render an `{id: state}` payload as `id (name)=state` pairs.
fn describe_changes(payload: &Value, names: &HashMap<u32, String>) -> String {
    let Some(changes) = payload.as_object() else {
        return payload.to_string();
    };
    changes
        .iter()
        .map(|(id, state)| {
            let name = id.parse::<u32>().ok().and_then(|id| names.get(&id));
            match name {
                Some(name) => format!("{id} ({name})={state}"),
                None => format!("{id}={state}"),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

fn register_logging(dispatcher: &EventDispatcher, config: &InstallationConfig) {
    let (zone_names, output_names) = device_names(config);

    dispatcher.subscribe(Channel::PanelStatus, |_| {
        info!("Panel status changed");
        Ok(())
    });
    dispatcher.subscribe(Channel::ZonesUpdated, move |signal| {
        if let Some(payload) = signal.payload() {
            info!("Zones updated: {}", describe_changes(payload, &zone_names));
        }
        Ok(())
    });
    dispatcher.subscribe(Channel::OutputsUpdated, move |signal| {
        if let Some(payload) = signal.payload() {
            info!("Outputs updated: {}", describe_changes(payload, &output_names));
        }
        Ok(())
    });
}

fn publish_json(
    client: &AsyncClient,
    topic: &str,
    message: &impl Serialize,
) -> Result<(), SubscriberError> {
    let json = serde_json::to_string(message)?;
    client.try_publish(topic, QoS::AtLeastOnce, false, json)?;
    Ok(())
}

/// Mirror every signal to MQTT. Panel-status messages carry the partition
/// states the link last reported.
fn register_mqtt(
    dispatcher: &EventDispatcher,
    client: &AsyncClient,
    topic: &str,
    link: Option<Arc<GatewayLink>>,
) {
    for channel in Channel::ALL {
        let client = client.clone();
        let topic = topic.to_string();
        let link = link.clone();
        dispatcher.subscribe(channel, move |signal| match signal {
            Signal::PanelStatus => {
                let message = MqttPanelStatus {
                    now: now_epoch_ms(),
                    op: "PANEL_STATUS",
                    partitions: link.as_ref().and_then(|l| l.partition_states()),
                };
                publish_json(&client, &topic, &message)
            }
            Signal::ZonesUpdated(zones) => {
                let message = MqttZonesUpdated {
                    now: now_epoch_ms(),
                    op: "ZONES_UPDATED",
                    zones,
                };
                publish_json(&client, &topic, &message)
            }
            Signal::OutputsUpdated(outputs) => {
                let message = MqttOutputsUpdated {
                    now: now_epoch_ms(),
                    op: "OUTPUTS_UPDATED",
                    outputs,
                };
                publish_json(&client, &topic, &message)
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=satel_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();
    let (config, mqtt) = load_config(&cli.config)?;

    let mut sigterm = signal(SignalKind::terminate())?;

    // Connect to panel; any failure aborts startup
    let dispatcher = Arc::new(EventDispatcher::new());
    let coordinator = ConnectionCoordinator::<GatewayLink>::new(Arc::clone(&dispatcher));
    coordinator
        .start(&config, GatewayLink::new)
        .await
        .with_context(|| format!("Failed to connect to panel at {}:{}", config.host, config.port))?;

    register_logging(&dispatcher, &config);

    // Optional MQTT mirror
    let mqtt_handle = match mqtt {
        Some(mqtt) => {
            let (host, port) = parse_mqtt_url(&mqtt.url)?;
            let mut mqtt_opts = MqttOptions::new(&mqtt.client_id, &host, port);
            mqtt_opts.set_keep_alive(Duration::from_secs(30));
            let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

            register_mqtt(&dispatcher, &client, &mqtt.publish_topic, coordinator.link());
            info!("MQTT: publishing to {} on {host}:{port}", mqtt.publish_topic);

            Some(tokio::spawn(async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => info!("MQTT: connected"),
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT event loop error: {e}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }))
        }
        None => None,
    };

    // Wait for a signal or for the panel link to go away
    info!("Satel bridge running. Send SIGINT/SIGTERM to stop.");
    let halt = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
            None
        }
        reason = coordinator.wait_for_halt() => {
            warn!("Panel monitoring halted: {reason:?}");
            Some(reason)
        }
    };

    coordinator.stop().await;
    dispatcher.shutdown().await;
    if let Some(handle) = mqtt_handle {
        handle.abort();
    }

    if halt == Some(Halt::LinkLost) {
        bail!("Panel link lost");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
