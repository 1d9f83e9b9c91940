// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra bridge

use std::sync::{PoisonError, RwLock};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, Result, SatelError};
use crate::event::{DecodedEvent, PARTITIONS_KEY};
use crate::link::{LinkSettings, PanelLink};

/// TCP link to a status gateway in front of the panel.
///
/// The gateway speaks newline-delimited JSON. After connecting, the link
/// sends one `monitor` request naming the zone, output and partition ids to
/// watch. Every line received afterwards is a status frame, a JSON object
/// such as `{"zones": {"3": 1}}`. Keep-alive is a `{"op": "ping"}` line sent
/// every keep-alive interval.
///
/// Reader and writer halves sit behind separate locks, so the monitor and
/// keep-alive tasks can use the link concurrently.
pub struct GatewayLink {
    settings: LinkSettings,
    reader: Mutex<Option<Lines<BufReader<OwnedReadHalf>>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
    partitions: RwLock<Option<Value>>,
}

impl GatewayLink {
    pub fn new(settings: LinkSettings) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            settings,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            closed,
            partitions: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Latest partition states reported by the gateway, if any arrived yet.
    pub fn partition_states(&self) -> Option<Value> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn monitor_request(&self) -> Value {
        json!({
            "op": "monitor",
            "zones": self.settings.zone_ids(),
            "outputs": self.settings.output_ids(),
            "partitions": self.settings.partition_ids(),
            "integration_key": self.settings.integration_key,
        })
    }

    /// Mark the link closed. Returns `true` if it was open before.
    fn mark_closed(&self) -> bool {
        !self.closed.send_replace(true)
    }

    async fn send_line(&self, message: &Value) -> Result<()> {
        let mut line = message.to_string();
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(SatelError::LinkClosed);
        };
        writer.write_all(line.as_bytes()).await.map_err(|e| {
            error!("Failed to write to gateway: {}", e);
            SatelError::Io(e)
        })
    }
}

impl PanelLink for GatewayLink {
    async fn connect(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SatelError::LinkClosed);
        }

        let host = &self.settings.host;
        let port = self.settings.port;
        info!("Connecting to panel gateway at {}:{}", host, port);

        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| {
                error!("TCP connect failed: {}", e);
                SatelError::ConnectionFailed {
                    host: host.clone(),
                    port,
                    reason: e.to_string(),
                }
            })?;
        debug!("TCP socket connected");

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(BufReader::new(read_half).lines());
        *self.writer.lock().await = Some(write_half);

        self.send_line(&self.monitor_request()).await?;
        info!(
            "Monitoring {} zones, {} outputs, {} partitions",
            self.settings.zones.len(),
            self.settings.outputs.len(),
            self.settings.partitions.len()
        );
        Ok(())
    }

    async fn close(&self) {
        let was_open = self.mark_closed();
        if let Some(mut writer) = self.writer.lock().await.take()
            && let Err(e) = writer.shutdown().await
        {
            debug!("Error shutting down gateway socket: {}", e);
        }
        if was_open {
            info!(
                "Gateway link to {}:{} closed",
                self.settings.host, self.settings.port
            );
        }
    }

    async fn run_keep_alive(&self) -> Result<()> {
        if self.settings.keep_alive_interval.is_zero() {
            self.mark_closed();
            return Err(ConfigError::ZeroDuration {
                option: "keep_alive_interval_ms",
            }
            .into());
        }

        let mut closed_rx = self.closed.subscribe();
        let mut ticker = interval(self.settings.keep_alive_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the panel was just spoken to.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = wait_closed(&mut closed_rx) => {
                    debug!("Keep-alive stopping, link closed");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.send_line(&json!({"op": "ping"})).await {
                self.mark_closed();
                return Err(e);
            }
        }
    }

    async fn next_event(&self) -> Option<DecodedEvent> {
        let mut closed_rx = self.closed.subscribe();
        let mut reader = self.reader.lock().await;
        let lines = reader.as_mut()?;

        loop {
            let line = tokio::select! {
                biased;
                _ = wait_closed(&mut closed_rx) => return None,
                line = lines.next_line() => line,
            };

            match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match parse_frame(&line) {
                    Ok(event) => {
                        if let Some(states) = event.get(PARTITIONS_KEY) {
                            *self.partitions.write().unwrap_or_else(PoisonError::into_inner) =
                                Some(states.clone());
                        }
                        return Some(event);
                    }
                    Err(e) => warn!("Skipping gateway line: {}", e),
                },
                Ok(None) => {
                    warn!("Gateway closed the connection");
                    self.mark_closed();
                    return None;
                }
                Err(e) => {
                    error!("Gateway read error: {}", e);
                    self.mark_closed();
                    return None;
                }
            }
        }
    }
}

/// Resolve once the link has been marked closed.
async fn wait_closed(closed_rx: &mut watch::Receiver<bool>) {
    // The sender lives in the link itself, so this only ends on close.
    let _ = closed_rx.wait_for(|closed| *closed).await;
}

/// Parse one gateway line into a status frame.
fn parse_frame(line: &str) -> Result<DecodedEvent> {
    let value: Value = serde_json::from_str(line).map_err(|e| SatelError::InvalidFrame {
        details: e.to_string(),
    })?;
    DecodedEvent::try_from(value).map_err(|other| SatelError::InvalidFrame {
        details: format!("expected a JSON object, got {other}"),
    })
}
