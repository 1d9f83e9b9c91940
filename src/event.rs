// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra bridge

use std::fmt;

use serde_json::{Map, Value};

/// Key of a decoded frame carrying partition (panel-level) state.
pub const PARTITIONS_KEY: &str = "partitions";
/// Key of a decoded frame carrying changed zone states.
pub const ZONES_KEY: &str = "zones";
/// Key of a decoded frame carrying changed output states.
pub const OUTPUTS_KEY: &str = "outputs";

/// Named publish/subscribe topic of the [`EventDispatcher`](crate::dispatcher::EventDispatcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Panel-level state changed; subscribers re-read authoritative state.
    PanelStatus,
    /// A subset of zones changed.
    ZonesUpdated,
    /// A subset of outputs changed.
    OutputsUpdated,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Self::PanelStatus, Self::ZonesUpdated, Self::OutputsUpdated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PanelStatus => "panel-status",
            Self::ZonesUpdated => "zones-updated",
            Self::OutputsUpdated => "outputs-updated",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification delivered to subscribers.
///
/// The zone and output payloads are passed through exactly as the panel
/// link decoded them: a mapping of id to state.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    PanelStatus,
    ZonesUpdated(Value),
    OutputsUpdated(Value),
}

impl Signal {
    pub fn channel(&self) -> Channel {
        match self {
            Self::PanelStatus => Channel::PanelStatus,
            Self::ZonesUpdated(_) => Channel::ZonesUpdated,
            Self::OutputsUpdated(_) => Channel::OutputsUpdated,
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::PanelStatus => None,
            Self::ZonesUpdated(v) | Self::OutputsUpdated(v) => Some(v),
        }
    }
}

/// One status frame decoded by a [`PanelLink`](crate::link::PanelLink).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedEvent {
    fields: Map<String, Value>,
}

impl DecodedEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Turn the frame into the signal it announces, if any.
    ///
    /// Classification looks only at which key is present: `partitions`,
    /// then `zones`, then `outputs`. The first match wins. A frame with
    /// none of them yields `None`.
    pub fn classify(mut self) -> Option<Signal> {
        if self.fields.contains_key(PARTITIONS_KEY) {
            Some(Signal::PanelStatus)
        } else if let Some(zones) = self.fields.remove(ZONES_KEY) {
            Some(Signal::ZonesUpdated(zones))
        } else {
            self.fields.remove(OUTPUTS_KEY).map(Signal::OutputsUpdated)
        }
    }
}

impl From<Map<String, Value>> for DecodedEvent {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

impl TryFrom<Value> for DecodedEvent {
    type Error = Value;

    /// Only JSON objects are frames; anything else is handed back.
    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self::new(fields)),
            other => Err(other),
        }
    }
}
