// MIT License - Copyright (c) 2026 Peter Wright
// Satel Integra bridge

/// Configuration constraint violations found while validating an installation.
///
/// Each variant names the constraint that failed so the operator can fix the
/// configuration file without guessing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration syntax: {0}")]
    Syntax(#[from] toml::de::Error),

    #[error("missing required option `host`")]
    MissingHost,

    #[error("port {port} is outside the valid TCP range 1-65535")]
    InvalidPort { port: i64 },

    #[error("{section} key `{key}` is not an integer id")]
    InvalidId { section: &'static str, key: String },

    #[error("partition {partition}: arm_home_mode {mode} is not one of 1, 2, 3")]
    InvalidArmHomeMode { partition: u32, mode: i64 },

    #[error("`{option}` must be greater than zero")]
    ZeroDuration { option: &'static str },

    #[error("`device_code` is required when switchable_outputs are configured")]
    MissingDeviceCode,
}

/// All errors that can occur in the satel-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum SatelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection to {host}:{port} timed out after {timeout_ms}ms")]
    ConnectionTimeout { host: String, port: u16, timeout_ms: u64 },

    #[error("Cannot connect to panel at {host}:{port}: {reason}")]
    ConnectionFailed { host: String, port: u16, reason: String },

    #[error("Panel link closed")]
    LinkClosed,

    #[error("Invalid frame from panel: {details}")]
    InvalidFrame { details: String },

    #[error("Coordinator already started")]
    AlreadyStarted,
}

impl SatelError {
    /// Whether this error means the link can no longer carry traffic.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, SatelError::Io(_) | SatelError::LinkClosed)
    }
}

/// Error returned by a subscriber callback; isolated and logged by the dispatcher.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, SatelError>;
