//! Error types shared by the monitor, its transports and the alert channels.

use thiserror::Error;

/// Errors surfaced by the library API (configuration, persistence, CLI plumbing).
///
/// Nothing on the request-observation path returns this type: detection
/// failures there are swallowed and treated as "no evidence".
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] FetchError),

    /// An operation is not allowed in the current settings
    #[error("Not allowed: {0}")]
    NotAllowed(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

impl MonitorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_allowed(msg: impl Into<String>) -> Self {
        Self::NotAllowed(msg.into())
    }
}

/// Terminal failures a fetch-style transport can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Cancelled by the caller. Never counted as a failed round.
    #[error("request aborted")]
    Aborted,

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("body read error: {0}")]
    Body(String),
}

impl FetchError {
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// A single alert channel failed. Always logged, never propagated.
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("{channel} unavailable: {reason}")]
    Unavailable {
        channel: &'static str,
        reason: String,
    },

    #[error("{channel} failed: {source}")]
    Io {
        channel: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl AlertError {
    pub fn unavailable(channel: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            channel,
            reason: reason.into(),
        }
    }
}
