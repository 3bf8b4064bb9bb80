//! Error types for the poller-client crate.

use std::time::Duration;

/// Errors produced by a [`Transport`](crate::Transport) while fetching updates.
///
/// Every variant is a failure outcome for the poll loop: it drives the
/// connection to `Disconnected` and schedules the next cycle after the
/// configured backoff. None of them reach the owner as an error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request could not be completed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status code
    #[error("Unexpected status code: {0}")]
    Status(u16),

    /// The response body was not a list of well-formed message records
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// No response arrived within the request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint could not be turned into a request URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Errors returned by the owner-facing poller API.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The endpoint could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The transport could not be constructed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The poll loop is no longer running
    #[error("Poll loop has stopped")]
    Stopped,

    /// The poll loop task could not be joined
    #[error("Failed to join poll loop task: {0}")]
    Join(String),
}

/// Convenience type alias for Results using PollerError.
pub type Result<T> = std::result::Result<T, PollerError>;
