//! Error types for the poller-server crate.

/// Errors from hub operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The broadcast payload could not be turned into JSON
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors from the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound
    #[error("Failed to bind: {0}")]
    Bind(String),

    /// The server task could not be joined
    #[error("Failed to join server task: {0}")]
    Join(String),

    /// The poll URL could not be built from the bound address
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}
