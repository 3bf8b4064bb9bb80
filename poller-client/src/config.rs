//! Configuration types for the poller-client crate
//!
//! This module defines the configuration that controls how long a single
//! long-poll request may take and how long the loop waits after a failure.

use std::time::Duration;

use crate::error::PollerError;

/// Default request timeout for a single long-poll request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default pause before retrying after a failed request.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(1_000);

/// Configuration for a [`Poller`](crate::Poller)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Timeout for a single request. A request still pending when it elapses
    /// counts as a failed cycle.
    /// Default: 60 seconds
    pub timeout: Duration,

    /// Fixed delay before the next cycle after a failed one.
    /// Default: 1 second
    pub backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl PollerConfig {
    /// Create a new PollerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), PollerError> {
        if self.timeout == Duration::ZERO {
            return Err(PollerError::Configuration(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.backoff == Duration::ZERO {
            return Err(PollerError::Configuration(
                "Failure backoff must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    // Builder pattern methods for fluent configuration

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}
