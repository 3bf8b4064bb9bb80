//! Transport adapters
//!
//! A [`Transport`] performs exactly one request per call: it carries the
//! current version map to the endpoint and returns the decoded batch, or an
//! error. Retrying is the poll loop's job, never the transport's.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;
use crate::message::{IncomingMessage, VersionMap};

pub use http::HttpTransport;

/// One-shot request against a long-poll endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the next batch of updates.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The long-poll endpoint
    /// * `versions` - Last delivered version per subscribed name
    /// * `timeout` - How long the request may stay open
    ///
    /// # Returns
    ///
    /// The records in server order, already validated, or the reason the
    /// request failed. A request exceeding `timeout` must fail.
    async fn fetch(
        &self,
        endpoint: &Url,
        versions: &VersionMap,
        timeout: Duration,
    ) -> Result<Vec<IncomingMessage>, TransportError>;
}
