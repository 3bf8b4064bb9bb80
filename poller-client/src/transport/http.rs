//! HTTP long-poll transport
//!
//! Sends `GET <endpoint>?<name>=<version>&...` and decodes the JSON list of
//! `{name, version, data}` records the server answers with.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use url::Url;

use super::Transport;
use crate::error::TransportError;
use crate::message::{IncomingMessage, VersionMap};

/// [`Transport`] backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with a default reqwest client
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    /// Create a transport around an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Build the request URL for `versions`.
    ///
    /// Query pairs already present on `endpoint` are kept; one pair per
    /// subscribed name is appended.
    pub fn request_url(endpoint: &Url, versions: &VersionMap) -> Result<Url, TransportError> {
        if endpoint.cannot_be_a_base() {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }

        let mut url = endpoint.clone();
        if !versions.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, version) in versions.iter() {
                pairs.append_pair(name, &version.to_string());
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        endpoint: &Url,
        versions: &VersionMap,
        timeout: Duration,
    ) -> Result<Vec<IncomingMessage>, TransportError> {
        let url = Self::request_url(endpoint, versions)?;
        tracing::trace!("Polling {}", url);

        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;
        let batch: Vec<IncomingMessage> = serde_json::from_slice(&body)?;
        Ok(batch)
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Http(error)
    }
}
