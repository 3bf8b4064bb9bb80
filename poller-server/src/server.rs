//! HTTP endpoint serving long-poll requests from a [`Hub`].

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::ServerError;
use crate::hub::Hub;

/// Path segment the poll endpoint is mounted on.
pub const POLL_PATH: &str = "poll";

/// HTTP server answering `GET /poll?<name>=<version>&...`
///
/// # Example
///
/// ```no_run
/// use poller_server::{Hub, HubConfig, PollServer};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let hub = Hub::new(HubConfig::default())?;
/// let server = PollServer::start("127.0.0.1:8080".parse()?, hub).await?;
///
/// server.hub().broadcast("boardChange", "e2-e4")?;
/// println!("Polling endpoint: {}", server.poll_url()?);
///
/// server.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct PollServer {
    addr: SocketAddr,
    hub: Hub,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<JoinHandle<()>>,
    expiry_handle: JoinHandle<()>,
}

impl PollServer {
    /// Bind `addr` and start serving `hub`.
    ///
    /// Binding port 0 picks a free port; see [`PollServer::local_addr`].
    pub async fn start(addr: SocketAddr, hub: Hub) -> Result<Self, ServerError> {
        let routes = poll_filter(hub.clone()).recover(handle_rejection);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown_rx.await;
            })
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        let server_handle = tokio::spawn(server);
        let expiry_handle = hub.spawn_expiry();

        tracing::info!("Poll server listening on {}", bound);

        Ok(Self {
            addr: bound,
            hub,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
            expiry_handle,
        })
    }

    /// The address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Full URL of the poll endpoint
    pub fn poll_url(&self) -> Result<Url, ServerError> {
        let url = format!("http://{}/{}", self.addr, POLL_PATH);
        Url::parse(&url).map_err(|e| ServerError::InvalidUrl(e.to_string()))
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Shutdown the server gracefully.
    ///
    /// Parked clients get the "no update" reply first so in-flight requests
    /// finish right away.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        self.hub.close();
        self.expiry_handle.abort();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| ServerError::Join(e.to_string()))?;
        }

        tracing::info!("Poll server on {} stopped", self.addr);
        Ok(())
    }
}

/// Warp filter for the poll endpoint, for embedding in a larger service.
pub fn poll_filter(hub: Hub) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::get()
        .and(warp::path(POLL_PATH))
        .and(warp::path::end())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(move |query: HashMap<String, String>| {
            let hub = hub.clone();
            async move {
                let tokens = parse_tokens(query);
                tracing::trace!("Poll request listening to {} name(s)", tokens.len());
                let messages = hub.wait_for_updates(tokens).await;
                Ok::<_, Rejection>(warp::reply::with_header(
                    warp::reply::json(&messages),
                    "cache-control",
                    "no-cache",
                ))
            }
        })
}

/// Keep the query pairs whose value is an unsigned integer version.
fn parse_tokens(query: HashMap<String, String>) -> HashMap<String, u64> {
    query
        .into_iter()
        .filter_map(|(name, value)| value.trim().parse::<u64>().ok().map(|version| (name, version)))
        .collect()
}

/// Handle rejections and convert them to HTTP responses.
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string")
    } else {
        tracing::warn!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(message, code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens_skips_non_numeric_values() {
        let query: HashMap<String, String> = [
            ("board", "12"),
            ("chat", "0"),
            ("_", "abc"),
            ("neg", "-1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let tokens = parse_tokens(query);

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens.get("board"), Some(&12));
        assert_eq!(tokens.get("chat"), Some(&0));
    }

    #[tokio::test]
    async fn test_filter_returns_pending_messages() {
        let hub = Hub::new(crate::HubConfig::default()).unwrap();
        let version = hub.broadcast("board", "e4").unwrap();

        let response = warp::test::request()
            .method("GET")
            .path("/poll?board=0")
            .reply(&poll_filter(hub))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "no-cache");
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!([{"version": version, "name": "board", "data": "e4"}])
        );
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let hub = Hub::new(crate::HubConfig::default()).unwrap();
        let routes = poll_filter(hub).recover(handle_rejection);

        let response = warp::test::request()
            .method("GET")
            .path("/feed")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
