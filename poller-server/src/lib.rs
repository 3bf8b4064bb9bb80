//! Long-poll hub and HTTP endpoint.
//!
//! This crate is the server half of the long-polling system that
//! `poller-client` talks to.
//!
//! # Overview
//!
//! - [`Hub`]: caches the latest message per name, each with a version from a
//!   single hub-wide counter, and parks clients that are up to date until
//!   something they listen to changes.
//! - [`PollServer`]: binds a local port and serves `GET /poll` from a hub.
//!   [`poll_filter`] exposes the same endpoint as a warp filter.
//!
//! # Wire format
//!
//! Requests carry one query pair per name the client listens to, with the
//! last version it received (`?boardChange=17&chat=0`). Responses are a JSON
//! list of `{"version", "name", "data"}` records. When the hold timeout
//! passes without news the list holds a single record with version 0.
//!
//! # Example
//!
//! ```no_run
//! use poller_server::{Hub, HubConfig, PollServer};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HubConfig::default().with_hold_timeout(Duration::from_secs(10));
//!     let server = PollServer::start("0.0.0.0:8080".parse()?, Hub::new(config)?).await?;
//!
//!     let hub = server.hub().clone();
//!     tokio::spawn(async move {
//!         let mut ticker = tokio::time::interval(Duration::from_secs(1));
//!         loop {
//!             ticker.tick().await;
//!             let _ = hub.broadcast("clock", format!("{:?}", std::time::SystemTime::now()));
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod error;
pub mod hub;
mod server;

pub use error::{HubError, ServerError};
pub use hub::{Hub, HubConfig, OutgoingMessage};
pub use server::{poll_filter, PollServer, POLL_PATH};
