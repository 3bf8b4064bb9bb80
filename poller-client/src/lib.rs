//! # poller-client
//!
//! A long-polling client. It keeps asking a server endpoint for updates,
//! remembers the last version delivered for each subscribed message name,
//! hands new messages to registered handlers, and turns the request churn
//! into a stable connected / disconnected signal.
//!
//! # Overview
//!
//! - [`Poller`]: owns the subscriptions, the connection state and the
//!   transport. Register handlers with [`Poller::on_message`], then either run
//!   cycles by hand with [`Poller::poll_once`] or start the loop with
//!   [`Poller::start`].
//! - [`PollerHandle`]: the handle to a running loop. Used to add handlers,
//!   observe connection state and stop the loop.
//! - [`Transport`]: one request per call. [`HttpTransport`] sends the version
//!   map as query parameters and decodes a JSON list of
//!   `{name, version, data}` records.
//!
//! # Delivery rules
//!
//! - A record with version 0 means "nothing new" and is skipped.
//! - A record is delivered only when its version is newer than the last one
//!   delivered for that name, so each version reaches its handler at most once.
//! - Records for names nobody subscribed to are dropped.
//! - A panicking handler is contained; the rest of the batch still runs.
//!
//! # Scheduling
//!
//! After a successful cycle the next request goes out immediately. After a
//! failure (transport error or timeout) the loop waits a fixed backoff,
//! 1 second by default. The loop never gives up on its own.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod message;
pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use config::PollerConfig;
pub use connection::{ConnectionMonitor, ConnectionState, Transition};
pub use dispatch::{dispatch, DispatchReport};
pub use error::{PollerError, Result, TransportError};
pub use message::{IncomingMessage, VersionMap};
pub use poller::Poller;
pub use registry::{MessageHandler, SubscriptionRegistry};
pub use scheduler::{CycleOutcome, CycleReport, PollerHandle};
pub use transport::{HttpTransport, Transport};
