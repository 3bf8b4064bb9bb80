//! The long-poll client
//!
//! A [`Poller`] owns everything one polling session needs: the endpoint, the
//! transport, the subscription registry and the connection monitor. Cycles
//! can be run one at a time with [`Poller::poll_once`], or handed to a
//! background task with [`Poller::start`].

use std::fmt;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use url::Url;

use crate::config::PollerConfig;
use crate::connection::{ConnectionMonitor, ConnectionState};
use crate::dispatch::dispatch;
use crate::error::{PollerError, Result, TransportError};
use crate::message::VersionMap;
use crate::registry::{typed_handler, MessageHandler, SubscriptionRegistry};
use crate::scheduler::{self, CycleOutcome, CycleReport, PollerHandle};
use crate::transport::{HttpTransport, Transport};

/// Long-poll client for one endpoint
///
/// # Example
///
/// ```no_run
/// use poller_client::{Poller, PollerConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut poller = Poller::new("http://localhost:8080/poll", PollerConfig::default())?;
/// poller
///     .on_message("boardChange", |data| println!("board: {data}"))
///     .on_connect(|| println!("connected"))
///     .on_disconnect(|| println!("disconnected"));
///
/// let handle = poller.start();
/// // ... later
/// let poller = handle.shutdown().await?;
/// println!("stopped at {:?}", poller.versions());
/// # Ok(())
/// # }
/// ```
pub struct Poller {
    endpoint: Url,
    config: PollerConfig,
    transport: Box<dyn Transport>,
    registry: SubscriptionRegistry,
    connection: ConnectionMonitor,
    state_tx: watch::Sender<ConnectionState>,
}

impl Poller {
    /// Create a poller that talks HTTP to `endpoint`.
    pub fn new(endpoint: &str, config: PollerConfig) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| PollerError::InvalidEndpoint(e.to_string()))?;
        let transport = HttpTransport::new()?;
        Self::with_transport(endpoint, config, transport)
    }

    /// Create a poller that uses a custom transport.
    pub fn with_transport<T>(endpoint: Url, config: PollerConfig, transport: T) -> Result<Self>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            endpoint,
            config,
            transport: Box::new(transport),
            registry: SubscriptionRegistry::new(),
            connection: ConnectionMonitor::new(),
            state_tx,
        })
    }

    /// Register or replace the handler for `name`.
    ///
    /// A new name starts at version 0; re-registering keeps the version
    /// already reached.
    pub fn on_message<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.register(name.into(), Box::new(handler));
        self
    }

    /// Register a handler that receives the payload decoded as `T`.
    ///
    /// Payloads that fail to decode are logged and dropped; the version still
    /// advances.
    pub fn on_message_as<T, F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        T: DeserializeOwned,
        F: FnMut(T) + Send + 'static,
    {
        self.register(name.to_string(), typed_handler(name, handler));
        self
    }

    /// Set the callback fired when the poller becomes connected.
    pub fn on_connect<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut() + Send + 'static,
    {
        self.connection.set_on_connect(Box::new(callback));
        self
    }

    /// Set the callback fired when the poller loses its connection.
    pub fn on_disconnect<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut() + Send + 'static,
    {
        self.connection.set_on_disconnect(Box::new(callback));
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Receiver that observes every connection state edge
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Versions that the next request will carry
    pub fn versions(&self) -> VersionMap {
        self.registry.versions()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Run a single poll cycle.
    ///
    /// Issues one request with the current versions. On success the batch is
    /// dispatched and the poller counts as connected; on failure, including
    /// the request outliving the configured timeout, it counts as
    /// disconnected. The report carries the delay the loop should wait
    /// before the next cycle.
    pub async fn poll_once(&mut self) -> CycleReport {
        let versions = self.registry.versions();
        let timeout = self.config.timeout;
        tracing::debug!(
            "Polling {} for {} subscription(s)",
            self.endpoint,
            versions.len()
        );

        let fetch = self.transport.fetch(&self.endpoint, &versions, timeout);
        let fetched = match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        let (outcome, transition) = match fetched {
            Ok(batch) => {
                let report = dispatch(&mut self.registry, batch);
                if report.delivered > 0 {
                    tracing::debug!(
                        "Delivered {} update(s) from {}",
                        report.delivered,
                        self.endpoint
                    );
                }
                let transition = self.connection.record_success();
                (CycleOutcome::Delivered(report), transition)
            }
            Err(error) => {
                tracing::warn!("Poll of {} failed: {}", self.endpoint, error);
                let transition = self.connection.record_failure();
                (CycleOutcome::Failed(error), transition)
            }
        };

        if transition.is_some() {
            self.state_tx.send_replace(self.connection.state());
        }

        let next_delay = scheduler::next_delay(&outcome, &self.config);
        CycleReport {
            outcome,
            transition,
            next_delay,
        }
    }

    /// Start the poll loop on a background task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(self) -> PollerHandle {
        scheduler::spawn(self)
    }

    /// Run the poll loop on the current task until `shutdown` resolves,
    /// then hand the poller back.
    pub async fn run<S>(mut self, shutdown: S) -> Self
    where
        S: Future<Output = ()>,
    {
        scheduler::drive(&mut self, None, shutdown).await;
        self
    }

    pub(crate) fn register(&mut self, name: String, handler: MessageHandler) {
        self.registry.register(name, handler);
    }

    pub(crate) fn connection_mut(&mut self) -> &mut ConnectionMonitor {
        &mut self.connection
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("endpoint", &self.endpoint.as_str())
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Transition;
    use crate::dispatch::DispatchReport;
    use crate::message::IncomingMessage;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn endpoint() -> Url {
        Url::parse("http://localhost:8080/poll").unwrap()
    }

    #[test]
    fn test_new_rejects_bad_endpoint() {
        let result = Poller::new("not a url", PollerConfig::default());
        assert!(matches!(result, Err(PollerError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_with_transport_validates_config() {
        let config = PollerConfig::default().with_timeout(Duration::ZERO);
        let result = Poller::with_transport(endpoint(), config, MockTransport::new());
        assert!(matches!(result, Err(PollerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_poll_once_sends_versions_and_dispatches() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .withf(|endpoint, versions, timeout| {
                endpoint.path() == "/poll"
                    && versions.iter().collect::<Vec<_>>() == vec![("a", 0), ("b", 0)]
                    && *timeout == Duration::from_millis(60_000)
            })
            .times(1)
            .returning(|_, _, _| Ok(vec![IncomingMessage::new("a", 3, json!({"n": 1}))]));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut poller = Poller::with_transport(endpoint(), PollerConfig::default(), transport).unwrap();
        poller
            .on_message("a", move |data| sink.lock().unwrap().push(data))
            .on_message("b", |_| {});

        let report = poller.poll_once().await;

        assert!(report.outcome.is_success());
        assert_eq!(report.transition, Some(Transition::Connected));
        assert_eq!(report.next_delay, Duration::ZERO);
        assert_eq!(*seen.lock().unwrap(), vec![json!({"n": 1})]);
        assert_eq!(poller.versions().get("a"), Some(3));
        assert_eq!(poller.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_poll_once_failure_backs_off() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .returning(|_, _, _| Err(TransportError::Status(503)));

        let config = PollerConfig::default().with_backoff(Duration::from_millis(300));
        let mut poller = Poller::with_transport(endpoint(), config, transport).unwrap();

        let report = poller.poll_once().await;

        assert!(matches!(
            report.outcome,
            CycleOutcome::Failed(TransportError::Status(503))
        ));
        // Already disconnected, so no edge
        assert_eq!(report.transition, None);
        assert_eq!(report.next_delay, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_versions_sent_after_delivery() {
        let mut transport = MockTransport::new();
        let mut sequence = mockall::Sequence::new();
        transport
            .expect_fetch()
            .withf(|_, versions, _| versions.get("a") == Some(0))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| Ok(vec![IncomingMessage::new("a", 41, json!(null))]));
        transport
            .expect_fetch()
            .withf(|_, versions, _| versions.get("a") == Some(41))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| Ok(vec![IncomingMessage::new("", 0, Value::Null)]));

        let mut poller = Poller::with_transport(endpoint(), PollerConfig::default(), transport).unwrap();
        poller.on_message("a", |_| {});

        poller.poll_once().await;
        let report = poller.poll_once().await;

        assert!(matches!(
            report.outcome,
            CycleOutcome::Delivered(DispatchReport { skipped: 1, .. })
        ));
        assert_eq!(report.transition, None);
    }

    #[tokio::test]
    async fn test_on_connect_runs_before_state_flips() {
        let mut transport = MockTransport::new();
        transport.expect_fetch().returning(|_, _, _| Ok(Vec::new()));

        let mut poller = Poller::with_transport(endpoint(), PollerConfig::default(), transport).unwrap();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let state = poller.state_receiver();
        poller.on_connect({
            let observed = Arc::clone(&observed);
            move || observed.lock().unwrap().push(*state.borrow())
        });

        let report = poller.poll_once().await;

        assert_eq!(report.transition, Some(Transition::Connected));
        assert_eq!(*observed.lock().unwrap(), vec![ConnectionState::Disconnected]);
        assert_eq!(poller.state(), ConnectionState::Connected);
        assert_eq!(*poller.state_receiver().borrow(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_state_receiver_sees_edges() {
        let mut transport = MockTransport::new();
        let mut sequence = mockall::Sequence::new();
        transport
            .expect_fetch()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| Ok(Vec::new()));
        transport
            .expect_fetch()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _| Err(TransportError::Timeout(Duration::from_secs(60))));

        let mut poller = Poller::with_transport(endpoint(), PollerConfig::default(), transport).unwrap();
        let state = poller.state_receiver();

        poller.poll_once().await;
        assert_eq!(*state.borrow(), ConnectionState::Connected);

        poller.poll_once().await;
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }
}
