//! Versioned message hub
//!
//! The hub keeps the latest message for every name, each stamped with a
//! version drawn from one hub-wide counter. A polling client presents the
//! versions it already has: if anything it listens to has moved on, it gets
//! those messages at once; otherwise it is parked until a broadcast for one
//! of its names arrives or the hold timeout passes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::HubError;

/// Configuration for a [`Hub`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// How long a client is parked before it gets the "no update" reply
    /// Default: 30 seconds
    pub hold_timeout: Duration,

    /// How long a broadcast message stays cached
    /// Default: 30 seconds
    pub retention: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hold_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(30),
        }
    }
}

impl HubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), HubError> {
        if self.hold_timeout == Duration::ZERO {
            return Err(HubError::Configuration(
                "Hold timeout must be greater than 0".to_string(),
            ));
        }

        if self.retention == Duration::ZERO {
            return Err(HubError::Configuration(
                "Retention must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_hold_timeout(mut self, hold_timeout: Duration) -> Self {
        self.hold_timeout = hold_timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// A message record as sent to polling clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub version: u64,
    pub name: String,
    pub data: Value,
}

impl OutgoingMessage {
    /// The sentinel record telling a client nothing changed
    pub fn no_update() -> Self {
        Self {
            version: 0,
            name: String::new(),
            data: Value::Null,
        }
    }
}

struct Cached {
    message: OutgoingMessage,
    published_at: Instant,
}

struct Waiter {
    tokens: HashMap<String, u64>,
    reply: oneshot::Sender<Vec<OutgoingMessage>>,
}

struct HubState {
    last_version: u64,
    messages: HashMap<String, Cached>,
    waiters: HashMap<Uuid, Waiter>,
    closed: bool,
}

impl HubState {
    /// Cached messages the client listens to and does not have yet, oldest first
    ///
    /// Only versions newer than the client's token are pending.
    fn pending_for(&self, tokens: &HashMap<String, u64>) -> Vec<OutgoingMessage> {
        let mut pending: Vec<OutgoingMessage> = self
            .messages
            .values()
            .map(|cached| &cached.message)
            .filter(|message| {
                message.version != 0
                    && tokens
                        .get(&message.name)
                        .is_some_and(|seen| message.version > *seen)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|message| message.version);
        pending
    }
}

/// Shared long-poll hub
///
/// Cloning a hub is cheap; all clones share the same cache and parked clients.
#[derive(Clone)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub.
    ///
    /// Versions continue from the current wall-clock time in milliseconds, so
    /// a restarted hub keeps handing out versions above the ones its clients
    /// already hold.
    pub fn new(config: HubConfig) -> Result<Self, HubError> {
        config.validate()?;

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        Ok(Self {
            state: Arc::new(Mutex::new(HubState {
                last_version: seed,
                messages: HashMap::new(),
                waiters: HashMap::new(),
                closed: false,
            })),
            config,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Publish `data` under `name`.
    ///
    /// Replaces the cached message for `name` and wakes every parked client
    /// listening to it.
    ///
    /// # Returns
    ///
    /// The version assigned to the message
    pub fn broadcast(&self, name: impl Into<String>, data: impl Serialize) -> Result<u64, HubError> {
        let name = name.into();
        let data = serde_json::to_value(data)?;

        let mut state = self.state.lock();
        state.last_version += 1;
        let message = OutgoingMessage {
            version: state.last_version,
            name: name.clone(),
            data,
        };

        state.messages.insert(
            name.clone(),
            Cached {
                message: message.clone(),
                published_at: Instant::now(),
            },
        );

        let listening: Vec<Uuid> = state
            .waiters
            .iter()
            .filter(|(_, waiter)| waiter.tokens.contains_key(&name))
            .map(|(id, _)| *id)
            .collect();

        for id in &listening {
            if let Some(waiter) = state.waiters.remove(id) {
                let _ = waiter.reply.send(vec![message.clone()]);
            }
        }

        tracing::debug!(
            "Broadcast '{}' at version {} to {} parked client(s)",
            name,
            message.version,
            listening.len()
        );
        Ok(message.version)
    }

    /// Answer one long-poll request.
    ///
    /// `tokens` maps each name the client listens to onto the last version it
    /// received. Returns pending messages immediately, or parks until a
    /// relevant broadcast or the hold timeout, in which case the reply is the
    /// single "no update" sentinel.
    ///
    /// The hub counter is raised to the highest token seen, so the next
    /// broadcast outranks versions a client got from an earlier hub.
    pub async fn wait_for_updates(&self, tokens: HashMap<String, u64>) -> Vec<OutgoingMessage> {
        let (parked, reply) = {
            let mut state = self.state.lock();
            if state.closed {
                return vec![OutgoingMessage::no_update()];
            }

            if let Some(&highest) = tokens.values().max() {
                if highest > state.last_version {
                    tracing::debug!(
                        "Client holds version {} ahead of hub at {}, catching up",
                        highest,
                        state.last_version
                    );
                    state.last_version = highest;
                }
            }

            let pending = state.pending_for(&tokens);
            if !pending.is_empty() {
                return pending;
            }

            let (tx, rx) = oneshot::channel();
            let id = Uuid::new_v4();
            state.waiters.insert(id, Waiter { tokens, reply: tx });
            (Parked { hub: self, id }, rx)
        };

        let messages = match tokio::time::timeout(self.config.hold_timeout, reply).await {
            Ok(Ok(messages)) => messages,
            Ok(Err(_)) | Err(_) => vec![OutgoingMessage::no_update()],
        };
        drop(parked);
        messages
    }

    /// Drop cached messages older than the retention window.
    ///
    /// # Returns
    ///
    /// The number of messages removed
    pub fn expire(&self) -> usize {
        let retention = self.config.retention;
        let mut state = self.state.lock();
        let before = state.messages.len();
        state
            .messages
            .retain(|_, cached| cached.published_at.elapsed() <= retention);
        let removed = before - state.messages.len();
        if removed > 0 {
            tracing::debug!("Expired {} cached message(s)", removed);
        }
        removed
    }

    /// Run [`Hub::expire`] every retention period on a background task.
    pub fn spawn_expiry(&self) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.config.retention);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                hub.expire();
            }
        })
    }

    /// Answer every parked client with the "no update" sentinel.
    pub fn release_waiters(&self) -> usize {
        let waiters: Vec<Waiter> = {
            let mut state = self.state.lock();
            state.waiters.drain().map(|(_, waiter)| waiter).collect()
        };
        let released = waiters.len();
        for waiter in waiters {
            let _ = waiter.reply.send(vec![OutgoingMessage::no_update()]);
        }
        released
    }

    /// Stop parking clients and release the ones already parked.
    pub fn close(&self) {
        self.state.lock().closed = true;
        let released = self.release_waiters();
        tracing::debug!("Hub closed, released {} parked client(s)", released);
    }

    /// Number of clients currently parked
    pub fn waiting_clients(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Number of cached messages
    pub fn cached_messages(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Version assigned by the most recent broadcast
    pub fn last_version(&self) -> u64 {
        self.state.lock().last_version
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("last_version", &state.last_version)
            .field("cached_messages", &state.messages.len())
            .field("waiting_clients", &state.waiters.len())
            .finish()
    }
}

/// Removes a parked client when its request goes away, answered or not.
struct Parked<'a> {
    hub: &'a Hub,
    id: Uuid,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.hub.state.lock().waiters.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs
            .iter()
            .map(|(name, version)| (name.to_string(), *version))
            .collect()
    }

    fn hub(hold: Duration) -> Hub {
        Hub::new(HubConfig::default().with_hold_timeout(hold)).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(HubConfig::default().validate().is_ok());
        assert!(HubConfig::default()
            .with_hold_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(HubConfig::default()
            .with_retention(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_sentinel_shape() {
        assert_eq!(
            serde_json::to_value(vec![OutgoingMessage::no_update()]).unwrap(),
            json!([{"version": 0, "name": "", "data": null}])
        );
    }

    #[tokio::test]
    async fn test_broadcast_versions_increase() {
        let hub = hub(Duration::from_secs(1));
        let first = hub.broadcast("a", "x").unwrap();
        let second = hub.broadcast("b", "y").unwrap();
        let third = hub.broadcast("a", "z").unwrap();

        assert!(first > 0);
        assert_eq!(second, first + 1);
        assert_eq!(third, second + 1);
        // "a" was replaced, not appended
        assert_eq!(hub.cached_messages(), 2);
    }

    #[tokio::test]
    async fn test_pending_messages_returned_immediately() {
        let hub = hub(Duration::from_secs(30));
        let a = hub.broadcast("a", json!({"n": 1})).unwrap();
        let b = hub.broadcast("b", json!({"n": 2})).unwrap();
        hub.broadcast("c", json!({"n": 3})).unwrap();

        let messages = hub.wait_for_updates(tokens(&[("a", 0), ("b", 0)])).await;

        let versions: Vec<u64> = messages.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![a, b]);
        assert_eq!(hub.waiting_clients(), 0);
    }

    #[tokio::test]
    async fn test_up_to_date_client_is_not_resent() {
        let hub = hub(Duration::from_millis(50));
        let version = hub.broadcast("a", "x").unwrap();

        let messages = hub.wait_for_updates(tokens(&[("a", version)])).await;

        assert_eq!(messages, vec![OutgoingMessage::no_update()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_timeout_returns_sentinel() {
        let hub = hub(Duration::from_secs(10));

        let messages = hub.wait_for_updates(tokens(&[("a", 0)])).await;

        assert_eq!(messages, vec![OutgoingMessage::no_update()]);
        assert_eq!(hub.waiting_clients(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_wakes_listening_clients_only() {
        let hub = hub(Duration::from_secs(30));

        let listening = tokio::spawn({
            let hub = hub.clone();
            async move { hub.wait_for_updates(tokens(&[("a", 0)])).await }
        });
        let other = tokio::spawn({
            let hub = hub.clone();
            async move { hub.wait_for_updates(tokens(&[("b", 0)])).await }
        });

        while hub.waiting_clients() < 2 {
            tokio::task::yield_now().await;
        }

        let version = hub.broadcast("a", "hello").unwrap();
        let messages = listening.await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].version, version);
        assert_eq!(messages[0].data, json!("hello"));
        assert_eq!(hub.waiting_clients(), 1);

        hub.close();
        assert_eq!(other.await.unwrap(), vec![OutgoingMessage::no_update()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_drops_old_messages() {
        let hub = Hub::new(HubConfig::default().with_retention(Duration::from_secs(5))).unwrap();
        hub.broadcast("old", 1).unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        hub.broadcast("new", 2).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(hub.expire(), 1);
        assert_eq!(hub.cached_messages(), 1);

        let messages = hub.wait_for_updates(tokens(&[("new", 0)])).await;
        assert_eq!(messages[0].name, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_ahead_of_hub_is_not_resent_older_versions() {
        let hub = hub(Duration::from_secs(10));
        let cached = hub.broadcast("a", "from restarted hub").unwrap();
        let held = cached + 50_000;

        let messages = hub.wait_for_updates(tokens(&[("a", held)])).await;

        assert_eq!(messages, vec![OutgoingMessage::no_update()]);
        assert_eq!(hub.last_version(), held);

        let next = hub.broadcast("a", "fresh").unwrap();
        assert!(next > held);
        let messages = hub.wait_for_updates(tokens(&[("a", held)])).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].version, next);
    }

    #[tokio::test]
    async fn test_closed_hub_does_not_park() {
        let hub = hub(Duration::from_secs(30));
        hub.close();

        let messages = hub.wait_for_updates(tokens(&[("a", 0)])).await;
        assert_eq!(messages, vec![OutgoingMessage::no_update()]);
        assert_eq!(hub.waiting_clients(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_request_is_unparked() {
        let hub = hub(Duration::from_secs(30));
        let request = tokio::spawn({
            let hub = hub.clone();
            async move { hub.wait_for_updates(tokens(&[("a", 0)])).await }
        });

        while hub.waiting_clients() < 1 {
            tokio::task::yield_now().await;
        }
        request.abort();
        let _ = request.await;

        assert_eq!(hub.waiting_clients(), 0);
    }
}
