//! Subscription registry keyed by message name
//!
//! Each subscription pairs a handler with the last version delivered to it.
//! The registry is the single source of the [`VersionMap`] sent on every poll,
//! so a name is in the map exactly when it has a subscription.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::message::{VersionMap, NO_UPDATE};

/// Handler invoked with the payload of each new update for a name.
pub type MessageHandler = Box<dyn FnMut(Value) + Send + 'static>;

/// A registered interest in one message name
pub struct Subscription {
    handler: MessageHandler,
    last_version: u64,
}

impl Subscription {
    fn new(handler: MessageHandler) -> Self {
        Self {
            handler,
            last_version: NO_UPDATE,
        }
    }

    /// Version of the last update delivered to this subscription
    pub fn last_version(&self) -> u64 {
        self.last_version
    }

    pub(crate) fn handler_mut(&mut self) -> &mut MessageHandler {
        &mut self.handler
    }

    pub(crate) fn set_last_version(&mut self, version: u64) {
        self.last_version = version;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("last_version", &self.last_version)
            .finish_non_exhaustive()
    }
}

/// Registry of subscriptions owned by a single poller
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    ///
    /// A new name starts at version 0. Registering a name again replaces the
    /// handler and keeps the version already reached.
    ///
    /// # Returns
    ///
    /// * `true` if the name was not registered before
    pub fn register(&mut self, name: impl Into<String>, handler: MessageHandler) -> bool {
        let name = name.into();
        match self.subscriptions.get_mut(&name) {
            Some(existing) => {
                tracing::debug!(
                    "Replacing handler for '{}' (version stays at {})",
                    name,
                    existing.last_version
                );
                existing.handler = handler;
                false
            }
            None => {
                tracing::debug!("Registered subscription for '{}'", name);
                self.subscriptions.insert(name, Subscription::new(handler));
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Subscription> {
        self.subscriptions.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(name)
    }

    /// Last delivered version for `name`, if subscribed
    pub fn last_version(&self, name: &str) -> Option<u64> {
        self.subscriptions.get(name).map(Subscription::last_version)
    }

    /// Snapshot of the versions to send with the next request
    pub fn versions(&self) -> VersionMap {
        let mut versions = VersionMap::new();
        for (name, subscription) in &self.subscriptions {
            versions.insert(name.clone(), subscription.last_version);
        }
        versions
    }

    pub fn contains(&self, name: &str) -> bool {
        self.subscriptions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// Wrap a typed handler so it can be stored as a [`MessageHandler`].
///
/// Payloads that do not decode into `T` are logged and dropped.
pub(crate) fn typed_handler<T, F>(name: &str, mut handler: F) -> MessageHandler
where
    T: DeserializeOwned,
    F: FnMut(T) + Send + 'static,
{
    let name = name.to_string();
    Box::new(move |data| match serde_json::from_value::<T>(data) {
        Ok(value) => handler(value),
        Err(e) => {
            tracing::warn!("Dropping update for '{}': payload did not decode: {}", name, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn recording_handler(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> MessageHandler {
        let log = Arc::clone(log);
        Box::new(move |data| log.lock().unwrap().push(format!("{tag}:{data}")))
    }

    #[test]
    fn test_register_starts_at_zero() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.register("a", Box::new(|_| {})));

        assert_eq!(registry.last_version("a"), Some(0));
        assert_eq!(registry.last_version("b"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregister_replaces_handler_and_keeps_version() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::new();
        registry.register("a", recording_handler(&log, "first"));
        registry.get_mut("a").unwrap().set_last_version(5);

        assert!(!registry.register("a", recording_handler(&log, "second")));
        assert_eq!(registry.last_version("a"), Some(5));

        let subscription = registry.get_mut("a").unwrap();
        (subscription.handler_mut())(json!(1));
        assert_eq!(*log.lock().unwrap(), vec!["second:1".to_string()]);
    }

    #[test]
    fn test_versions_mirror_subscriptions() {
        let mut registry = SubscriptionRegistry::new();
        registry.register("b", Box::new(|_| {}));
        registry.register("a", Box::new(|_| {}));
        registry.get_mut("b").unwrap().set_last_version(9);

        let versions = registry.versions();
        assert_eq!(versions.len(), registry.len());
        assert_eq!(versions.iter().collect::<Vec<_>>(), vec![("a", 0), ("b", 9)]);
    }

    #[test]
    fn test_typed_handler_decodes_payload() {
        #[derive(serde::Deserialize)]
        struct Move {
            from: String,
            to: String,
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut handler = typed_handler("board", move |m: Move| {
            sink.lock().unwrap().push(format!("{}-{}", m.from, m.to));
        });

        handler(json!({"from": "e2", "to": "e4"}));
        handler(json!("not a move"));

        assert_eq!(*seen.lock().unwrap(), vec!["e2-e4".to_string()]);
    }
}
