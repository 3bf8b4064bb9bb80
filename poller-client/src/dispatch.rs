//! Delivery of a polled batch to registered subscriptions
//!
//! Messages are handled strictly in the order the server returned them. A
//! message is delivered when its version is newer than the subscription's
//! last delivered version; the subscription then takes the message's version
//! as its own. Sentinel records, duplicates, stale versions and names nobody
//! subscribed to are skipped without touching any version.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::message::IncomingMessage;
use crate::registry::SubscriptionRegistry;

/// Outcome counts for one dispatched batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages handed to a handler (including ones whose handler panicked)
    pub delivered: usize,
    /// `version == 0` sentinel records
    pub skipped: usize,
    /// Messages whose version equals the last delivered one
    pub duplicates: usize,
    /// Messages older than the last delivered version
    pub stale: usize,
    /// Messages for names with no subscription
    pub unknown: usize,
    /// Deliveries whose handler panicked
    pub failed: usize,
}

impl DispatchReport {
    /// Total number of records seen in the batch
    pub fn total(&self) -> usize {
        self.delivered + self.skipped + self.duplicates + self.stale + self.unknown
    }
}

/// Dispatch `batch` against `registry`, advancing versions as messages land.
pub fn dispatch(registry: &mut SubscriptionRegistry, batch: Vec<IncomingMessage>) -> DispatchReport {
    let mut report = DispatchReport::default();

    for message in batch {
        if message.is_sentinel() {
            report.skipped += 1;
            continue;
        }

        let Some(subscription) = registry.get_mut(&message.name) else {
            tracing::debug!(
                "Dropping update for unsubscribed name '{}' (version {})",
                message.name,
                message.version
            );
            report.unknown += 1;
            continue;
        };

        let last_version = subscription.last_version();
        if message.version == last_version {
            report.duplicates += 1;
            continue;
        }
        if message.version < last_version {
            tracing::warn!(
                "Ignoring stale update for '{}': version {} is older than {}",
                message.name,
                message.version,
                last_version
            );
            report.stale += 1;
            continue;
        }

        let IncomingMessage { name, version, data } = message;
        let handler = subscription.handler_mut();
        if !invoke_isolated(&name, || handler(data)) {
            report.failed += 1;
        }
        subscription.set_last_version(version);
        report.delivered += 1;

        tracing::trace!("Delivered '{}' at version {}", name, version);
    }

    report
}

/// Run an owner callback, containing any panic it raises.
///
/// Returns `false` if the callback panicked.
pub(crate) fn invoke_isolated<F: FnOnce()>(label: &str, callback: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(
                "Callback for '{}' panicked: {}",
                label,
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
