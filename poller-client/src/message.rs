//! Wire-level message types
//!
//! [`IncomingMessage`] is the record shape the server returns for each poll,
//! and [`VersionMap`] is the flat `name -> version` state the client sends
//! back on every request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version value meaning "no update for this name".
pub const NO_UPDATE: u64 = 0;

/// One update record returned by the server.
///
/// Records are decoded at the transport boundary, so a record that lacks a
/// `name` or a `version` never reaches dispatch. A missing `data` field
/// decodes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Message name the update belongs to
    pub name: String,
    /// Server-assigned version of this update
    pub version: u64,
    /// Opaque payload handed to the subscriber
    #[serde(default)]
    pub data: Value,
}

impl IncomingMessage {
    /// Create a new message record
    pub fn new(name: impl Into<String>, version: u64, data: Value) -> Self {
        Self {
            name: name.into(),
            version,
            data,
        }
    }

    /// Whether this record is the "no update" sentinel
    pub fn is_sentinel(&self) -> bool {
        self.version == NO_UPDATE
    }
}

/// Last delivered version per subscribed message name.
///
/// Ordered so the request carries the names in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct VersionMap(BTreeMap<String, u64>);

impl VersionMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Last delivered version for `name`, if subscribed
    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(name, version)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(name, version)| (name.as_str(), *version))
    }

    pub(crate) fn insert(&mut self, name: String, version: u64) {
        self.0.insert(name, version);
    }
}

impl FromIterator<(String, u64)> for VersionMap {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
