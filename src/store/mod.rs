//! Versioned shared state
//!
//! Every key carries a version counter that increases by one on each write.
//! Writers pass the version they read; a mismatch is rejected with
//! [`StoreError::Conflict`] and the caller re-reads. A key that was never
//! written has version 0.

pub mod keys;
pub mod memory;
pub mod retry;

pub use keys::{StateKey, StateKind, StateValue};
pub use memory::InMemoryStateStore;
pub use retry::{write_with_retry, RetryPolicy, Update, WriteOutcome};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StoreError;

/// Bookkeeping attached to every stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVersion {
    pub key: StateKey,
    pub version: u64,
    pub writer: String,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    pub value: StateValue,
    pub meta: StateVersion,
}

impl Versioned {
    pub fn version(&self) -> u64 {
        self.meta.version
    }
}

/// Point-in-time view over a set of keys
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: BTreeMap<StateKey, Versioned>,
}

impl Snapshot {
    pub fn new(entries: BTreeMap<StateKey, Versioned>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &StateKey) -> Option<&Versioned> {
        self.entries.get(key)
    }

    pub fn value(&self, key: &StateKey) -> Option<&StateValue> {
        self.entries.get(key).map(|v| &v.value)
    }

    pub fn version(&self, key: &StateKey) -> u64 {
        self.entries.get(key).map_or(0, Versioned::version)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &Versioned)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared state contract. Any backing must honour optimistic concurrency.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current value and version; `None` means version 0
    async fn get(&self, key: &StateKey) -> Option<Versioned>;

    /// Write `value` if the stored version equals `expected_version`.
    /// Returns the new version.
    async fn put(
        &self,
        key: &StateKey,
        value: StateValue,
        expected_version: u64,
        writer: &str,
    ) -> Result<u64, StoreError>;

    /// Consistent multi-key read; absent keys are omitted
    async fn snapshot(&self, keys: &[StateKey]) -> Snapshot;

    /// Superseded values for `key`, newest first, up to `limit`
    async fn history(&self, key: &StateKey, limit: usize) -> Vec<Versioned>;

    /// All keys of one kind, sorted
    async fn keys(&self, kind: StateKind) -> Vec<StateKey>;
}
