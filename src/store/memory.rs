use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::{Snapshot, StateKey, StateKind, StateStore, StateValue, StateVersion, Versioned};
use crate::error::StoreError;

struct Entry {
    current: Versioned,
    /// Superseded values, newest first
    superseded: VecDeque<Versioned>,
}

/// In-process store. One lock guards the whole map so snapshots are atomic.
pub struct InMemoryStateStore {
    entries: RwLock<HashMap<StateKey, Entry>>,
    history_limit: usize,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(50)
    }
}

impl InMemoryStateStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &StateKey) -> Option<Versioned> {
        self.entries
            .read()
            .await
            .get(key)
            .map(|e| e.current.clone())
    }

    async fn put(
        &self,
        key: &StateKey,
        value: StateValue,
        expected_version: u64,
        writer: &str,
    ) -> Result<u64, StoreError> {
        if value.kind() != key.kind() {
            return Err(StoreError::TypeMismatch {
                key: key.clone(),
                expected: key.kind().as_str(),
            });
        }

        let mut entries = self.entries.write().await;
        let actual = entries.get(key).map_or(0, |e| e.current.version());
        if actual != expected_version {
            debug!(
                "Conflict on {}: {} expected v{}, found v{}",
                key, writer, expected_version, actual
            );
            return Err(StoreError::Conflict {
                key: key.clone(),
                expected: expected_version,
                actual,
            });
        }

        let next = Versioned {
            value,
            meta: StateVersion {
                key: key.clone(),
                version: actual + 1,
                writer: writer.to_string(),
                written_at: Utc::now(),
            },
        };

        match entries.get_mut(key) {
            Some(entry) => {
                let previous = std::mem::replace(&mut entry.current, next);
                entry.superseded.push_front(previous);
                entry.superseded.truncate(self.history_limit);
            }
            None => {
                entries.insert(
                    key.clone(),
                    Entry {
                        current: next,
                        superseded: VecDeque::new(),
                    },
                );
            }
        }

        trace!("{} wrote {} v{}", writer, key, actual + 1);
        Ok(actual + 1)
    }

    async fn snapshot(&self, keys: &[StateKey]) -> Snapshot {
        let entries = self.entries.read().await;
        let picked: BTreeMap<StateKey, Versioned> = keys
            .iter()
            .filter_map(|k| entries.get(k).map(|e| (k.clone(), e.current.clone())))
            .collect();
        Snapshot::new(picked)
    }

    async fn history(&self, key: &StateKey, limit: usize) -> Vec<Versioned> {
        self.entries
            .read()
            .await
            .get(key)
            .map(|e| e.superseded.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    async fn keys(&self, kind: StateKind) -> Vec<StateKey> {
        let mut keys: Vec<StateKey> = self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.kind() == kind)
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::patient::fixtures::at;
    use crate::domain::Patient;

    fn patient_value(location: &str) -> StateValue {
        StateValue::Patient(Patient::new("p1", Some(location.into()), at(0)))
    }

    #[tokio::test]
    async fn test_put_requires_matching_version() {
        let store = InMemoryStateStore::new(10);
        let key = StateKey::Patient("p1".into());

        assert!(store.get(&key).await.is_none());
        assert_eq!(store.put(&key, patient_value("ED"), 0, "t").await.unwrap(), 1);
        assert_eq!(store.put(&key, patient_value("ICU"), 1, "t").await.unwrap(), 2);

        let err = store
            .put(&key, patient_value("Ward"), 1, "t")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, actual: 2, .. }));

        let current = store.get(&key).await.unwrap();
        assert_eq!(current.version(), 2);
        assert_eq!(current.value, patient_value("ICU"));
    }

    #[tokio::test]
    async fn test_history_keeps_superseded_values() {
        let store = InMemoryStateStore::new(2);
        let key = StateKey::Patient("p1".into());
        for (v, loc) in ["ED", "ICU", "Ward", "ED"].iter().enumerate() {
            store.put(&key, patient_value(loc), v as u64, "t").await.unwrap();
        }
        let history = store.history(&key, 10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version(), 3);
        assert_eq!(history[1].version(), 2);
    }

    #[tokio::test]
    async fn test_kind_mismatch_rejected() {
        let store = InMemoryStateStore::default();
        let err = store
            .put(&StateKey::Risk("p1".into()), patient_value("ED"), 0, "t")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_and_keys() {
        let store = InMemoryStateStore::default();
        let p1 = StateKey::Patient("p1".into());
        let p2 = StateKey::Patient("p2".into());
        store.put(&p2, patient_value("ED"), 0, "t").await.unwrap();
        store.put(&p1, patient_value("ED"), 0, "t").await.unwrap();

        let snap = store
            .snapshot(&[p1.clone(), StateKey::Risk("p1".into())])
            .await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.version(&p1), 1);
        assert_eq!(snap.version(&StateKey::Risk("p1".into())), 0);

        assert_eq!(store.keys(StateKind::Patient).await, vec![p1, p2]);
        assert!(store.keys(StateKind::Risk).await.is_empty());
    }
}
