//! Optimistic read-modify-write with bounded exponential backoff

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{StateKey, StateStore, StateValue};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// ±25% random variation on each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter {
            return delay;
        }
        let spread = delay.as_secs_f64() / 4.0;
        let offset = (rand::random::<f64>() * 2.0 - 1.0) * spread;
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }

    /// Upper bound on total sleep across all retries, ignoring jitter
    pub fn max_total_wait(&self) -> Duration {
        (1..=self.max_retries)
            .map(|r| {
                let factor = 2u32.saturating_pow(r - 1);
                self.base_delay.saturating_mul(factor).min(self.max_delay)
            })
            .sum()
    }
}

/// What a read-modify-write step wants to do with the current value
#[derive(Debug, Clone)]
pub enum Update {
    Write(StateValue),
    /// Leave the key untouched
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub version: u64,
    pub attempts: u32,
    pub written: bool,
}

/// Read `key`, compute the next value with `update` and write it back at the
/// version that was read. Conflicts re-read and retry up to
/// `policy.max_retries` times; after that the losing value is returned in
/// [`StoreError::RetriesExhausted`] and nothing is applied.
pub async fn write_with_retry<S, F, E>(
    store: &S,
    key: &StateKey,
    writer: &str,
    policy: &RetryPolicy,
    mut update: F,
) -> Result<WriteOutcome, E>
where
    S: StateStore + ?Sized,
    F: FnMut(Option<&StateValue>) -> Result<Update, E>,
    E: From<StoreError>,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let current = store.get(key).await;
        let expected = current.as_ref().map_or(0, |v| v.version());

        let next = match update(current.as_ref().map(|v| &v.value))? {
            Update::Write(value) => value,
            Update::Skip => {
                return Ok(WriteOutcome {
                    version: expected,
                    attempts,
                    written: false,
                })
            }
        };

        match store.put(key, next.clone(), expected, writer).await {
            Ok(version) => {
                if attempts > 1 {
                    debug!("{} wrote {} v{} after {} attempts", writer, key, version, attempts);
                }
                return Ok(WriteOutcome {
                    version,
                    attempts,
                    written: true,
                });
            }
            Err(e) if e.is_conflict() => {
                if attempts > policy.max_retries {
                    warn!(
                        "{} gave up writing {} after {} conflicting attempts",
                        writer, key, attempts
                    );
                    return Err(StoreError::RetriesExhausted {
                        key: key.clone(),
                        attempts,
                        rejected: Box::new(next),
                    }
                    .into());
                }
                let delay = policy.delay_for(attempts);
                debug!(
                    "{} lost race on {} (attempt {}), retrying in {:?}",
                    writer, key, attempts, delay
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::patient::fixtures::at;
    use crate::domain::Patient;
    use crate::store::{InMemoryStateStore, Snapshot, StateKind, Versioned};
    use async_trait::async_trait;

    /// Store where a competing writer always lands first
    struct ContendedStore {
        inner: InMemoryStateStore,
    }

    #[async_trait]
    impl StateStore for ContendedStore {
        async fn get(&self, key: &StateKey) -> Option<Versioned> {
            self.inner.get(key).await
        }

        async fn put(
            &self,
            key: &StateKey,
            value: StateValue,
            expected_version: u64,
            writer: &str,
        ) -> Result<u64, StoreError> {
            let rival = StateValue::Patient(Patient::new("p1", Some("rival".into()), at(0)));
            self.inner.put(key, rival, expected_version, "rival").await?;
            self.inner.put(key, value, expected_version, writer).await
        }

        async fn snapshot(&self, keys: &[StateKey]) -> Snapshot {
            self.inner.snapshot(keys).await
        }

        async fn history(&self, key: &StateKey, limit: usize) -> Vec<Versioned> {
            self.inner.history(key, limit).await
        }

        async fn keys(&self, kind: StateKind) -> Vec<StateKey> {
            self.inner.keys(kind).await
        }
    }

    fn no_jitter(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = no_jitter(5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(40));
        assert_eq!(policy.max_total_wait(), Duration::from_millis(150));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy {
            jitter: true,
            ..no_jitter(3)
        };
        for _ in 0..100 {
            let d = policy.delay_for(2).as_secs_f64();
            assert!((0.015..=0.025).contains(&d), "delay {d}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_rejected_value() {
        let store = ContendedStore {
            inner: InMemoryStateStore::new(10),
        };
        let key = StateKey::Patient("p1".into());
        let ours = StateValue::Patient(Patient::new("p1", Some("ours".into()), at(0)));

        let to_write = ours.clone();
        let result: Result<WriteOutcome, StoreError> =
            write_with_retry(&store, &key, "loser", &no_jitter(3), |_| {
                Ok(Update::Write(to_write.clone()))
            })
            .await;

        match result {
            Err(StoreError::RetriesExhausted {
                attempts, rejected, ..
            }) => {
                assert_eq!(attempts, 4);
                assert_eq!(*rejected, ours);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }

        let current = store.get(&key).await.unwrap();
        assert_eq!(current.meta.writer, "rival");
        assert_eq!(
            current.value.as_patient(&key).unwrap().location.as_deref(),
            Some("rival")
        );
    }

    #[tokio::test]
    async fn test_skip_leaves_key_untouched() {
        let store = InMemoryStateStore::new(10);
        let key = StateKey::Patient("p1".into());
        let outcome: WriteOutcome =
            write_with_retry::<_, _, StoreError>(&store, &key, "t", &no_jitter(1), |_| {
                Ok(Update::Skip)
            })
            .await
            .unwrap();
        assert!(!outcome.written);
        assert_eq!(outcome.version, 0);
        assert!(store.get(&key).await.is_none());
    }
}
