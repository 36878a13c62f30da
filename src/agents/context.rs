//! What an agent sees during one pipeline run

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::bus::EventBus;
use crate::error::AgentError;
use crate::store::{RetryPolicy, Snapshot, StateKey, StateKind, StateStore};

use super::AgentKind;

/// Read-only view handed to `observe`. Cheap to clone; the store is shared.
#[derive(Clone)]
pub struct AgentContext {
    pub stimulus_id: String,
    pub patient_id: Option<String>,
    pub unit_id: Option<String>,
    /// Timestamp of the triggering stimulus. Agents stamp their output with it.
    pub now: DateTime<Utc>,
    store: Arc<dyn StateStore>,
}

impl AgentContext {
    pub fn for_patient(
        stimulus_id: impl Into<String>,
        patient_id: impl Into<String>,
        now: DateTime<Utc>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            stimulus_id: stimulus_id.into(),
            patient_id: Some(patient_id.into()),
            unit_id: None,
            now,
            store,
        }
    }

    pub fn for_unit(
        stimulus_id: impl Into<String>,
        unit_id: impl Into<String>,
        now: DateTime<Utc>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            stimulus_id: stimulus_id.into(),
            patient_id: None,
            unit_id: Some(unit_id.into()),
            now,
            store,
        }
    }

    /// Patient id, or an observation failure for agents that need one
    pub fn require_patient(&self, agent: AgentKind) -> Result<&str, AgentError> {
        self.patient_id
            .as_deref()
            .ok_or_else(|| AgentError::observation(agent, "stimulus has no patient"))
    }

    /// Fail unless `key` was produced for this context's stimulus
    pub fn require_current(
        &self,
        agent: AgentKind,
        key: &StateKey,
        produced_for: &str,
    ) -> Result<(), AgentError> {
        if produced_for == self.stimulus_id {
            return Ok(());
        }
        Err(AgentError::observation(
            agent,
            format!(
                "{key} belongs to stimulus {produced_for:?}, not {}",
                self.stimulus_id
            ),
        ))
    }

    pub async fn snapshot(&self, keys: &[StateKey]) -> Snapshot {
        self.store.snapshot(keys).await
    }

    pub async fn keys(&self, kind: StateKind) -> Vec<StateKey> {
        self.store.keys(kind).await
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("stimulus_id", &self.stimulus_id)
            .field("patient_id", &self.patient_id)
            .field("unit_id", &self.unit_id)
            .field("now", &self.now)
            .finish()
    }
}

/// Shared write side used by `execute`
#[derive(Clone)]
pub struct AgentRuntime {
    pub bus: Arc<EventBus>,
    pub store: Arc<dyn StateStore>,
    pub retry: RetryPolicy,
}

impl AgentRuntime {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn StateStore>, retry: RetryPolicy) -> Self {
        Self { bus, store, retry }
    }
}
