use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BusError, CareError, Result};

/// Canonical topic names
pub mod topics {
    pub const PATIENT_ARRIVAL: &str = "patient.arrival";
    pub const VITALS_UPDATE: &str = "vitals.update";
    pub const BED_CHANGE: &str = "bed.change";
    pub const STAFF_SHIFT: &str = "staff.shift";

    pub const RISK_CALCULATED: &str = "risk_monitor.risk_calculated";
    pub const CAPACITY_UPDATED: &str = "capacity_intelligence.capacity_updated";
    pub const RECOMMENDATION_READY: &str = "flow_orchestrator.recommendation_ready";
    pub const DECISION_MADE: &str = "escalation_decision.decision_made";

    /// Topics the orchestrator turns into pipeline stimuli
    pub const STIMULI: [&str; 4] = [PATIENT_ARRIVAL, VITALS_UPDATE, BED_CHANGE, STAFF_SHIFT];
}

fn default_source() -> String {
    "external".to_string()
}

/// Bus message. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
    pub event_type: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        patient_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: source.into(),
            patient_id,
            payload,
        }
    }

    /// Build an event whose payload is a serialized record
    pub fn with_record<T: Serialize>(
        event_type: &str,
        source: &str,
        patient_id: Option<String>,
        record: &T,
    ) -> Result<Self> {
        Ok(Self::new(
            event_type,
            source,
            patient_id,
            serde_json::to_value(record)?,
        ))
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn namespace(&self) -> &str {
        self.event_type
            .split_once('.')
            .map(|(ns, _)| ns)
            .unwrap_or(&self.event_type)
    }

    /// Deserialize the payload into a typed record
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            CareError::InvalidStimulus(format!("{} payload: {e}", self.event_type))
        })
    }
}

/// Subscription filter over event types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// `*`
    All,
    /// `risk_monitor.*`
    Namespace(String),
    /// `vitals.update`
    Exact(String),
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> std::result::Result<Self, BusError> {
        let pattern = pattern.trim();
        if pattern == "*" {
            return Ok(TopicPattern::All);
        }
        if let Some(ns) = pattern.strip_suffix(".*") {
            if ns.is_empty() || ns.contains('*') {
                return Err(BusError::InvalidPattern(pattern.to_string()));
            }
            return Ok(TopicPattern::Namespace(ns.to_string()));
        }
        if pattern.is_empty() || pattern.contains('*') {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
        Ok(TopicPattern::Exact(pattern.to_string()))
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::All => true,
            TopicPattern::Exact(t) => t == topic,
            TopicPattern::Namespace(ns) => topic
                .strip_prefix(ns.as_str())
                .is_some_and(|rest| rest.starts_with('.')),
        }
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicPattern::All => write!(f, "*"),
            TopicPattern::Namespace(ns) => write!(f, "{ns}.*"),
            TopicPattern::Exact(t) => write!(f, "{t}"),
        }
    }
}
