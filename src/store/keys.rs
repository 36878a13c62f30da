use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{
    CapacityAssessment, EscalationDecision, FlowRecommendation, Patient, RiskAssessment,
    UnitCensus,
};
use crate::error::StoreError;

/// Entity kind a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Patient,
    Census,
    Risk,
    Capacity,
    Flow,
    Decision,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Patient => "patient",
            StateKind::Census => "census",
            StateKind::Risk => "risk",
            StateKind::Capacity => "capacity",
            StateKind::Flow => "flow",
            StateKind::Decision => "decision",
        }
    }
}

/// Namespaced state key, rendered and serialized as `kind:id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StateKey {
    Patient(String),
    Census(String),
    Risk(String),
    Capacity(String),
    Flow(String),
    Decision(String),
}

impl StateKey {
    pub fn kind(&self) -> StateKind {
        match self {
            StateKey::Patient(_) => StateKind::Patient,
            StateKey::Census(_) => StateKind::Census,
            StateKey::Risk(_) => StateKind::Risk,
            StateKey::Capacity(_) => StateKind::Capacity,
            StateKey::Flow(_) => StateKind::Flow,
            StateKey::Decision(_) => StateKind::Decision,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            StateKey::Patient(id)
            | StateKey::Census(id)
            | StateKey::Risk(id)
            | StateKey::Capacity(id)
            | StateKey::Flow(id)
            | StateKey::Decision(id) => id,
        }
    }

    /// Parse `kind:id`
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, id) = s.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        let id = id.to_string();
        Some(match kind {
            "patient" => StateKey::Patient(id),
            "census" => StateKey::Census(id),
            "risk" => StateKey::Risk(id),
            "capacity" => StateKey::Capacity(id),
            "flow" => StateKey::Flow(id),
            "decision" => StateKey::Decision(id),
            _ => return None,
        })
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.id())
    }
}

impl std::str::FromStr for StateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid state key {s:?}, expected kind:id"))
    }
}

impl TryFrom<String> for StateKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<StateKey> for String {
    fn from(key: StateKey) -> Self {
        key.to_string()
    }
}

/// Typed value stored under a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    Patient(Patient),
    Census(UnitCensus),
    Risk(RiskAssessment),
    Capacity(CapacityAssessment),
    Flow(FlowRecommendation),
    Decision(EscalationDecision),
}

impl StateValue {
    pub fn kind(&self) -> StateKind {
        match self {
            StateValue::Patient(_) => StateKind::Patient,
            StateValue::Census(_) => StateKind::Census,
            StateValue::Risk(_) => StateKind::Risk,
            StateValue::Capacity(_) => StateKind::Capacity,
            StateValue::Flow(_) => StateKind::Flow,
            StateValue::Decision(_) => StateKind::Decision,
        }
    }

    /// When an agent produced this record; `None` for ingested state
    pub fn produced_at(&self) -> Option<DateTime<Utc>> {
        match self {
            StateValue::Patient(_) | StateValue::Census(_) => None,
            StateValue::Risk(v) => Some(v.produced_at),
            StateValue::Capacity(v) => Some(v.produced_at),
            StateValue::Flow(v) => Some(v.produced_at),
            StateValue::Decision(v) => Some(v.timestamp),
        }
    }

    /// The inner record as JSON, without the kind tag
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            StateValue::Patient(v) => serde_json::to_value(v),
            StateValue::Census(v) => serde_json::to_value(v),
            StateValue::Risk(v) => serde_json::to_value(v),
            StateValue::Capacity(v) => serde_json::to_value(v),
            StateValue::Flow(v) => serde_json::to_value(v),
            StateValue::Decision(v) => serde_json::to_value(v),
        }
    }
}

/// Typed accessors used when reading snapshots
macro_rules! accessor {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        impl StateValue {
            pub fn $fn_name(&self, key: &StateKey) -> Result<&$ty, StoreError> {
                match self {
                    StateValue::$variant(v) => Ok(v),
                    _ => Err(StoreError::TypeMismatch {
                        key: key.clone(),
                        expected: stringify!($variant),
                    }),
                }
            }
        }
    };
}

accessor!(as_patient, Patient, Patient);
accessor!(as_census, Census, UnitCensus);
accessor!(as_risk, Risk, RiskAssessment);
accessor!(as_capacity, Capacity, CapacityAssessment);
accessor!(as_flow, Flow, FlowRecommendation);
accessor!(as_decision, Decision, EscalationDecision);
