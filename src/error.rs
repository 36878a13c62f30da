use thiserror::Error;

use crate::agents::AgentKind;
use crate::store::{StateKey, StateValue};

/// Main error type for the coordination core
#[derive(Error, Debug)]
pub enum CareError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Component errors
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("MCDA error: {0}")]
    Mcda(#[from] McdaError),

    // Stimulus errors
    #[error("Invalid stimulus: {0}")]
    InvalidStimulus(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for CareError
pub type Result<T> = std::result::Result<T, CareError>;

/// Errors raised by the versioned state store
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Version conflict on {key}: expected v{expected}, found v{actual}")]
    Conflict {
        key: StateKey,
        expected: u64,
        actual: u64,
    },

    #[error("Write to {key} rejected after {attempts} attempts")]
    RetriesExhausted {
        key: StateKey,
        attempts: u32,
        /// The value the losing writer tried to store; never applied.
        rejected: Box<StateValue>,
    },

    #[error("Unexpected value kind at {key}: wanted {expected}")]
    TypeMismatch { key: StateKey, expected: &'static str },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Failures of a single agent execution for one stimulus
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("{agent} could not observe: {reason}")]
    ObservationFailure { agent: AgentKind, reason: String },

    #[error("{agent} could not decide: {reason}")]
    DecisionFailure { agent: AgentKind, reason: String },

    #[error("{agent} lost the write race: {source}")]
    StoreConflict {
        agent: AgentKind,
        #[source]
        source: StoreError,
    },

    #[error("{agent} output could not be serialized: {reason}")]
    Serialization { agent: AgentKind, reason: String },
}

impl AgentError {
    pub fn agent(&self) -> AgentKind {
        match self {
            AgentError::ObservationFailure { agent, .. }
            | AgentError::DecisionFailure { agent, .. }
            | AgentError::StoreConflict { agent, .. }
            | AgentError::Serialization { agent, .. } => *agent,
        }
    }

    pub fn observation(agent: AgentKind, reason: impl Into<String>) -> Self {
        AgentError::ObservationFailure {
            agent,
            reason: reason.into(),
        }
    }

    pub fn decision(agent: AgentKind, reason: impl Into<String>) -> Self {
        AgentError::DecisionFailure {
            agent,
            reason: reason.into(),
        }
    }
}

/// Event bus delivery errors
#[derive(Error, Debug, Clone)]
pub enum BusError {
    #[error("Handler {subscription} timed out on {topic} after {elapsed_ms}ms")]
    HandlerTimeout {
        subscription: u64,
        topic: String,
        elapsed_ms: u64,
    },

    #[error("Handler {subscription} failed on {topic}: {reason}")]
    HandlerFailed {
        subscription: u64,
        topic: String,
        reason: String,
    },

    #[error("Invalid topic pattern: {0}")]
    InvalidPattern(String),
}

/// Errors from the multi-criteria scoring engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McdaError {
    #[error("Weights must each be in [0,1] and sum to 1 (sum = {sum})")]
    InvalidWeights { sum: f64 },

    #[error("Criterion {criterion} score {value} is outside [0,1]")]
    ScoreOutOfRange { criterion: &'static str, value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_reports_its_agent() {
        let err = AgentError::observation(AgentKind::Flow, "risk missing");
        assert_eq!(err.agent(), AgentKind::Flow);
        assert!(err.to_string().contains("risk missing"));
    }

    #[test]
    fn test_store_error_conflict_detection() {
        let conflict = StoreError::Conflict {
            key: StateKey::Risk("p1".into()),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_conflict());
        assert_eq!(
            conflict.to_string(),
            "Version conflict on risk:p1: expected v1, found v2"
        );
    }
}
