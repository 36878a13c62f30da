//! Pipeline orchestration
//!
//! Turns bus stimuli into State Store updates and agent pipelines. Guarantees
//! each agent runs at most once per (stimulus, subject).

pub mod ingest;
pub mod orchestrator;
pub mod pipeline;

pub use ingest::{apply_stimulus, seed_census};
pub use orchestrator::{AgentSet, Orchestrator, StimulusOutcome};
pub use pipeline::{
    PipelineKey, PipelineReport, PipelineStage, PipelineStatus, PipelineTracker, StageRecord,
};
