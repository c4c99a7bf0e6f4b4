//! The per-session scan pipeline: discovery fan-in, validation and the
//! vulnerability stage, sequenced by the [`Orchestrator`].

pub mod collector;
pub mod context;
pub mod orchestrator;
pub mod progress;
pub mod validator;
pub mod vulnerability;

pub use collector::{
    CollectorReport, Enqueue, FanIn, ProducerReport, ProducerSink,
};
pub use context::ToolContext;
pub use orchestrator::{Orchestrator, PipelineReport};
pub use validator::{ValidationReport, Validator};
pub use vulnerability::{StageOutcome, VulnerabilityReport, VulnerabilityStage};
