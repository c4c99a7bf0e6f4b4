//! # Harrow Core
//!
//! Pipeline engine behind the Harrow scan server.
//!
//! A scan moves through a fixed set of phases:
//!
//! - **Discovery**: independent producers (crawler, fuzzer) feed a bounded
//!   fan-in queue that a single collector task deduplicates
//! - **Validation**: each unique URL is probed once; live URLs become targets
//! - **Vulnerability**: one probing tool streams findings over the targets
//!
//! Sessions live in the [`session::SessionRegistry`], concurrency across
//! sessions is capped by the [`admission::AdmissionController`], and every
//! state change or event leaves the engine through an [`events::EventSink`].
//! External tools sit behind the traits in [`tools`] so the pipeline can be
//! driven by subprocesses in production and by fakes in tests.

pub mod admission;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod service;
pub mod session;
pub mod tools;

pub use admission::{AdmissionController, AdmissionPermit};
pub use config::{PipelineConfig, ToolConfig};
pub use error::{ScanError, ToolError};
pub use events::{Envelope, EventSink, Finding, ScanEvent};
pub use pipeline::{Orchestrator, PipelineReport, ToolContext};
pub use service::ScanService;
pub use session::{
    Phase, ScanId, ScanRequest, ScanStatus, Session, SessionRegistry, Target,
};
pub use tools::Toolkit;
