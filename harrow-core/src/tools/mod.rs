//! Contracts with the external collaborators and their subprocess adapters.
//!
//! The pipeline only talks to these traits. The adapters shell out to
//! `katana`, `ffuf`, `httpx` and `nuclei`; tests plug in scripted fakes.

pub mod ffuf;
pub mod httpx;
pub mod katana;
pub mod nuclei;
pub mod process;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::{fmt, sync::Arc, time::Duration};

use crate::config::ToolConfig;
use crate::error::ToolError;
use crate::pipeline::{ProducerSink, ToolContext, context::DEFAULT_CEILING};
use crate::session::{ScanRequest, Target};

/// A source of candidate URLs for the discovery phase.
#[async_trait]
pub trait DiscoveryProducer: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Wall-clock ceiling for one run, clipped to the session deadline.
    fn ceiling(&self) -> Duration {
        DEFAULT_CEILING
    }

    /// Push every URL found for `request` into `sink`. Returning early with
    /// an error keeps whatever was already pushed.
    async fn run(
        &self,
        ctx: &ToolContext,
        request: &ScanRequest,
        sink: &mut ProducerSink,
    ) -> Result<(), ToolError>;
}

/// Lightweight liveness probe used by validation.
#[async_trait]
pub trait Prober: Send + Sync + fmt::Debug {
    fn ceiling(&self) -> Duration {
        DEFAULT_CEILING
    }

    /// Observed status code for `url`, or `None` when the probe saw nothing.
    async fn probe(
        &self,
        ctx: &ToolContext,
        url: &str,
    ) -> Result<Option<u16>, ToolError>;
}

/// A URL is live when the probe saw a status that is present, non-zero and
/// not 404.
pub fn is_live(status: Option<u16>) -> bool {
    matches!(status, Some(code) if code != 0 && code != 404)
}

/// Decoded vulnerability record, before the session assigns a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingRecord {
    pub severity: String,
    pub template_id: String,
    pub name: Option<String>,
    pub matched_at: String,
}

/// Output of one vulnerability tool invocation.
///
/// Dropping `records` must terminate the underlying process; the stage relies
/// on that for prompt cancellation.
pub struct VulnerabilityRun {
    pub records: BoxStream<'static, Result<String, ToolError>>,
    /// Optional side channel of human-readable progress lines.
    pub stats: Option<BoxStream<'static, String>>,
}

impl fmt::Debug for VulnerabilityRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VulnerabilityRun")
            .field("has_stats", &self.stats.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait VulnerabilityTool: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn ceiling(&self) -> Duration {
        DEFAULT_CEILING
    }

    /// Start one scan over `targets`. Invoked at most once per session.
    async fn launch(
        &self,
        ctx: &ToolContext,
        targets: &[Target],
    ) -> Result<VulnerabilityRun, ToolError>;

    /// Decode one output line. `Ok(None)` means the line carries no finding
    /// (blank or informational); `Err` means it is malformed.
    fn decode(&self, line: &str) -> Result<Option<FindingRecord>, ToolError>;

    /// Completion percentage reported on a stats line, if any.
    fn stats_percent(&self, _line: &str) -> Option<f64> {
        None
    }
}

/// The set of collaborators one pipeline run uses.
#[derive(Debug, Clone)]
pub struct Toolkit {
    pub producers: Vec<Arc<dyn DiscoveryProducer>>,
    pub prober: Arc<dyn Prober>,
    pub vulnerability: Arc<dyn VulnerabilityTool>,
}

impl Toolkit {
    /// Subprocess-backed toolkit: katana and ffuf for discovery, httpx for
    /// validation, nuclei for vulnerabilities.
    pub fn external(config: &ToolConfig) -> Self {
        Self {
            producers: vec![
                Arc::new(katana::Katana::new(config)),
                Arc::new(ffuf::Ffuf::new(config)),
            ],
            prober: Arc::new(httpx::Httpx::new(config)),
            vulnerability: Arc::new(nuclei::Nuclei::new(config)),
        }
    }
}
