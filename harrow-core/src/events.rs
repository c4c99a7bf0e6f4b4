//! Externally observable units of a scan.
//!
//! Observers never see internal structures: everything is wrapped in an
//! [`Envelope`] whose JSON form is `{"type": "state" | "event", "data": ...}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::{Phase, ScanId, Session};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    State(Session),
    Event(ScanEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    /// A URL seen for the first time in this session. `count` is the running
    /// number of unique URLs and strictly increases.
    DiscoveryLive {
        url: String,
        count: usize,
        tool: String,
    },
    /// A unique URL that passed validation.
    Discovery { url: String, status: u16 },
    Vulnerability(Finding),
    PhaseChanged { from: Phase, to: Phase },
    /// Free-form progress line from a collaborator's side channel.
    ToolProgress { tool: String, message: String },
    VulnerabilityScanComplete { count: usize },
    ScanComplete {
        duration: String,
        targets: usize,
        findings: usize,
    },
}

/// One reported vulnerability. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "count")]
    pub sequence: usize,
    pub severity: String,
    #[serde(rename = "name")]
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "url")]
    pub matched_at: String,
}

/// Destination for envelopes produced by the pipeline.
///
/// Delivery is best effort: sending to a session with nothing attached is a
/// no-op, and a failing observer must never stall or fail the scan.
#[async_trait]
pub trait EventSink: Send + Sync + fmt::Debug {
    async fn send(&self, id: &ScanId, envelope: Envelope);

    /// Whether an observer is currently attached to `id`.
    fn is_bound(&self, id: &ScanId) -> bool;
}

/// Sink that discards everything, for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn send(&self, _id: &ScanId, _envelope: Envelope) {}

    fn is_bound(&self, _id: &ScanId) -> bool {
        false
    }
}
