pub mod registry;

pub use registry::{SessionHandle, SessionRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

use crate::error::ScanError;

/// Opaque scan identity, unique for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    pub fn generate() -> Self {
        Self(format!("scan_{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ScanId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ScanId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Body of `POST /api/scans`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub url: String,
    /// Wordlist handed to the fuzzer untouched; resolution is the fuzzer's
    /// concern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wordlist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_type: Option<String>,
    /// Overall session deadline in seconds. Zero or absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl ScanRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parse the target and reject anything that is not an absolute
    /// http(s) URL with a host.
    pub fn validate(&self) -> Result<Url, ScanError> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err(ScanError::InvalidRequest("url is required".into()));
        }

        let parsed = Url::parse(raw).map_err(|err| {
            ScanError::InvalidRequest(format!("url `{raw}` is invalid: {err}"))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ScanError::InvalidRequest(format!(
                "url scheme `{}` is not supported",
                parsed.scheme()
            )));
        }

        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(ScanError::InvalidRequest(format!(
                "url `{raw}` has no host"
            )));
        }

        Ok(parsed)
    }

    pub fn scan_type(&self) -> &str {
        self.scan_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("quick")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Finished,
    Cancelled,
}

/// Pipeline phase. The human-readable label on [`Session::phase`] may be
/// more specific ("Discovery (40 found)"); this is the typed stage behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Discovery,
    DiscoveryComplete,
    VulnerabilityScan,
    NoTargetsFound,
    Finished,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finished | Phase::Cancelled)
    }

    /// Whether a session in `self` may move to `next`. Staying in the same
    /// non-terminal phase is allowed so progress can be refreshed.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;

        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (_, Cancelled)
                | (Init, Discovery)
                | (Discovery, DiscoveryComplete)
                | (DiscoveryComplete, VulnerabilityScan)
                | (DiscoveryComplete, NoTargetsFound)
                | (VulnerabilityScan, Finished)
                | (NoTargetsFound, Finished)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Init => "Init",
            Phase::Discovery => "Discovery",
            Phase::DiscoveryComplete => "Discovery Complete",
            Phase::VulnerabilityScan => "Vulnerability Scan",
            Phase::NoTargetsFound => "No Targets Found",
            Phase::Finished => "Finished",
            Phase::Cancelled => "Cancelled",
        }
    }

    fn terminal_status(self) -> Option<ScanStatus> {
        match self {
            Phase::Finished => Some(ScanStatus::Finished),
            Phase::Cancelled => Some(ScanStatus::Cancelled),
            _ => None,
        }
    }
}

/// Snapshot of one scan as seen by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: ScanId,
    pub target: String,
    pub status: ScanStatus,
    pub phase: String,
    pub stage: Phase,
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discovered: usize,
    #[serde(default)]
    pub targets: usize,
    #[serde(default)]
    pub findings: usize,
}

impl Session {
    fn new(id: ScanId, target: String) -> Self {
        Self {
            id,
            target,
            status: ScanStatus::Running,
            phase: Phase::Init.label().to_string(),
            stage: Phase::Init,
            progress: 0,
            start_time: Utc::now(),
            end_time: None,
            discovered: 0,
            targets: 0,
            findings: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// A URL that passed validation, with the status code the probe observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    pub status: u16,
}
