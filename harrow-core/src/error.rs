use std::time::Duration;

use thiserror::Error;

use crate::session::{Phase, ScanId};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("scan not found: {0}")]
    SessionNotFound(ScanId),

    #[error("invalid scan request: {0}")]
    InvalidRequest(String),

    #[error("scan {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition { id: ScanId, from: Phase, to: Phase },
}

/// Failure of an external collaborator. Never fatal to a scan: callers log
/// it and continue with whatever partial output was produced.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited unsuccessfully (code {code:?}): {stderr}")]
    Exit {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} exceeded its {limit:?} ceiling")]
    TimedOut { tool: &'static str, limit: Duration },

    #[error("{tool} cancelled")]
    Cancelled { tool: &'static str },

    #[error("{tool} produced undecodable output: {reason}")]
    Decode { tool: &'static str, reason: String },

    #[error("{tool} i/o failure: {source}")]
    Io {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn tool(&self) -> &'static str {
        match self {
            ToolError::Spawn { tool, .. }
            | ToolError::Exit { tool, .. }
            | ToolError::TimedOut { tool, .. }
            | ToolError::Cancelled { tool }
            | ToolError::Decode { tool, .. }
            | ToolError::Io { tool, .. } => tool,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolError::Cancelled { .. })
    }
}
