use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::session::ScanId;

/// Ceiling applied when neither the tool nor the session sets one.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// Cancellation and time budget handed to every collaborator invocation.
///
/// Each tool receives a child of the session token, so cancelling the
/// session reaches every subprocess, while a tool's own ceiling never
/// extends past the session deadline.
#[derive(Debug, Clone)]
pub struct ToolContext {
    scan_id: ScanId,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    ceiling: Duration,
}

impl ToolContext {
    pub fn new(
        scan_id: ScanId,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            scan_id,
            cancel,
            deadline,
            ceiling: DEFAULT_CEILING,
        }
    }

    /// Context for one tool invocation bounded by `ceiling`.
    pub fn with_ceiling(&self, ceiling: Duration) -> Self {
        Self {
            scan_id: self.scan_id.clone(),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            ceiling,
        }
    }

    pub fn scan_id(&self) -> &ScanId {
        &self.scan_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn session_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn deadline_elapsed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Time left for this invocation: the tool ceiling clipped to whatever
    /// remains of the session deadline.
    pub fn ceiling(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .ceiling
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.ceiling,
        }
    }

    /// Absolute instant at which this invocation must stop.
    pub fn expires_at(&self) -> Instant {
        Instant::now() + self.ceiling()
    }
}
