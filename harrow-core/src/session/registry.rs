use chrono::Utc;
use dashmap::DashMap;
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Phase, ScanId, ScanRequest, Session};
use crate::error::ScanError;
use crate::events::{Envelope, EventSink, Finding, ScanEvent};

struct SessionEntry {
    session: Session,
    cancel: CancellationToken,
    findings: Vec<Finding>,
}

/// What the creator of a session needs to drive it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: ScanId,
    pub cancel: CancellationToken,
}

/// Process-wide table of scans.
///
/// Backed by a sharded map: status reads for one session never wait on
/// writes to another, and writes to a single session are serialized by its
/// shard. Entries are kept until the process exits.
pub struct SessionRegistry {
    sessions: DashMap<ScanId, SessionEntry>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.sessions.len())
            .field("sink", &self.sink)
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sessions: DashMap::new(),
            sink,
        }
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn create(&self, request: &ScanRequest) -> SessionHandle {
        let id = ScanId::generate();
        let cancel = CancellationToken::new();
        let session = Session::new(id.clone(), request.url.trim().to_string());

        self.sessions.insert(
            id.clone(),
            SessionEntry {
                session,
                cancel: cancel.clone(),
                findings: Vec::new(),
            },
        );

        info!(scan = %id, target = %request.url, "scan session created");
        SessionHandle { id, cancel }
    }

    pub fn get(&self, id: &ScanId) -> Result<Session, ScanError> {
        self.sessions
            .get(id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| ScanError::SessionNotFound(id.clone()))
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by_key(|session| session.start_time);
        sessions
    }

    /// Signal the session's cancellation token. Cancelling a session that
    /// already reached a terminal phase is accepted and has no effect.
    pub fn cancel(&self, id: &ScanId) -> Result<(), ScanError> {
        let entry = self
            .sessions
            .get(id)
            .ok_or_else(|| ScanError::SessionNotFound(id.clone()))?;
        entry.cancel.cancel();
        info!(scan = %id, phase = ?entry.session.stage, "scan cancellation requested");
        Ok(())
    }

    pub fn cancellation(
        &self,
        id: &ScanId,
    ) -> Result<CancellationToken, ScanError> {
        self.sessions
            .get(id)
            .map(|entry| entry.cancel.clone())
            .ok_or_else(|| ScanError::SessionNotFound(id.clone()))
    }

    /// Cancel every session that is still running.
    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            if !entry.session.is_terminal() {
                entry.cancel.cancel();
            }
        }
    }

    /// Move a session to `phase` with a new label and progress, then
    /// broadcast the resulting snapshot.
    ///
    /// Progress never decreases: the stored value is `max(current, new)`,
    /// capped at 100. Terminal phases force 100 and settle the status.
    pub async fn update_state(
        &self,
        id: &ScanId,
        phase: Phase,
        label: impl Into<String>,
        progress: u8,
    ) -> Result<Session, ScanError> {
        let snapshot = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| ScanError::SessionNotFound(id.clone()))?;
            let session = &mut entry.session;

            if !session.stage.can_transition_to(phase) {
                return Err(ScanError::InvalidTransition {
                    id: id.clone(),
                    from: session.stage,
                    to: phase,
                });
            }

            session.stage = phase;
            session.phase = label.into();
            session.progress = session.progress.max(progress.min(100));

            if let Some(status) = phase.terminal_status() {
                session.status = status;
                session.progress = 100;
                session.end_time = Some(Utc::now());
            }

            session.clone()
        };

        debug!(
            scan = %id,
            phase = %snapshot.phase,
            progress = snapshot.progress,
            "scan state updated"
        );
        self.sink
            .send(id, Envelope::State(snapshot.clone()))
            .await;
        Ok(snapshot)
    }

    pub async fn emit(&self, id: &ScanId, event: ScanEvent) {
        self.sink.send(id, Envelope::Event(event)).await;
    }

    pub fn record_finding(
        &self,
        id: &ScanId,
        finding: Finding,
    ) -> Result<usize, ScanError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| ScanError::SessionNotFound(id.clone()))?;
        entry.findings.push(finding);
        entry.session.findings = entry.findings.len();
        Ok(entry.session.findings)
    }

    pub fn findings(&self, id: &ScanId) -> Result<Vec<Finding>, ScanError> {
        self.sessions
            .get(id)
            .map(|entry| entry.findings.clone())
            .ok_or_else(|| ScanError::SessionNotFound(id.clone()))
    }

    pub fn set_discovered(
        &self,
        id: &ScanId,
        discovered: usize,
    ) -> Result<(), ScanError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| ScanError::SessionNotFound(id.clone()))?;
        entry.session.discovered = discovered;
        Ok(())
    }

    pub fn set_targets(
        &self,
        id: &ScanId,
        targets: usize,
    ) -> Result<(), ScanError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| ScanError::SessionNotFound(id.clone()))?;
        entry.session.targets = targets;
        Ok(())
    }
}
