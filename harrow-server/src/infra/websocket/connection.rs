use harrow_core::{Envelope, ScanId};
use std::{fmt, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("connection writer is gone")]
    Closed,
    #[error("connection writer did not accept a frame within {0:?}")]
    Stalled(Duration),
}

/// Producer side of one attached observer.
///
/// Envelopes are queued for the connection's writer task, which is the only
/// thing that touches the socket.
pub struct Connection {
    /// Unique connection ID
    pub id: Uuid,
    /// Session this connection observes
    pub scan_id: ScanId,
    sender: mpsc::Sender<Envelope>,
    closed: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("scan_id", &self.scan_id)
            .field("channel_closed", &self.sender.is_closed())
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl Connection {
    pub fn new(scan_id: ScanId, sender: mpsc::Sender<Envelope>) -> Self {
        Self {
            id: Uuid::now_v7(),
            scan_id,
            sender,
            closed: CancellationToken::new(),
        }
    }

    /// Queue `envelope`, waiting at most `wait` for buffer space.
    pub async fn push(
        &self,
        envelope: Envelope,
        wait: Duration,
    ) -> Result<(), PushError> {
        if self.closed.is_cancelled() {
            return Err(PushError::Closed);
        }
        self.sender
            .send_timeout(envelope, wait)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => PushError::Stalled(wait),
                SendTimeoutError::Closed(_) => PushError::Closed,
            })
    }

    /// Ask the socket tasks behind this connection to shut down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }

    /// Fires once the connection is closed from either side.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}
