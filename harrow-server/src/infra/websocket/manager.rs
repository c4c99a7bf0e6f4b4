use async_trait::async_trait;
use dashmap::DashMap;
use harrow_core::{Envelope, EventSink, ScanId};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::connection::Connection;

/// Session to connection bindings.
///
/// At most one connection observes a session. Binding a new one closes the
/// one it replaces; a connection that cannot keep up is closed and unbound
/// while the session carries on.
#[derive(Clone)]
pub struct ConnectionManager {
    bindings: Arc<DashMap<ScanId, Arc<Connection>>>,
    write_wait: Duration,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("binding_count", &self.bindings.len())
            .field("write_wait", &self.write_wait)
            .finish()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ConnectionManager {
    pub fn new(write_wait: Duration) -> Self {
        Self {
            bindings: Arc::new(DashMap::new()),
            write_wait,
        }
    }

    /// Attach `connection` to its session, closing whatever was bound before.
    pub fn bind(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let scan_id = connection.scan_id.clone();
        let conn_id = connection.id;
        let previous = self.bindings.insert(scan_id.clone(), connection);

        if let Some(previous) = &previous {
            previous.close();
            info!(
                target: "ws::push",
                scan = %scan_id,
                replaced = %previous.id,
                conn = %conn_id,
                "observer replaced"
            );
        } else {
            info!(target: "ws::push", scan = %scan_id, conn = %conn_id, "observer attached");
        }
        previous
    }

    /// Remove the binding for `scan_id` only if it still points at `conn_id`.
    /// A connection that was already replaced leaves its successor alone.
    pub fn unbind(&self, scan_id: &ScanId, conn_id: Uuid) -> bool {
        let removed = self
            .bindings
            .remove_if(scan_id, |_, bound| bound.id == conn_id)
            .is_some();
        if removed {
            debug!(target: "ws::push", scan = %scan_id, conn = %conn_id, "observer detached");
        }
        removed
    }

    pub fn connection(&self, scan_id: &ScanId) -> Option<Arc<Connection>> {
        self.bindings
            .get(scan_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Close every connection, used on shutdown.
    pub fn close_all(&self) {
        for entry in self.bindings.iter() {
            entry.value().close();
        }
        self.bindings.clear();
    }
}

#[async_trait]
impl EventSink for ConnectionManager {
    async fn send(&self, id: &ScanId, envelope: Envelope) {
        // Clone out of the shard before awaiting.
        let Some(connection) = self.connection(id) else {
            trace!(target: "ws::push", scan = %id, "no observer bound; envelope dropped");
            return;
        };

        if let Err(err) = connection.push(envelope, self.write_wait).await {
            warn!(
                target: "ws::push",
                scan = %id,
                conn = %connection.id,
                error = %err,
                "tearing down observer"
            );
            connection.close();
            self.unbind(id, connection.id);
        }
    }

    fn is_bound(&self, id: &ScanId) -> bool {
        self.bindings
            .get(id)
            .is_some_and(|entry| !entry.value().is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harrow_core::ScanEvent;
    use tokio::sync::mpsc;

    fn envelope(count: usize) -> Envelope {
        Envelope::Event(ScanEvent::VulnerabilityScanComplete { count })
    }

    fn connection(
        scan: &str,
        buffer: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Arc::new(Connection::new(ScanId::from(scan), tx)), rx)
    }

    #[tokio::test]
    async fn unbound_sends_are_dropped_and_later_binding_sees_only_new_frames() {
        let manager = ConnectionManager::new(Duration::from_millis(50));
        let id = ScanId::from("scan_a");

        manager.send(&id, envelope(1)).await;
        assert!(!manager.is_bound(&id));

        let (conn, mut rx) = connection("scan_a", 8);
        manager.bind(conn);
        manager.send(&id, envelope(2)).await;

        assert_eq!(rx.recv().await, Some(envelope(2)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn binding_replaces_and_closes_previous() {
        let manager = ConnectionManager::default();
        let id = ScanId::from("scan_a");

        let (first, mut first_rx) = connection("scan_a", 8);
        let first_closed = first.closed_token();
        manager.bind(Arc::clone(&first));

        let (second, mut second_rx) = connection("scan_a", 8);
        let replaced = manager.bind(Arc::clone(&second));
        assert_eq!(replaced.map(|c| c.id), Some(first.id));
        assert!(first_closed.is_cancelled());

        manager.send(&id, envelope(7)).await;
        assert_eq!(second_rx.recv().await, Some(envelope(7)));
        assert!(first_rx.try_recv().is_err());

        // The replaced connection's cleanup must not unbind its successor.
        assert!(!manager.unbind(&id, first.id));
        assert!(manager.is_bound(&id));
        assert!(manager.unbind(&id, second.id));
        assert!(!manager.is_bound(&id));
    }

    #[tokio::test]
    async fn stalled_connection_is_unbound() {
        let manager = ConnectionManager::new(Duration::from_millis(10));
        let id = ScanId::from("scan_a");
        let (conn, _rx) = connection("scan_a", 1);
        let closed = conn.closed_token();
        manager.bind(conn);

        manager.send(&id, envelope(1)).await;
        assert!(manager.is_bound(&id));

        manager.send(&id, envelope(2)).await;
        assert!(!manager.is_bound(&id));
        assert!(closed.is_cancelled());
        assert_eq!(manager.binding_count(), 0);
    }
}
