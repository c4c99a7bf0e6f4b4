//! Discovery fan-in.
//!
//! Any number of producers push URLs into one bounded queue; a single
//! collector task drains it, keeps the per-session set of seen URLs, and
//! forwards each URL to validation at most once.
//!
//! Backpressure: producers always block on the bounded queue, for at most
//! `enqueue_wait`. A URL that still does not fit is dropped with a warning
//! and counted in the producer's report. Producers are therefore throttled
//! to collector speed and queue memory stays bounded by its capacity.

use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::{self, error::SendTimeoutError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use super::progress::{self, DISCOVERY_STRIDE};
use crate::events::ScanEvent;
use crate::session::{Phase, ScanId, SessionRegistry};

#[derive(Debug)]
struct Discovered {
    url: String,
    tool: &'static str,
}

/// Result of a single enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    /// The queue stayed full for the whole bounded wait.
    Dropped,
    /// The collector is gone; nothing further will be accepted.
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub tool: &'static str,
    pub sent: usize,
    pub dropped: usize,
}

/// A producer's handle onto the fan-in queue.
///
/// Each sink counts toward the queue's completion: the collector sees the
/// queue close once every sink has been finished or dropped.
#[derive(Debug)]
pub struct ProducerSink {
    tool: &'static str,
    tx: mpsc::Sender<Discovered>,
    enqueue_wait: Duration,
    sent: usize,
    dropped: usize,
}

impl ProducerSink {
    pub fn tool(&self) -> &'static str {
        self.tool
    }

    pub async fn send(&mut self, url: impl Into<String>) -> Enqueue {
        let item = Discovered {
            url: url.into(),
            tool: self.tool,
        };

        match self.tx.send_timeout(item, self.enqueue_wait).await {
            Ok(()) => {
                self.sent += 1;
                Enqueue::Accepted
            }
            Err(SendTimeoutError::Timeout(item)) => {
                self.dropped += 1;
                warn!(
                    target: "scan::pipeline",
                    tool = self.tool,
                    url = %item.url,
                    waited = ?self.enqueue_wait,
                    dropped = self.dropped,
                    "discovery queue full, dropping url"
                );
                Enqueue::Dropped
            }
            Err(SendTimeoutError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Signal completion and return what this producer pushed.
    pub fn finish(self) -> ProducerReport {
        ProducerReport {
            tool: self.tool,
            sent: self.sent,
            dropped: self.dropped,
        }
    }
}

/// Owner of the discovery queue until the collector is started.
#[derive(Debug)]
pub struct FanIn {
    tx: mpsc::Sender<Discovered>,
    rx: mpsc::Receiver<Discovered>,
    enqueue_wait: Duration,
}

impl FanIn {
    pub fn new(capacity: usize, enqueue_wait: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx,
            enqueue_wait,
        }
    }

    pub fn producer(&self, tool: &'static str) -> ProducerSink {
        ProducerSink {
            tool,
            tx: self.tx.clone(),
            enqueue_wait: self.enqueue_wait,
            sent: 0,
            dropped: 0,
        }
    }

    /// Start draining. Consumes the fan-in so that only producer sinks keep
    /// the queue open.
    pub fn spawn_collector(
        self,
        registry: Arc<SessionRegistry>,
        scan_id: ScanId,
        discovery_cap: usize,
        forward: mpsc::Sender<String>,
    ) -> JoinHandle<CollectorReport> {
        let FanIn { tx, rx, .. } = self;
        drop(tx);

        let collector = Collector {
            rx,
            forward,
            registry,
            scan_id,
            discovery_cap,
        };
        tokio::spawn(collector.run())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorReport {
    pub unique: usize,
    pub duplicates: usize,
}

struct Collector {
    rx: mpsc::Receiver<Discovered>,
    forward: mpsc::Sender<String>,
    registry: Arc<SessionRegistry>,
    scan_id: ScanId,
    discovery_cap: usize,
}

impl Collector {
    async fn run(mut self) -> CollectorReport {
        let mut seen: HashSet<String> = HashSet::new();
        let mut duplicates = 0;
        let mut validator_open = true;

        while let Some(Discovered { url, tool }) = self.rx.recv().await {
            if seen.contains(&url) {
                duplicates += 1;
                continue;
            }
            seen.insert(url.clone());
            let count = seen.len();

            if count % DISCOVERY_STRIDE == 0 {
                let progress =
                    progress::discovery_progress(count, self.discovery_cap);
                if let Err(err) = self
                    .registry
                    .update_state(
                        &self.scan_id,
                        Phase::Discovery,
                        format!("Discovery ({count} found)"),
                        progress,
                    )
                    .await
                {
                    debug!(scan = %self.scan_id, error = %err, "progress update rejected");
                }
            }

            self.registry
                .emit(
                    &self.scan_id,
                    ScanEvent::DiscoveryLive {
                        url: url.clone(),
                        count,
                        tool: tool.to_string(),
                    },
                )
                .await;

            if validator_open && self.forward.send(url).await.is_err() {
                warn!(scan = %self.scan_id, "validator stopped early; remaining urls are not validated");
                validator_open = false;
            }
        }

        if let Err(err) = self.registry.set_discovered(&self.scan_id, seen.len())
        {
            debug!(scan = %self.scan_id, error = %err, "discovered count not recorded");
        }

        CollectorReport {
            unique: seen.len(),
            duplicates,
        }
    }
}
