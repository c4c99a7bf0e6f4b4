//! Liveness validation of discovered URLs.

use futures::StreamExt;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use super::ToolContext;
use crate::events::ScanEvent;
use crate::session::{ScanId, SessionRegistry, Target};
use crate::tools::{Prober, is_live};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Live URLs, in discovery order.
    pub targets: Vec<Target>,
    pub probed: usize,
    pub rejected: usize,
}

/// Probes every forwarded URL exactly once.
///
/// Up to `concurrency` probes run at a time, but results are consumed in
/// the order the collector forwarded them, so the target list keeps
/// discovery order.
#[derive(Debug)]
pub struct Validator {
    prober: Arc<dyn Prober>,
    registry: Arc<SessionRegistry>,
    scan_id: ScanId,
    ctx: ToolContext,
    concurrency: usize,
}

impl Validator {
    pub fn new(
        prober: Arc<dyn Prober>,
        registry: Arc<SessionRegistry>,
        ctx: ToolContext,
        concurrency: usize,
    ) -> Self {
        Self {
            prober,
            registry,
            scan_id: ctx.scan_id().clone(),
            ctx,
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn(self, rx: mpsc::Receiver<String>) -> JoinHandle<ValidationReport> {
        tokio::spawn(self.run(rx))
    }

    async fn run(self, rx: mpsc::Receiver<String>) -> ValidationReport {
        let Validator {
            prober,
            registry,
            scan_id,
            ctx,
            concurrency,
        } = self;

        let mut probes = ReceiverStream::new(rx)
            .map(|url| {
                let prober = Arc::clone(&prober);
                let ctx = ctx.with_ceiling(prober.ceiling());
                async move {
                    let status = match prober.probe(&ctx, &url).await {
                        Ok(status) => status,
                        Err(err) => {
                            debug!(scan = %ctx.scan_id(), url = %url, error = %err, "probe failed");
                            None
                        }
                    };
                    (url, status)
                }
            })
            .buffered(concurrency);

        let mut report = ValidationReport::default();
        while let Some((url, status)) = probes.next().await {
            report.probed += 1;
            let Some(code) = status.filter(|_| is_live(status)) else {
                report.rejected += 1;
                continue;
            };

            report.targets.push(Target {
                url: url.clone(),
                status: code,
            });
            registry
                .emit(&scan_id, ScanEvent::Discovery { url, status: code })
                .await;
        }

        if let Err(err) = registry.set_targets(&scan_id, report.targets.len()) {
            debug!(scan = %scan_id, error = %err, "target count not recorded");
        }
        info!(
            target: "scan::pipeline",
            scan = %scan_id,
            probed = report.probed,
            live = report.targets.len(),
            "validation finished"
        );
        report
    }
}
