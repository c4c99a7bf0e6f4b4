//! Vulnerability stage: one tool invocation over the validated targets,
//! streamed into findings.

use futures::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{Instant, sleep_until, timeout},
};
use tracing::{debug, info, warn};

use super::{
    ToolContext,
    progress::{self, FINDING_STRIDE, ProgressThrottle},
};
use crate::config::PipelineConfig;
use crate::events::{Finding, ScanEvent};
use crate::session::{Phase, ScanId, SessionRegistry, Target};
use crate::tools::VulnerabilityTool;

/// How the record stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Output was exhausted.
    Completed,
    Cancelled,
    /// The tool ceiling or session deadline elapsed first.
    TimedOut,
    /// The tool could not be started or its output broke off.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VulnerabilityReport {
    pub findings: usize,
    /// Malformed records that were skipped.
    pub skipped: usize,
    pub outcome: StageOutcome,
}

#[derive(Debug)]
pub struct VulnerabilityStage {
    tool: Arc<dyn VulnerabilityTool>,
    registry: Arc<SessionRegistry>,
    scan_id: ScanId,
    progress_interval: Duration,
}

impl VulnerabilityStage {
    pub fn new(
        tool: Arc<dyn VulnerabilityTool>,
        registry: Arc<SessionRegistry>,
        scan_id: ScanId,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            tool,
            registry,
            scan_id,
            progress_interval: config.progress_interval,
        }
    }

    async fn progress(&self, label: impl Into<String>, value: u8) {
        if let Err(err) = self
            .registry
            .update_state(&self.scan_id, Phase::VulnerabilityScan, label, value)
            .await
        {
            debug!(scan = %self.scan_id, error = %err, "progress update rejected");
        }
    }

    /// Run the tool once over `targets` and turn its output into findings.
    pub async fn run(
        &self,
        ctx: &ToolContext,
        targets: &[Target],
    ) -> VulnerabilityReport {
        let ctx = ctx.with_ceiling(self.tool.ceiling());
        let tool_name = self.tool.name();
        self.progress(
            "Vulnerability Initializing",
            progress::VULNERABILITY_INITIALIZING,
        )
        .await;

        let mut run = match self.tool.launch(&ctx, targets).await {
            Ok(run) => run,
            Err(err) if err.is_cancelled() => {
                return VulnerabilityReport {
                    findings: 0,
                    skipped: 0,
                    outcome: StageOutcome::Cancelled,
                };
            }
            Err(err) => {
                warn!(
                    target: "scan::pipeline",
                    scan = %self.scan_id,
                    tool = tool_name,
                    error = %err,
                    "vulnerability tool failed to start"
                );
                return self.complete(0, 0, StageOutcome::Failed).await;
            }
        };

        // Stats relay: forwards tool chatter as events and publishes the
        // latest completion percentage for the reader loop.
        let (percent_tx, mut percent_rx) = watch::channel(None::<f64>);
        let stats_task = run.stats.take().map(|mut stats| {
            let registry = Arc::clone(&self.registry);
            let tool = Arc::clone(&self.tool);
            let scan_id = self.scan_id.clone();
            tokio::spawn(async move {
                while let Some(line) = stats.next().await {
                    if let Some(pct) = tool.stats_percent(&line) {
                        percent_tx.send_replace(Some(pct));
                    }
                    registry
                        .emit(
                            &scan_id,
                            ScanEvent::ToolProgress {
                                tool: tool.name().to_string(),
                                message: line,
                            },
                        )
                        .await;
                }
            })
        });

        let expires_at = ctx.expires_at();
        let target_count = targets.len();
        let mut throttle = ProgressThrottle::new(
            FINDING_STRIDE,
            self.progress_interval,
            Instant::now(),
        );
        let mut findings = 0usize;
        let mut skipped = 0usize;
        let mut percent_open = stats_task.is_some();

        let outcome = loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break StageOutcome::Cancelled,
                _ = sleep_until(expires_at) => {
                    warn!(
                        target: "scan::pipeline",
                        scan = %self.scan_id,
                        tool = tool_name,
                        "vulnerability ceiling reached, keeping partial findings"
                    );
                    break StageOutcome::TimedOut;
                }
                changed = percent_rx.changed(), if percent_open => {
                    if changed.is_err() {
                        percent_open = false;
                        continue;
                    }
                    let pct = *percent_rx.borrow_and_update();
                    if let Some(pct) = pct {
                        self.progress(
                            "Vulnerability Scanning",
                            progress::tool_percent_progress(pct),
                        )
                        .await;
                    }
                }
                record = run.records.next() => {
                    let line = match record {
                        None => break StageOutcome::Completed,
                        Some(Ok(line)) => line,
                        Some(Err(err)) => {
                            warn!(
                                target: "scan::pipeline",
                                scan = %self.scan_id,
                                tool = tool_name,
                                error = %err,
                                "vulnerability output ended abnormally"
                            );
                            break StageOutcome::Failed;
                        }
                    };

                    let record = match self.tool.decode(&line) {
                        Ok(Some(record)) => record,
                        Ok(None) => continue,
                        Err(err) => {
                            skipped += 1;
                            warn!(
                                target: "scan::pipeline",
                                scan = %self.scan_id,
                                tool = tool_name,
                                error = %err,
                                skipped,
                                "skipping malformed vulnerability record"
                            );
                            continue;
                        }
                    };

                    let finding = Finding {
                        sequence: findings + 1,
                        severity: record.severity,
                        template_id: record.template_id,
                        title: record.name,
                        matched_at: record.matched_at,
                    };
                    findings = match self.registry.record_finding(&self.scan_id, finding.clone()) {
                        Ok(count) => count,
                        Err(err) => {
                            debug!(scan = %self.scan_id, error = %err, "finding not recorded");
                            findings + 1
                        }
                    };
                    self.registry
                        .emit(&self.scan_id, ScanEvent::Vulnerability(finding))
                        .await;

                    if throttle.should_recompute(findings, Instant::now()) {
                        self.progress(
                            format!("Vulnerability Scan: {findings} findings"),
                            progress::vulnerability_progress(findings, target_count),
                        )
                        .await;
                    }
                }
            }
        };

        // Dropping the run kills the tool and closes its stats pipe.
        drop(run);
        if let Some(mut task) = stats_task {
            if timeout(Duration::from_secs(1), &mut task).await.is_err() {
                task.abort();
            }
        }

        if outcome == StageOutcome::Cancelled {
            info!(
                target: "scan::pipeline",
                scan = %self.scan_id,
                findings,
                "vulnerability stage cancelled"
            );
            return VulnerabilityReport {
                findings,
                skipped,
                outcome,
            };
        }

        self.complete(findings, skipped, outcome).await
    }

    async fn complete(
        &self,
        findings: usize,
        skipped: usize,
        outcome: StageOutcome,
    ) -> VulnerabilityReport {
        self.progress(
            "Vulnerability Scan Complete",
            progress::VULNERABILITY_COMPLETE,
        )
        .await;
        self.registry
            .emit(
                &self.scan_id,
                ScanEvent::VulnerabilityScanComplete { count: findings },
            )
            .await;
        info!(
            target: "scan::pipeline",
            scan = %self.scan_id,
            findings,
            skipped,
            outcome = ?outcome,
            "vulnerability stage finished"
        );
        VulnerabilityReport {
            findings,
            skipped,
            outcome,
        }
    }
}
