//! Phase state machine for one scan session.
//!
//! ```text
//! Init -> Discovery -> DiscoveryComplete -> VulnerabilityScan -> Finished
//!                                        \-> NoTargetsFound ----/
//! any non-terminal phase -> Cancelled
//! ```

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep},
};
use tracing::{debug, info, instrument, warn};

use super::{
    FanIn, ProducerReport, ToolContext, Validator, VulnerabilityStage,
    progress, vulnerability::StageOutcome,
};
use crate::config::PipelineConfig;
use crate::events::ScanEvent;
use crate::session::{Phase, ScanRequest, SessionRegistry, Target};
use crate::tools::Toolkit;

const OBSERVER_POLL: Duration = Duration::from_millis(100);

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Terminal phase reached.
    pub phase: Phase,
    pub discovered: usize,
    pub targets: usize,
    pub findings: usize,
    /// Vulnerability records that could not be decoded.
    pub skipped: usize,
    pub duration: Duration,
    pub producers: Vec<ProducerReport>,
}

#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<SessionRegistry>,
    toolkit: Toolkit,
    config: PipelineConfig,
}

/// Per-run bookkeeping: the phase this run believes the session is in.
struct Run<'a> {
    registry: &'a SessionRegistry,
    ctx: &'a ToolContext,
    phase: Phase,
    started: Instant,
    discovered: usize,
    targets: usize,
    findings: usize,
    skipped: usize,
    producers: Vec<ProducerReport>,
}

impl Run<'_> {
    async fn enter(&mut self, next: Phase, label: &str, value: u8) {
        let from = self.phase;
        match self
            .registry
            .update_state(self.ctx.scan_id(), next, label, value)
            .await
        {
            Ok(_) => {
                self.phase = next;
                if from != next {
                    self.registry
                        .emit(
                            self.ctx.scan_id(),
                            ScanEvent::PhaseChanged { from, to: next },
                        )
                        .await;
                }
            }
            Err(err) => {
                warn!(
                    target: "scan::pipeline",
                    scan = %self.ctx.scan_id(),
                    error = %err,
                    "phase transition rejected"
                );
            }
        }
    }

    async fn cancel(&mut self) {
        let label = if self.ctx.deadline_elapsed() {
            "Timed Out"
        } else {
            Phase::Cancelled.label()
        };
        self.enter(Phase::Cancelled, label, 100).await;
        info!(
            target: "scan::pipeline",
            scan = %self.ctx.scan_id(),
            label,
            "scan cancelled"
        );
    }

    fn report(self) -> PipelineReport {
        PipelineReport {
            phase: self.phase,
            discovered: self.discovered,
            targets: self.targets,
            findings: self.findings,
            skipped: self.skipped,
            duration: self.started.elapsed(),
            producers: self.producers,
        }
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        toolkit: Toolkit,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            toolkit,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn start<'a>(&'a self, ctx: &'a ToolContext) -> Run<'a> {
        let phase = self
            .registry
            .get(ctx.scan_id())
            .map(|session| session.stage)
            .unwrap_or(Phase::Init);
        Run {
            registry: &self.registry,
            ctx,
            phase,
            started: Instant::now(),
            discovered: 0,
            targets: 0,
            findings: 0,
            skipped: 0,
            producers: Vec::new(),
        }
    }

    /// Settle a session that was cancelled before it ever started.
    pub async fn finish_cancelled(&self, ctx: &ToolContext) -> PipelineReport {
        let mut run = self.start(ctx);
        run.cancel().await;
        run.report()
    }

    /// Drive one session from `Init` to a terminal phase.
    #[instrument(skip_all, fields(scan = %ctx.scan_id()))]
    pub async fn run(
        &self,
        request: &ScanRequest,
        ctx: &ToolContext,
    ) -> PipelineReport {
        let mut run = self.start(ctx);

        self.await_observer(ctx).await;
        if ctx.is_cancelled() {
            run.cancel().await;
            return run.report();
        }

        run.enter(
            Phase::Discovery,
            Phase::Discovery.label(),
            progress::DISCOVERY_START,
        )
        .await;
        let targets = self.discover(request, ctx, &mut run).await;

        run.enter(
            Phase::DiscoveryComplete,
            Phase::DiscoveryComplete.label(),
            progress::DISCOVERY_COMPLETE,
        )
        .await;
        if ctx.is_cancelled() {
            run.cancel().await;
            return run.report();
        }

        if targets.is_empty() {
            run.enter(
                Phase::NoTargetsFound,
                Phase::NoTargetsFound.label(),
                progress::NO_TARGETS,
            )
            .await;
            return self.finish(run).await;
        }

        run.enter(
            Phase::VulnerabilityScan,
            Phase::VulnerabilityScan.label(),
            progress::VULNERABILITY_START,
        )
        .await;
        let stage = VulnerabilityStage::new(
            Arc::clone(&self.toolkit.vulnerability),
            Arc::clone(&self.registry),
            ctx.scan_id().clone(),
            &self.config,
        );
        let report = stage.run(ctx, &targets).await;
        run.findings = report.findings;
        run.skipped = report.skipped;

        // The tool ceiling is clipped to the session deadline, so both can
        // expire in the same tick before the deadline watcher cancels.
        let cancelled = report.outcome == StageOutcome::Cancelled
            || ctx.is_cancelled()
            || ctx.deadline_elapsed();
        if cancelled {
            run.cancel().await;
            return run.report();
        }

        self.finish(run).await
    }

    async fn finish(&self, mut run: Run<'_>) -> PipelineReport {
        run.enter(Phase::Finished, Phase::Finished.label(), 100).await;

        let elapsed = run.started.elapsed();
        let duration = humantime::format_duration(Duration::from_millis(
            elapsed.as_millis() as u64,
        ))
        .to_string();
        info!(
            target: "scan::pipeline",
            scan = %run.ctx.scan_id(),
            duration = %duration,
            targets = run.targets,
            findings = run.findings,
            "scan finished"
        );
        self.registry
            .emit(
                run.ctx.scan_id(),
                ScanEvent::ScanComplete {
                    duration,
                    targets: run.targets,
                    findings: run.findings,
                },
            )
            .await;
        run.report()
    }

    /// Give an observer up to `observer_grace` to attach so early events are
    /// not lost. Never fatal.
    async fn await_observer(&self, ctx: &ToolContext) {
        let grace = self.config.observer_grace;
        if grace.is_zero() {
            return;
        }

        let sink = self.registry.sink();
        let give_up = Instant::now() + grace;
        loop {
            if sink.is_bound(ctx.scan_id()) {
                debug!(scan = %ctx.scan_id(), "observer attached");
                return;
            }
            if Instant::now() >= give_up {
                warn!(
                    target: "scan::pipeline",
                    scan = %ctx.scan_id(),
                    waited = ?grace,
                    "no observer attached, starting anyway"
                );
                return;
            }
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                _ = sleep(OBSERVER_POLL) => {}
            }
        }
    }

    /// Run every producer into the fan-in, dedupe, validate. Returns once
    /// all producers have finished and both drain tasks have processed
    /// everything buffered.
    async fn discover(
        &self,
        request: &ScanRequest,
        ctx: &ToolContext,
        run: &mut Run<'_>,
    ) -> Vec<Target> {
        let fan_in = FanIn::new(
            self.config.discovery_queue_capacity,
            self.config.enqueue_wait,
        );

        let producers: Vec<_> = self
            .toolkit
            .producers
            .iter()
            .map(|producer| {
                let producer = Arc::clone(producer);
                let mut sink = fan_in.producer(producer.name());
                let ctx = ctx.with_ceiling(producer.ceiling());
                let request = request.clone();
                tokio::spawn(async move {
                    match producer.run(&ctx, &request, &mut sink).await {
                        Ok(()) => {}
                        Err(err) if err.is_cancelled() => {
                            debug!(scan = %ctx.scan_id(), tool = producer.name(), "producer cancelled");
                        }
                        Err(err) => {
                            warn!(
                                target: "scan::tools",
                                scan = %ctx.scan_id(),
                                tool = producer.name(),
                                error = %err,
                                "discovery producer failed, keeping partial results"
                            );
                        }
                    }
                    sink.finish()
                })
            })
            .collect();

        let (forward, validate) =
            mpsc::channel(self.config.discovery_queue_capacity.max(1));
        let collector = fan_in.spawn_collector(
            Arc::clone(&self.registry),
            ctx.scan_id().clone(),
            self.config.discovery_cap,
            forward,
        );
        let validator = Validator::new(
            Arc::clone(&self.toolkit.prober),
            Arc::clone(&self.registry),
            ctx.clone(),
            self.config.validate_concurrency,
        )
        .spawn(validate);

        for handle in producers {
            match handle.await {
                Ok(report) => run.producers.push(report),
                Err(err) => warn!(scan = %ctx.scan_id(), error = %err, "producer task failed"),
            }
        }

        let collected = collector.await.unwrap_or_else(|err| {
            warn!(scan = %ctx.scan_id(), error = %err, "collector task failed");
            Default::default()
        });
        let validated = validator.await.unwrap_or_else(|err| {
            warn!(scan = %ctx.scan_id(), error = %err, "validator task failed");
            Default::default()
        });

        run.discovered = collected.unique;
        run.targets = validated.targets.len();
        info!(
            target: "scan::pipeline",
            scan = %ctx.scan_id(),
            discovered = collected.unique,
            duplicates = collected.duplicates,
            dropped = run.producers.iter().map(|p| p.dropped).sum::<usize>(),
            targets = run.targets,
            "discovery finished"
        );
        validated.targets
    }
}
