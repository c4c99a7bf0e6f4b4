//! Facade tying session creation, admission and the orchestrator together.

use std::{sync::Arc, time::Duration};
use tokio::time::{Instant, sleep_until};
use tokio_util::task::TaskTracker;
use tracing::{info, instrument};

use crate::admission::AdmissionController;
use crate::config::PipelineConfig;
use crate::error::ScanError;
use crate::events::Finding;
use crate::pipeline::{Orchestrator, ToolContext};
use crate::session::{ScanId, ScanRequest, Session, SessionRegistry};
use crate::tools::Toolkit;

/// Entry point used by the HTTP layer.
///
/// Each accepted request gets its own task: wait for an admission slot
/// (giving up if the session is cancelled while queued), run the pipeline,
/// release the slot.
#[derive(Debug, Clone)]
pub struct ScanService {
    registry: Arc<SessionRegistry>,
    admission: AdmissionController,
    orchestrator: Arc<Orchestrator>,
    tasks: TaskTracker,
}

impl ScanService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        toolkit: Toolkit,
        config: PipelineConfig,
    ) -> Self {
        let admission = AdmissionController::new(config.max_concurrent_scans);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&registry),
            toolkit,
            config,
        ));
        Self {
            registry,
            admission,
            orchestrator,
            tasks: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Validate `request`, create its session and schedule the pipeline.
    /// Returns as soon as the session exists.
    #[instrument(skip_all, fields(target = %request.url))]
    pub fn start_scan(&self, request: ScanRequest) -> Result<ScanId, ScanError> {
        request.validate()?;
        let handle = self.registry.create(&request);

        let deadline = request
            .timeout
            .filter(|secs| *secs > 0)
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let ctx = ToolContext::new(handle.id.clone(), handle.cancel, deadline);

        let service = self.clone();
        self.tasks.spawn(async move {
            service.drive(request, ctx).await;
        });

        Ok(handle.id)
    }

    async fn drive(&self, request: ScanRequest, ctx: ToolContext) {
        let watcher = ctx.session_deadline().map(|deadline| {
            let token = ctx.token().clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = sleep_until(deadline) => token.cancel(),
                }
            })
        });

        let report = match self.admission.acquire_or_cancel(ctx.token()).await
        {
            Some(permit) => {
                let report = self.orchestrator.run(&request, &ctx).await;
                self.admission.release(permit);
                report
            }
            None => self.orchestrator.finish_cancelled(&ctx).await,
        };

        if let Some(watcher) = watcher {
            watcher.abort();
        }

        info!(
            target: "scan::pipeline",
            scan = %ctx.scan_id(),
            phase = ?report.phase,
            discovered = report.discovered,
            targets = report.targets,
            findings = report.findings,
            elapsed = ?report.duration,
            "scan task finished"
        );
    }

    pub fn stop_scan(&self, id: &ScanId) -> Result<(), ScanError> {
        self.registry.cancel(id)
    }

    pub fn snapshot(&self, id: &ScanId) -> Result<Session, ScanError> {
        self.registry.get(id)
    }

    pub fn list(&self) -> Vec<Session> {
        self.registry.list()
    }

    pub fn findings(&self, id: &ScanId) -> Result<Vec<Finding>, ScanError> {
        self.registry.findings(id)
    }

    /// Number of scan tasks that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every running session and wait for their tasks to settle.
    pub async fn shutdown(&self) {
        self.registry.cancel_all();
        self.tasks.close();
        self.tasks.wait().await;
        info!("scan service drained");
    }
}
