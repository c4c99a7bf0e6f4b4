use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use super::{DiscoveryProducer, process};
use crate::config::ToolConfig;
use crate::error::ToolError;
use crate::pipeline::{Enqueue, ProducerSink, ToolContext};
use crate::session::ScanRequest;

const NAME: &str = "katana";

/// Crawler producer. Streams one URL per stdout line.
#[derive(Debug, Clone)]
pub struct Katana {
    program: String,
    crawl_duration: Duration,
    ceiling: Duration,
}

impl Katana {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            program: config.katana_path.clone(),
            crawl_duration: config.crawl_duration,
            ceiling: config.crawler_timeout,
        }
    }

    fn args(&self, target: &str) -> Vec<String> {
        vec![
            "-u".into(),
            target.into(),
            "-silent".into(),
            "-nc".into(),
            "-crawl-duration".into(),
            self.crawl_duration.as_secs().max(1).to_string(),
            "-timeout".into(),
            "10".into(),
        ]
    }
}

#[async_trait]
impl DiscoveryProducer for Katana {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ceiling(&self) -> Duration {
        self.ceiling
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        request: &ScanRequest,
        sink: &mut ProducerSink,
    ) -> Result<(), ToolError> {
        let target = request.url.trim();
        let mut cmd = process::command(&self.program);
        cmd.args(self.args(target));

        let (child, mut lines) = process::spawn_lines(NAME, cmd)?;
        let expires_at = ctx.expires_at();
        info!(target: "scan::tools", scan = %ctx.scan_id(), tool = NAME, "crawl started");

        let result = loop {
            let line = tokio::select! {
                biased;
                _ = ctx.cancelled() => break Err(ToolError::Cancelled { tool: NAME }),
                _ = sleep_until(expires_at) => {
                    warn!(scan = %ctx.scan_id(), tool = NAME, "crawl ceiling reached, keeping partial results");
                    break Ok(());
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(source) => break Err(ToolError::Io { tool: NAME, source }),
            };

            let url = line.trim();
            if url.is_empty() {
                continue;
            }

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancelled() => break Err(ToolError::Cancelled { tool: NAME }),
                outcome = sink.send(url) => outcome,
            };
            if outcome == Enqueue::Closed {
                debug!(scan = %ctx.scan_id(), tool = NAME, "collector closed, stopping crawl");
                break Ok(());
            }
        };

        process::reap(NAME, child).await;
        result
    }
}
