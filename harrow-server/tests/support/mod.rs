//! Canned collaborators and app wiring for HTTP tests.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum_test::TestServer;
use futures_util::{StreamExt, stream};
use harrow_config::Config;
use harrow_core::pipeline::{Enqueue, ProducerSink, ToolContext};
use harrow_core::tools::{
    DiscoveryProducer, FindingRecord, Prober, Toolkit, VulnerabilityRun,
    VulnerabilityTool,
};
use harrow_core::{ScanRequest, Target, ToolError};
use harrow_server::{AppState, create_app};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Emits `<target>/<path>` for each path.
#[derive(Debug)]
pub struct PathProducer {
    pub paths: Vec<&'static str>,
}

#[async_trait]
impl DiscoveryProducer for PathProducer {
    fn name(&self) -> &'static str {
        "paths"
    }

    async fn run(
        &self,
        _ctx: &ToolContext,
        request: &ScanRequest,
        sink: &mut ProducerSink,
    ) -> Result<(), ToolError> {
        let base = request.url.trim_end_matches('/');
        for path in &self.paths {
            if sink.send(format!("{base}/{path}")).await == Enqueue::Closed {
                break;
            }
        }
        Ok(())
    }
}

/// Everything is live except URLs ending in `missing`.
#[derive(Debug)]
pub struct SuffixProber;

#[async_trait]
impl Prober for SuffixProber {
    async fn probe(
        &self,
        _ctx: &ToolContext,
        url: &str,
    ) -> Result<Option<u16>, ToolError> {
        Ok(Some(if url.ends_with("missing") { 404 } else { 200 }))
    }
}

/// Reports one finding per target, optionally never finishing.
#[derive(Debug, Default)]
pub struct EchoScanner {
    pub hold: bool,
    pub launches: AtomicUsize,
}

#[async_trait]
impl VulnerabilityTool for EchoScanner {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn launch(
        &self,
        _ctx: &ToolContext,
        targets: &[Target],
    ) -> Result<VulnerabilityRun, ToolError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let lines: Vec<Result<String, ToolError>> = targets
            .iter()
            .map(|target| {
                Ok(serde_json::json!({
                    "template-id": "exposed-path",
                    "info": { "severity": "low", "name": "Exposed path" },
                    "matched-at": target.url,
                })
                .to_string())
            })
            .collect();
        let records = if self.hold {
            stream::iter(lines).chain(stream::pending()).boxed()
        } else {
            stream::iter(lines).boxed()
        };
        Ok(VulnerabilityRun {
            records,
            stats: None,
        })
    }

    fn decode(&self, line: &str) -> Result<Option<FindingRecord>, ToolError> {
        harrow_core::tools::nuclei::decode_record(line)
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub scanner: Arc<EchoScanner>,
}

pub fn toolkit(scanner: Arc<EchoScanner>) -> Toolkit {
    Toolkit {
        producers: vec![Arc::new(PathProducer {
            paths: vec!["admin", "login", "missing", "admin"],
        })],
        prober: Arc::new(SuffixProber),
        vulnerability: scanner,
    }
}

pub fn config(observer_grace: Duration) -> Config {
    let mut config = Config::default();
    config.pipeline.observer_grace = observer_grace;
    config.tools.ffuf_wrapper = None;
    config
}

pub fn build_test_app(config: Config, scanner: EchoScanner) -> Result<TestApp> {
    let scanner = Arc::new(scanner);
    let state = AppState::new(config, toolkit(Arc::clone(&scanner)));
    let server = TestServer::builder()
        .http_transport()
        .build(create_app(state.clone()))
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(TestApp {
        server,
        state,
        scanner,
    })
}
