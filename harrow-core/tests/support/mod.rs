//! Scripted collaborators for driving the pipeline without subprocesses.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::{StreamExt, stream};
use harrow_core::error::ToolError;
use harrow_core::events::{Envelope, EventSink};
use harrow_core::pipeline::{Enqueue, ProducerSink, ToolContext};
use harrow_core::session::{ScanId, Session};
use harrow_core::tools::{
    DiscoveryProducer, FindingRecord, Prober, Toolkit, VulnerabilityRun,
    VulnerabilityTool,
};
use harrow_core::{PipelineConfig, ScanEvent, ScanRequest, Target};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Sink that remembers everything and can pretend an observer is bound.
#[derive(Debug, Default)]
pub struct RecordingSink {
    envelopes: Mutex<Vec<(ScanId, Envelope)>>,
    bound: AtomicBool,
}

impl RecordingSink {
    pub fn bind(&self) {
        self.bound.store(true, Ordering::SeqCst);
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    pub fn states(&self) -> Vec<Session> {
        self.envelopes()
            .into_iter()
            .filter_map(|envelope| match envelope {
                Envelope::State(session) => Some(session),
                Envelope::Event(_) => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        self.envelopes()
            .into_iter()
            .filter_map(|envelope| match envelope {
                Envelope::Event(event) => Some(event),
                Envelope::State(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, id: &ScanId, envelope: Envelope) {
        self.envelopes.lock().unwrap().push((id.clone(), envelope));
    }

    fn is_bound(&self, _id: &ScanId) -> bool {
        self.bound.load(Ordering::SeqCst)
    }
}

/// Producer that pushes a fixed list, optionally then holding until the
/// session is cancelled.
#[derive(Debug)]
pub struct ScriptedProducer {
    pub name: &'static str,
    pub urls: Vec<String>,
    pub delay: Duration,
    pub hold_until_cancelled: bool,
}

impl ScriptedProducer {
    pub fn new(name: &'static str, urls: &[&str]) -> Self {
        Self {
            name,
            urls: urls.iter().map(|url| url.to_string()).collect(),
            delay: Duration::ZERO,
            hold_until_cancelled: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn holding(mut self) -> Self {
        self.hold_until_cancelled = true;
        self
    }
}

#[async_trait]
impl DiscoveryProducer for ScriptedProducer {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        _request: &ScanRequest,
        sink: &mut ProducerSink,
    ) -> Result<(), ToolError> {
        for url in &self.urls {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if sink.send(url.clone()).await == Enqueue::Closed {
                return Ok(());
            }
        }
        if self.hold_until_cancelled {
            ctx.cancelled().await;
            return Err(ToolError::Cancelled { tool: self.name });
        }
        Ok(())
    }
}

/// Prober answering from a map and counting calls per URL.
#[derive(Debug, Default)]
pub struct MapProber {
    statuses: HashMap<String, u16>,
    calls: Mutex<Vec<String>>,
}

impl MapProber {
    pub fn new<S: AsRef<str>>(statuses: &[(S, u16)]) -> Self {
        Self {
            statuses: statuses
                .iter()
                .map(|(url, code)| (url.as_ref().to_string(), *code))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prober for MapProber {
    async fn probe(
        &self,
        _ctx: &ToolContext,
        url: &str,
    ) -> Result<Option<u16>, ToolError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(self.statuses.get(url).copied())
    }
}

/// Vulnerability tool replaying canned lines in the scanner's JSONL format.
#[derive(Debug, Default)]
pub struct ScriptedScanner {
    lines: Vec<String>,
    hold_until_cancelled: bool,
    launches: AtomicUsize,
    seen_targets: Mutex<Vec<Target>>,
}

impl ScriptedScanner {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            ..Self::default()
        }
    }

    pub fn holding(mut self) -> Self {
        self.hold_until_cancelled = true;
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn seen_targets(&self) -> Vec<Target> {
        self.seen_targets.lock().unwrap().clone()
    }
}

pub fn finding_line(template: &str, severity: &str, url: &str) -> String {
    serde_json::json!({
        "template-id": template,
        "info": { "severity": severity, "name": format!("{template} check") },
        "matched-at": url,
    })
    .to_string()
}

#[async_trait]
impl VulnerabilityTool for ScriptedScanner {
    fn name(&self) -> &'static str {
        "scanner"
    }

    async fn launch(
        &self,
        _ctx: &ToolContext,
        targets: &[Target],
    ) -> Result<VulnerabilityRun, ToolError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.seen_targets.lock().unwrap() = targets.to_vec();

        let replay = stream::iter(self.lines.clone().into_iter().map(Ok));
        let records = if self.hold_until_cancelled {
            replay.chain(stream::pending()).boxed()
        } else {
            replay.boxed()
        };
        let stats = stream::iter(vec![
            "Requests: 5/10 (50%)".to_string(),
        ])
        .boxed();

        Ok(VulnerabilityRun {
            records,
            stats: Some(stats),
        })
    }

    fn decode(&self, line: &str) -> Result<Option<FindingRecord>, ToolError> {
        harrow_core::tools::nuclei::decode_record(line)
    }

    fn stats_percent(&self, line: &str) -> Option<f64> {
        line.contains("50%").then_some(50.0)
    }
}

pub struct Harness {
    pub sink: Arc<RecordingSink>,
    pub prober: Arc<MapProber>,
    pub scanner: Arc<ScriptedScanner>,
    pub toolkit: Toolkit,
}

pub fn harness(
    producers: Vec<ScriptedProducer>,
    prober: MapProber,
    scanner: ScriptedScanner,
) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let prober = Arc::new(prober);
    let scanner = Arc::new(scanner);
    let toolkit = Toolkit {
        producers: producers
            .into_iter()
            .map(|producer| Arc::new(producer) as Arc<dyn DiscoveryProducer>)
            .collect(),
        prober: prober.clone(),
        vulnerability: scanner.clone(),
    };
    Harness {
        sink,
        prober,
        scanner,
        toolkit,
    }
}

/// Pipeline settings with no observer grace so tests start immediately.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        observer_grace: Duration::ZERO,
        ..PipelineConfig::default()
    }
}
