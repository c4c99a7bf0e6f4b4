use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::{path::PathBuf, time::Duration};
use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use super::{DiscoveryProducer, process};
use crate::config::ToolConfig;
use crate::error::ToolError;
use crate::pipeline::{Enqueue, ProducerSink, ToolContext};
use crate::session::ScanRequest;

const NAME: &str = "ffuf";
const MATCH_CODES: &str = "200,204,301,302,401,403,500";

/// Fuzzer producer.
///
/// Runs the wrapper script first and consumes its single JSON document. If
/// the wrapper cannot run, falls back to invoking `ffuf` directly and
/// streaming its per-hit JSON lines.
#[derive(Debug, Clone)]
pub struct Ffuf {
    program: String,
    python: String,
    wrapper: Option<PathBuf>,
    default_wordlist: String,
    ceiling: Duration,
}

#[derive(Debug, Deserialize)]
struct WrapperOutput {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: WrapperData,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WrapperData {
    #[serde(default)]
    matches: Vec<WrapperMatch>,
}

#[derive(Debug, Deserialize)]
struct WrapperMatch {
    path: String,
}

impl Ffuf {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            program: config.ffuf_path.clone(),
            python: config.python_path.clone(),
            wrapper: config.ffuf_wrapper.clone(),
            default_wordlist: config.default_wordlist.clone(),
            ceiling: config.fuzzer_timeout,
        }
    }

    fn wrapper_args(wrapper: &PathBuf, request: &ScanRequest) -> Vec<String> {
        let mut args = vec![
            wrapper.display().to_string(),
            request.url.trim().to_string(),
        ];
        if let Some(wordlist) = requested_wordlist(request) {
            args.push(wordlist.to_string());
        }
        args.push(request.scan_type().to_string());
        args
    }

    fn direct_args(&self, request: &ScanRequest) -> Vec<String> {
        let wordlist = requested_wordlist(request)
            .unwrap_or(self.default_wordlist.as_str());
        vec![
            "-u".into(),
            format!("{}/FUZZ", request.url.trim().trim_end_matches('/')),
            "-w".into(),
            wordlist.to_string(),
            "-t".into(),
            "20".into(),
            "-rate".into(),
            "15".into(),
            "-mc".into(),
            MATCH_CODES.into(),
            "-fc".into(),
            "404".into(),
            "-json".into(),
            "-s".into(),
        ]
    }

    async fn run_wrapper(
        &self,
        ctx: &ToolContext,
        wrapper: &PathBuf,
        request: &ScanRequest,
        sink: &mut ProducerSink,
    ) -> Result<(), ToolError> {
        let mut cmd = process::command(&self.python);
        cmd.args(Self::wrapper_args(wrapper, request));
        let output = process::output(NAME, cmd, ctx).await?;

        let paths = parse_wrapper_output(&output.stdout)?;
        let base = request.url.trim();
        let mut sent = 0;
        for path in paths {
            let outcome = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ToolError::Cancelled { tool: NAME }),
                outcome = sink.send(join_url(base, &path)) => outcome,
            };
            match outcome {
                Enqueue::Accepted => sent += 1,
                Enqueue::Dropped => {}
                Enqueue::Closed => break,
            }
        }

        info!(target: "scan::tools", scan = %ctx.scan_id(), tool = NAME, sent, "fuzzing finished");
        Ok(())
    }

    async fn run_direct(
        &self,
        ctx: &ToolContext,
        request: &ScanRequest,
        sink: &mut ProducerSink,
    ) -> Result<(), ToolError> {
        let mut cmd = process::command(&self.program);
        cmd.args(self.direct_args(request));
        let (child, mut lines) = process::spawn_lines(NAME, cmd)?;
        let expires_at = ctx.expires_at();
        let base = request.url.trim();

        let result = 'read: loop {
            let line = tokio::select! {
                biased;
                _ = ctx.cancelled() => break Err(ToolError::Cancelled { tool: NAME }),
                _ = sleep_until(expires_at) => {
                    warn!(scan = %ctx.scan_id(), tool = NAME, "direct fuzzing ceiling reached");
                    break Ok(());
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(source) => break Err(ToolError::Io { tool: NAME, source }),
            };

            let paths = match parse_direct_line(&line) {
                Some(paths) => paths,
                None => {
                    debug!(scan = %ctx.scan_id(), tool = NAME, line = %line, "skipping unrecognised fuzzer line");
                    continue;
                }
            };

            for path in paths {
                let outcome = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => break 'read Err(ToolError::Cancelled { tool: NAME }),
                    outcome = sink.send(join_url(base, &path)) => outcome,
                };
                if outcome == Enqueue::Closed {
                    break 'read Ok(());
                }
            }
        };

        process::reap(NAME, child).await;
        result
    }
}

#[async_trait]
impl DiscoveryProducer for Ffuf {
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
        if let Some(wrapper) = self.wrapper.as_ref().filter(|path| path.exists())
        {
            match self.run_wrapper(ctx, wrapper, request, sink).await {
                Ok(()) => return Ok(()),
                Err(err @ ToolError::Cancelled { .. })
                | Err(err @ ToolError::Decode { .. }) => return Err(err),
                Err(err) => {
                    warn!(
                        scan = %ctx.scan_id(),
                        tool = NAME,
                        error = %err,
                        "fuzzer wrapper failed, falling back to direct ffuf"
                    );
                }
            }
        }

        self.run_direct(ctx, request, sink).await
    }
}

fn requested_wordlist(request: &ScanRequest) -> Option<&str> {
    request
        .wordlist
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// `base` without trailing slashes, `/`, then `path` without leading ones.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn parse_wrapper_output(stdout: &[u8]) -> Result<Vec<String>, ToolError> {
    let parsed: WrapperOutput =
        serde_json::from_slice(stdout).map_err(|err| ToolError::Decode {
            tool: NAME,
            reason: err.to_string(),
        })?;

    if let Some(error) = parsed.error.filter(|error| !error.is_empty()) {
        return Err(ToolError::Decode {
            tool: NAME,
            reason: format!(
                "wrapper reported {}: {error}",
                parsed.status.as_deref().unwrap_or("error")
            ),
        });
    }

    Ok(parsed
        .data
        .matches
        .into_iter()
        .map(|hit| hit.path)
        .filter(|path| !path.trim().is_empty())
        .collect())
}

/// Paths carried by one line of direct `ffuf` output: either a per-hit
/// record (`{"input": {"FUZZ": ...}}`) or a whole results document.
fn parse_direct_line(line: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;

    let fuzz_of = |record: &Value| {
        record
            .get("input")
            .and_then(|input| input.get("FUZZ"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    if let Some(results) = value.get("results").and_then(Value::as_array) {
        return Some(results.iter().filter_map(fuzz_of).collect());
    }

    fuzz_of(&value).map(|path| vec![path])
}
