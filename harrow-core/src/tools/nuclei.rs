use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::{io::Write, process::Stdio, time::Duration};
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    process::{Child, ChildStdout},
};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info};

use super::{FindingRecord, VulnerabilityRun, VulnerabilityTool, process};
use crate::config::ToolConfig;
use crate::error::ToolError;
use crate::pipeline::ToolContext;
use crate::session::Target;

const NAME: &str = "nuclei";

static PERCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)%").expect("percent pattern is valid")
});

/// Template-driven vulnerability scanner.
#[derive(Debug, Clone)]
pub struct Nuclei {
    program: String,
    ceiling: Duration,
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(rename = "template-id")]
    template_id: String,
    info: RecordInfo,
    #[serde(rename = "matched-at")]
    matched_at: String,
}

#[derive(Debug, Deserialize)]
struct RecordInfo {
    severity: String,
    #[serde(default)]
    name: Option<String>,
}

/// Everything the record stream keeps alive: dropping it kills the child
/// and removes the target list.
struct Running {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    _targets: NamedTempFile,
}

impl Nuclei {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            program: config.nuclei_path.clone(),
            ceiling: config.vuln_timeout,
        }
    }

    fn args(list: &str) -> Vec<String> {
        [
            "-l",
            list,
            "-silent",
            "-jsonl",
            "-stats",
            "-stats-interval",
            "10",
            "-timeout",
            "30",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

fn write_targets(targets: &[Target]) -> Result<NamedTempFile, ToolError> {
    let io = |source| ToolError::Io { tool: NAME, source };
    let mut file = tempfile::Builder::new()
        .prefix("nuclei-")
        .suffix(".txt")
        .tempfile()
        .map_err(io)?;
    for target in targets {
        writeln!(file, "{}", target.url).map_err(io)?;
    }
    file.flush().map_err(io)?;
    Ok(file)
}

#[async_trait]
impl VulnerabilityTool for Nuclei {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ceiling(&self) -> Duration {
        self.ceiling
    }

    async fn launch(
        &self,
        ctx: &ToolContext,
        targets: &[Target],
    ) -> Result<VulnerabilityRun, ToolError> {
        let list = write_targets(targets)?;

        let mut cmd = process::command(&self.program);
        cmd.args(Self::args(&list.path().display().to_string()))
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|source| ToolError::Spawn { tool: NAME, source })?;

        let missing = |pipe: &str| ToolError::Io {
            tool: NAME,
            source: std::io::Error::other(format!("{pipe} was not captured")),
        };
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        info!(
            target: "scan::tools",
            scan = %ctx.scan_id(),
            tool = NAME,
            targets = targets.len(),
            "vulnerability scan started"
        );

        let running = Running {
            lines: BufReader::new(stdout).lines(),
            child,
            _targets: list,
        };

        let records = stream::unfold(Some(running), |state| async move {
            let mut running = state?;
            match running.lines.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(running))),
                Ok(None) => match running.child.wait().await {
                    Ok(status) if !status.success() => Some((
                        Err(ToolError::Exit {
                            tool: NAME,
                            code: status.code(),
                            stderr: String::new(),
                        }),
                        None,
                    )),
                    Ok(_) => None,
                    Err(source) => {
                        Some((Err(ToolError::Io { tool: NAME, source }), None))
                    }
                },
                Err(source) => {
                    Some((Err(ToolError::Io { tool: NAME, source }), None))
                }
            }
        })
        .boxed();

        let stats = LinesStream::new(BufReader::new(stderr).lines())
            .filter_map(|line| future::ready(line.ok().filter(|l| is_stats_line(l))))
            .boxed();

        Ok(VulnerabilityRun {
            records,
            stats: Some(stats),
        })
    }

    fn decode(&self, line: &str) -> Result<Option<FindingRecord>, ToolError> {
        decode_record(line)
    }

    fn stats_percent(&self, line: &str) -> Option<f64> {
        PERCENT
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|pct| pct.as_str().parse().ok())
    }
}

fn is_stats_line(line: &str) -> bool {
    line.contains("Requests") || line.contains('%')
}

/// One `-jsonl` line. Blank lines carry nothing; anything else must be a
/// complete record.
pub fn decode_record(line: &str) -> Result<Option<FindingRecord>, ToolError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let record: Record =
        serde_json::from_str(line).map_err(|err| ToolError::Decode {
            tool: NAME,
            reason: err.to_string(),
        })?;
    debug!(template = %record.template_id, "decoded finding");

    Ok(Some(FindingRecord {
        severity: record.info.severity,
        template_id: record.template_id,
        name: record.info.name.filter(|name| !name.is_empty()),
        matched_at: record.matched_at,
    }))
}
