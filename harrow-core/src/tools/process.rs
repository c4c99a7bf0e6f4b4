//! Subprocess plumbing shared by the tool adapters.
//!
//! Every child is spawned with `kill_on_drop`, so abandoning the future or
//! stream that owns it terminates the process.

use std::process::{Output, Stdio};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    process::{Child, ChildStdout, Command},
    time::timeout,
};
use tracing::debug;

use crate::error::ToolError;
use crate::pipeline::ToolContext;

/// Fresh command with the defaults every adapter wants.
pub fn command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Run to completion and collect output, racing the context's cancellation
/// and ceiling. A non-zero exit is reported as [`ToolError::Exit`].
pub async fn output(
    tool: &'static str,
    mut cmd: Command,
    ctx: &ToolContext,
) -> Result<Output, ToolError> {
    let child = cmd
        .spawn()
        .map_err(|source| ToolError::Spawn { tool, source })?;
    let limit = ctx.ceiling();

    let output = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(ToolError::Cancelled { tool }),
        result = timeout(limit, child.wait_with_output()) => match result {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(ToolError::Io { tool, source }),
            Err(_) => return Err(ToolError::TimedOut { tool, limit }),
        },
    };

    if !output.status.success() {
        return Err(ToolError::Exit {
            tool,
            code: output.status.code(),
            stderr: stderr_excerpt(&output.stderr),
        });
    }

    Ok(output)
}

/// Spawn and hand back the child plus a line reader over its stdout.
/// Stderr is discarded.
pub fn spawn_lines(
    tool: &'static str,
    mut cmd: Command,
) -> Result<(Child, Lines<BufReader<ChildStdout>>), ToolError> {
    cmd.stderr(Stdio::null());
    let mut child = cmd
        .spawn()
        .map_err(|source| ToolError::Spawn { tool, source })?;
    let stdout = child.stdout.take().ok_or_else(|| ToolError::Io {
        tool,
        source: std::io::Error::other("stdout was not captured"),
    })?;
    Ok((child, BufReader::new(stdout).lines()))
}

/// Kill a streaming child once its output is no longer wanted and reap it.
pub async fn reap(tool: &'static str, mut child: Child) {
    if let Err(err) = child.start_kill() {
        debug!(tool, error = %err, "child already exited");
    }
    if let Err(err) = child.wait().await {
        debug!(tool, error = %err, "failed to reap child");
    }
}

/// First few stderr lines, for error messages.
pub fn stderr_excerpt(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .take(10)
        .collect::<Vec<_>>()
        .join("\n")
}
