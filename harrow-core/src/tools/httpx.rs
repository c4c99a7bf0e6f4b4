use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use super::{Prober, process};
use crate::config::ToolConfig;
use crate::error::ToolError;
use crate::pipeline::ToolContext;

const NAME: &str = "httpx";

static STATUS_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(\d{1,3})\]").expect("status code pattern is valid")
});

/// Liveness probe backed by one `httpx` invocation per URL.
#[derive(Debug, Clone)]
pub struct Httpx {
    program: String,
    ceiling: Duration,
}

impl Httpx {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            program: config.httpx_path.clone(),
            ceiling: config.probe_timeout,
        }
    }

    fn args(url: &str) -> [&str; 5] {
        ["-u", url, "-sc", "-silent", "-nc"]
    }
}

#[async_trait]
impl Prober for Httpx {
    fn ceiling(&self) -> Duration {
        self.ceiling
    }

    async fn probe(
        &self,
        ctx: &ToolContext,
        url: &str,
    ) -> Result<Option<u16>, ToolError> {
        let mut cmd = process::command(&self.program);
        cmd.args(Self::args(url));
        let output = process::output(NAME, cmd, ctx).await?;
        Ok(parse_status(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Status code from `httpx -sc` output such as `http://a/x [200]`.
/// The first bracketed code wins; silence means nothing was observed.
pub fn parse_status(stdout: &str) -> Option<u16> {
    stdout
        .lines()
        .find_map(|line| STATUS_CODE.captures(line))
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_read_from_bracketed_code() {
        assert_eq!(parse_status("http://a/admin [200]\n"), Some(200));
        assert_eq!(parse_status("http://a/old [301] [http://a/new]"), Some(301));
        assert_eq!(parse_status("http://a/missing [404]"), Some(404));
    }

    #[test]
    fn silent_probe_observes_nothing() {
        assert_eq!(parse_status(""), None);
        assert_eq!(parse_status("http://a/x"), None);
        assert_eq!(parse_status("http://a/x [title]"), None);
    }

    #[test]
    fn command_line_matches_probe_contract() {
        assert_eq!(
            Httpx::args("http://a"),
            ["-u", "http://a", "-sc", "-silent", "-nc"]
        );
    }
}
