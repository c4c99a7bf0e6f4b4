use std::{path::PathBuf, time::Duration};

/// Tuning for the pipeline itself. Loaded by `harrow-config`; the defaults
/// here are what a bare `harrow-server` runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Sessions allowed to run concurrently; extra sessions wait in `Init`.
    pub max_concurrent_scans: usize,
    /// Slots in the discovery fan-in queue shared by all producers.
    pub discovery_queue_capacity: usize,
    /// How long a producer waits on a full queue before dropping a URL.
    pub enqueue_wait: Duration,
    /// Assumed number of URLs a discovery phase finds. Only used to
    /// estimate progress.
    pub discovery_cap: usize,
    /// Probes in flight at once during validation.
    pub validate_concurrency: usize,
    /// How long a new session waits for an observer before starting.
    pub observer_grace: Duration,
    /// Upper bound between progress refreshes during the vulnerability
    /// phase while findings arrive.
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: 5,
            discovery_queue_capacity: 2000,
            enqueue_wait: Duration::from_secs(30),
            discovery_cap: 200,
            validate_concurrency: 4,
            observer_grace: Duration::from_secs(2),
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// Locations and wall-clock ceilings of the external tools.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub katana_path: String,
    pub ffuf_path: String,
    pub httpx_path: String,
    pub nuclei_path: String,
    pub python_path: String,
    /// Fuzzer wrapper script. When unset the fuzzer runs `ffuf` directly.
    pub ffuf_wrapper: Option<PathBuf>,
    /// Wordlist for direct `ffuf` runs when the request names none.
    pub default_wordlist: String,
    pub crawl_duration: Duration,
    pub crawler_timeout: Duration,
    pub fuzzer_timeout: Duration,
    pub probe_timeout: Duration,
    pub vuln_timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            katana_path: "katana".into(),
            ffuf_path: "ffuf".into(),
            httpx_path: "httpx".into(),
            nuclei_path: "nuclei".into(),
            python_path: "python3".into(),
            ffuf_wrapper: Some(PathBuf::from("run_ffuf.py")),
            default_wordlist: "common.txt".into(),
            crawl_duration: Duration::from_secs(25),
            crawler_timeout: Duration::from_secs(30),
            fuzzer_timeout: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(15),
            vuln_timeout: Duration::from_secs(3600),
        }
    }
}
