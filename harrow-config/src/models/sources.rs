use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{parse_bool_var, parse_csv_var, parse_var};

/// Raw configuration as defined in a TOML file. Durations are humantime
/// strings such as `"30s"` or `"1h 30m"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
    #[serde(default)]
    pub pipeline: FilePipelineConfig,
    #[serde(default)]
    pub tools: FileToolConfig,
    #[serde(default)]
    pub websocket: FileWebSocketConfig,
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_headers: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePipelineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_scans: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_queue_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enqueue_wait: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_cap: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observer_grace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileToolConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub katana_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffuf_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub httpx_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nuclei_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffuf_wrapper: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_wordlist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawler_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuzzer_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vuln_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileWebSocketConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_wait: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_wait: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_buffer: Option<usize>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub config_path: Option<PathBuf>,

    pub cors_allowed_origins: Option<Vec<String>>,
    pub cors_allowed_methods: Option<Vec<String>>,
    pub cors_allowed_headers: Option<Vec<String>>,
    pub dev_mode: Option<bool>,

    pub max_concurrent_scans: Option<usize>,
    pub discovery_queue_capacity: Option<usize>,
    pub enqueue_wait: Option<String>,
    pub discovery_cap: Option<usize>,
    pub validate_concurrency: Option<usize>,
    pub observer_grace: Option<String>,

    pub katana_path: Option<String>,
    pub ffuf_path: Option<String>,
    pub httpx_path: Option<String>,
    pub nuclei_path: Option<String>,
    pub python_path: Option<String>,
    pub ffuf_wrapper: Option<PathBuf>,
    pub default_wordlist: Option<String>,

    pub ws_ping_period: Option<String>,
    pub ws_pong_wait: Option<String>,
    pub ws_write_wait: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            server_host: std::env::var("SERVER_HOST").ok(),
            server_port: parse_var("SERVER_PORT"),
            config_path: std::env::var("HARROW_CONFIG_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),

            cors_allowed_origins: parse_csv_var("CORS_ALLOWED_ORIGINS"),
            cors_allowed_methods: parse_csv_var("CORS_ALLOWED_METHODS"),
            cors_allowed_headers: parse_csv_var("CORS_ALLOWED_HEADERS"),
            dev_mode: parse_bool_var("DEV_MODE"),

            max_concurrent_scans: parse_var("HARROW_MAX_SCANS"),
            discovery_queue_capacity: parse_var("HARROW_QUEUE_CAPACITY"),
            enqueue_wait: std::env::var("HARROW_ENQUEUE_WAIT").ok(),
            discovery_cap: parse_var("HARROW_DISCOVERY_CAP"),
            validate_concurrency: parse_var("HARROW_VALIDATE_CONCURRENCY"),
            observer_grace: std::env::var("HARROW_OBSERVER_GRACE").ok(),

            katana_path: std::env::var("KATANA_PATH").ok(),
            ffuf_path: std::env::var("FFUF_PATH").ok(),
            httpx_path: std::env::var("HTTPX_PATH").ok(),
            nuclei_path: std::env::var("NUCLEI_PATH").ok(),
            python_path: std::env::var("PYTHON_PATH").ok(),
            ffuf_wrapper: std::env::var("FFUF_WRAPPER").ok().map(PathBuf::from),
            default_wordlist: std::env::var("DEFAULT_WORDLIST").ok(),

            ws_ping_period: std::env::var("WS_PING_PERIOD").ok(),
            ws_pong_wait: std::env::var("WS_PONG_WAIT").ok(),
            ws_write_wait: std::env::var("WS_WRITE_WAIT").ok(),
        }
    }
}
