use harrow_core::{PipelineConfig, ToolConfig};
use once_cell::sync::Lazy;
use std::{fs, path::PathBuf, time::Duration};
use thiserror::Error;

use super::{
    models::{
        Config, ConfigMetadata, CorsConfig, ServerConfig, WebSocketConfig,
        default_cors_headers, default_cors_methods, default_cors_origins,
        sources::{EnvConfig, FileConfig},
    },
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("harrow.toml"),
        PathBuf::from("config/harrow.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Skip reading process environment and `.env`. File and defaults only.
    pub ignore_env: bool,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn ignore_env(mut self) -> Self {
        self.options.ignore_env = true;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (env_config, env_file_loaded) = if self.options.ignore_env {
            (EnvConfig::default(), false)
        } else {
            let loaded = self.load_env_file()?;
            (EnvConfig::gather(), loaded)
        };

        let (file_config, config_path) = self.load_file_config(&env_config)?;

        self.compose(file_config, env_config, config_path, env_file_loaded)
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        loaded.or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(false),
            _ => Err(err.into()),
        })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = match (&self.options.config_path, &env_config.config_path)
        {
            (Some(path), _) | (None, Some(path)) => (path.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => (path.clone(), false),
                None => return Ok((None, None)),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
                path: path.clone(),
                source,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| {
                ConfigLoadError::Parse {
                    path: path.clone(),
                    source,
                }
            })?;

        Ok((Some(file_config), Some(path)))
    }

    /// Merge sources: environment over file over built-in defaults.
    pub fn compose(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if file_config.is_none() {
            warnings.push_with_hint(
                "No harrow.toml detected; falling back to environment variables",
                "Create harrow.toml or point HARROW_CONFIG_PATH at a configuration file",
            );
        }

        let FileConfig {
            server: file_server,
            cors: file_cors,
            pipeline: file_pipeline,
            tools: file_tools,
            websocket: file_websocket,
            dev_mode: file_dev_mode,
        } = file_config.unwrap_or_default();

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env
                .server_host
                .or(file_server.host)
                .unwrap_or(server_defaults.host),
            port: env
                .server_port
                .or(file_server.port)
                .unwrap_or(server_defaults.port),
        };

        let cors = CorsConfig {
            allowed_origins: env
                .cors_allowed_origins
                .or(file_cors.allowed_origins)
                .unwrap_or_else(default_cors_origins),
            allowed_methods: env
                .cors_allowed_methods
                .or(file_cors.allowed_methods)
                .unwrap_or_else(default_cors_methods),
            allowed_headers: env
                .cors_allowed_headers
                .or(file_cors.allowed_headers)
                .unwrap_or_else(default_cors_headers),
        };

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            max_concurrent_scans: env
                .max_concurrent_scans
                .or(file_pipeline.max_concurrent_scans)
                .unwrap_or(pipeline_defaults.max_concurrent_scans),
            discovery_queue_capacity: env
                .discovery_queue_capacity
                .or(file_pipeline.discovery_queue_capacity)
                .unwrap_or(pipeline_defaults.discovery_queue_capacity),
            enqueue_wait: duration(
                "pipeline.enqueue_wait",
                env.enqueue_wait.or(file_pipeline.enqueue_wait),
                pipeline_defaults.enqueue_wait,
            )?,
            discovery_cap: env
                .discovery_cap
                .or(file_pipeline.discovery_cap)
                .unwrap_or(pipeline_defaults.discovery_cap),
            validate_concurrency: env
                .validate_concurrency
                .or(file_pipeline.validate_concurrency)
                .unwrap_or(pipeline_defaults.validate_concurrency),
            observer_grace: duration(
                "pipeline.observer_grace",
                env.observer_grace.or(file_pipeline.observer_grace),
                pipeline_defaults.observer_grace,
            )?,
            progress_interval: duration(
                "pipeline.progress_interval",
                file_pipeline.progress_interval,
                pipeline_defaults.progress_interval,
            )?,
        };

        let tool_defaults = ToolConfig::default();
        let tools = ToolConfig {
            katana_path: env
                .katana_path
                .or(file_tools.katana_path)
                .unwrap_or(tool_defaults.katana_path),
            ffuf_path: env
                .ffuf_path
                .or(file_tools.ffuf_path)
                .unwrap_or(tool_defaults.ffuf_path),
            httpx_path: env
                .httpx_path
                .or(file_tools.httpx_path)
                .unwrap_or(tool_defaults.httpx_path),
            nuclei_path: env
                .nuclei_path
                .or(file_tools.nuclei_path)
                .unwrap_or(tool_defaults.nuclei_path),
            python_path: env
                .python_path
                .or(file_tools.python_path)
                .unwrap_or(tool_defaults.python_path),
            ffuf_wrapper: match env.ffuf_wrapper.or(file_tools.ffuf_wrapper) {
                // An empty value switches the wrapper off.
                Some(path) if path.as_os_str().is_empty() => None,
                Some(path) => Some(path),
                None => tool_defaults.ffuf_wrapper,
            },
            default_wordlist: env
                .default_wordlist
                .or(file_tools.default_wordlist)
                .unwrap_or(tool_defaults.default_wordlist),
            crawl_duration: duration(
                "tools.crawl_duration",
                file_tools.crawl_duration,
                tool_defaults.crawl_duration,
            )?,
            crawler_timeout: duration(
                "tools.crawler_timeout",
                file_tools.crawler_timeout,
                tool_defaults.crawler_timeout,
            )?,
            fuzzer_timeout: duration(
                "tools.fuzzer_timeout",
                file_tools.fuzzer_timeout,
                tool_defaults.fuzzer_timeout,
            )?,
            probe_timeout: duration(
                "tools.probe_timeout",
                file_tools.probe_timeout,
                tool_defaults.probe_timeout,
            )?,
            vuln_timeout: duration(
                "tools.vuln_timeout",
                file_tools.vuln_timeout,
                tool_defaults.vuln_timeout,
            )?,
        };

        let websocket_defaults = WebSocketConfig::default();
        let websocket = WebSocketConfig {
            ping_period: duration(
                "websocket.ping_period",
                env.ws_ping_period.or(file_websocket.ping_period),
                websocket_defaults.ping_period,
            )?,
            pong_wait: duration(
                "websocket.pong_wait",
                env.ws_pong_wait.or(file_websocket.pong_wait),
                websocket_defaults.pong_wait,
            )?,
            write_wait: duration(
                "websocket.write_wait",
                env.ws_write_wait.or(file_websocket.write_wait),
                websocket_defaults.write_wait,
            )?,
            outbound_buffer: file_websocket
                .outbound_buffer
                .unwrap_or(websocket_defaults.outbound_buffer),
        };

        let dev_mode = env.dev_mode.or(file_dev_mode).unwrap_or(false);

        let config = Config {
            server,
            cors,
            pipeline,
            tools,
            websocket,
            dev_mode,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        Ok(ConfigLoad { config, warnings })
    }
}

fn duration(
    field: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => humantime::parse_duration(value).map_err(|source| {
            ConfigLoadError::InvalidDuration {
                field,
                value: value.to_string(),
                source,
            }
        }),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration `{value}` for {field}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(toml_src: &str) -> FileConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn defaults_apply_without_sources() {
        let load = ConfigLoader::new()
            .compose(None, EnvConfig::default(), None, false)
            .unwrap();
        assert_eq!(load.config.server.port, 8080);
        assert_eq!(load.config.pipeline, PipelineConfig::default());
        assert_eq!(load.config.websocket, WebSocketConfig::default());
        assert!(
            load.warnings
                .items
                .iter()
                .any(|w| w.message.contains("No harrow.toml"))
        );
    }

    #[test]
    fn environment_overrides_file() {
        let file = file(
            r#"
            [server]
            port = 9000
            host = "127.0.0.1"

            [pipeline]
            max_concurrent_scans = 3
            discovery_cap = 500
            enqueue_wait = "5s"
            "#,
        );
        let env = EnvConfig {
            server_port: Some(9100),
            max_concurrent_scans: Some(7),
            ..EnvConfig::default()
        };

        let config = ConfigLoader::new()
            .compose(Some(file), env, None, false)
            .unwrap()
            .config;
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.max_concurrent_scans, 7);
        assert_eq!(config.pipeline.discovery_cap, 500);
        assert_eq!(config.pipeline.enqueue_wait, Duration::from_secs(5));
    }

    #[test]
    fn humantime_durations_are_parsed() {
        let file = file(
            r#"
            [tools]
            vuln_timeout = "1h 30m"
            probe_timeout = "750ms"

            [websocket]
            ping_period = "20s"
            pong_wait = "25s"
            "#,
        );
        let config = ConfigLoader::new()
            .compose(Some(file), EnvConfig::default(), None, false)
            .unwrap()
            .config;
        assert_eq!(config.tools.vuln_timeout, Duration::from_secs(5400));
        assert_eq!(config.tools.probe_timeout, Duration::from_millis(750));
        assert_eq!(config.websocket.ping_period, Duration::from_secs(20));
    }

    #[test]
    fn bad_duration_names_its_field() {
        let env = EnvConfig {
            ws_write_wait: Some("soon".into()),
            ..EnvConfig::default()
        };
        let err = ConfigLoader::new()
            .compose(None, env, None, false)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::InvalidDuration {
                field: "websocket.write_wait",
                ..
            }
        ));
    }

    #[test]
    fn empty_wrapper_disables_it() {
        let env = EnvConfig {
            ffuf_wrapper: Some(PathBuf::new()),
            ..EnvConfig::default()
        };
        let config = ConfigLoader::new()
            .compose(None, env, None, false)
            .unwrap()
            .config;
        assert_eq!(config.tools.ffuf_wrapper, None);
    }

    #[test]
    fn guard_rails_run_on_composed_config() {
        let env = EnvConfig {
            cors_allowed_origins: Some(vec!["*".into()]),
            ..EnvConfig::default()
        };
        assert!(matches!(
            ConfigLoader::new().compose(None, env, None, false),
            Err(ConfigLoadError::GuardRail(
                ConfigGuardRailError::DangerousCorsWildcard
            ))
        ));
    }
}
