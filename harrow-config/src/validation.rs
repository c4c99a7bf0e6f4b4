use axum::http::{Method, header::HeaderName};
use thiserror::Error;

use super::models::{Config, CorsConfig, WebSocketConfig};

/// Above this many concurrent sessions the host is likely to drown in
/// subprocesses.
const HIGH_CONCURRENCY: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },
    #[error(
        "websocket pong_wait ({pong_wait:?}) must be longer than ping_period ({ping_period:?})"
    )]
    HeartbeatWindow {
        ping_period: std::time::Duration,
        pong_wait: std::time::Duration,
    },
    #[error("CORS wildcard origins are not allowed when DEV_MODE is false")]
    DangerousCorsWildcard,
    #[error("invalid CORS configuration: {reason}")]
    InvalidCorsConfig { reason: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    for (field, value) in [
        ("pipeline.max_concurrent_scans", config.pipeline.max_concurrent_scans),
        (
            "pipeline.discovery_queue_capacity",
            config.pipeline.discovery_queue_capacity,
        ),
        ("pipeline.discovery_cap", config.pipeline.discovery_cap),
        ("pipeline.validate_concurrency", config.pipeline.validate_concurrency),
        ("websocket.outbound_buffer", config.websocket.outbound_buffer),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroLimit { field });
        }
    }

    validate_heartbeat(&config.websocket)?;

    if !config.dev_mode && config.cors.is_wildcard_included() {
        return Err(ConfigGuardRailError::DangerousCorsWildcard);
    }
    validate_cors(&config.cors)?;

    if config.pipeline.max_concurrent_scans > HIGH_CONCURRENCY {
        warnings.push_with_hint(
            format!(
                "pipeline.max_concurrent_scans is {}; every session spawns several tool processes",
                config.pipeline.max_concurrent_scans
            ),
            format!("Keep HARROW_MAX_SCANS at or below {HIGH_CONCURRENCY} unless the host is sized for it"),
        );
    }

    match &config.tools.ffuf_wrapper {
        Some(wrapper) if !wrapper.exists() => warnings.push_with_hint(
            format!(
                "fuzzer wrapper {} not found; ffuf will be invoked directly",
                wrapper.display()
            ),
            "Set FFUF_WRAPPER or tools.ffuf_wrapper to the wrapper script path",
        ),
        None => warnings.push(
            "No fuzzer wrapper configured; ffuf will be invoked directly",
        ),
        _ => {}
    }

    if config.websocket.write_wait >= config.websocket.pong_wait {
        warnings.push(
            "websocket.write_wait is not shorter than pong_wait; slow peers may hold a writer past their heartbeat deadline",
        );
    }

    Ok(warnings)
}

fn validate_heartbeat(
    websocket: &WebSocketConfig,
) -> Result<(), ConfigGuardRailError> {
    if websocket.ping_period.is_zero() {
        return Err(ConfigGuardRailError::ZeroLimit {
            field: "websocket.ping_period",
        });
    }
    if websocket.write_wait.is_zero() {
        return Err(ConfigGuardRailError::ZeroLimit {
            field: "websocket.write_wait",
        });
    }
    if websocket.pong_wait <= websocket.ping_period {
        return Err(ConfigGuardRailError::HeartbeatWindow {
            ping_period: websocket.ping_period,
            pong_wait: websocket.pong_wait,
        });
    }
    Ok(())
}

fn validate_cors(cors: &CorsConfig) -> Result<(), ConfigGuardRailError> {
    if cors.allowed_methods.is_empty() {
        return Err(ConfigGuardRailError::InvalidCorsConfig {
            reason:
                "CORS_ALLOWED_METHODS must include at least one HTTP method"
                    .into(),
        });
    }

    for method in &cors.allowed_methods {
        Method::from_bytes(method.as_bytes()).map_err(|_| {
            ConfigGuardRailError::InvalidCorsConfig {
                reason: format!(
                    "invalid HTTP method `{}` in CORS_ALLOWED_METHODS",
                    method
                ),
            }
        })?;
    }

    for header in &cors.allowed_headers {
        HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
            ConfigGuardRailError::InvalidCorsConfig {
                reason: format!(
                    "invalid header name `{}` in CORS_ALLOWED_HEADERS",
                    header
                ),
            }
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.tools.ffuf_wrapper = None;
        config
    }

    #[test]
    fn defaults_pass_with_only_warnings() {
        let warnings = apply_guard_rails(&config()).unwrap();
        assert_eq!(warnings.items.len(), 1);
        assert!(warnings.items[0].message.contains("wrapper"));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = config();
        config.pipeline.validate_concurrency = 0;
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::ZeroLimit {
                field: "pipeline.validate_concurrency"
            })
        ));
    }

    #[test]
    fn pong_wait_must_exceed_ping_period() {
        let mut config = config();
        config.websocket.pong_wait = Duration::from_secs(30);
        config.websocket.ping_period = Duration::from_secs(30);
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::HeartbeatWindow { .. })
        ));
    }

    #[test]
    fn wildcard_origin_requires_dev_mode() {
        let mut config = config();
        config.cors.allowed_origins = vec!["*".into()];
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::DangerousCorsWildcard)
        ));

        config.dev_mode = true;
        assert!(apply_guard_rails(&config).is_ok());
    }

    #[test]
    fn malformed_cors_method_is_rejected() {
        let mut config = config();
        config.cors.allowed_methods = vec!["GE T".into()];
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::InvalidCorsConfig { .. })
        ));
    }

    #[test]
    fn high_concurrency_is_flagged() {
        let mut config = config();
        config.pipeline.max_concurrent_scans = 64;
        let warnings = apply_guard_rails(&config).unwrap();
        assert!(
            warnings
                .items
                .iter()
                .any(|w| w.message.contains("max_concurrent_scans"))
        );
    }
}
