//! Configuration data structures for Sneak Link.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! to `SNEAK_LINK__*` environment variables. Every section has defaults so that
//! a minimal config only needs a signing key and one service.
//! Durations are humantime strings (`"24h"`, `"5m"`, `"500ms"`).
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::validation::{ValidationError, ValidationResult};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}

/// Parse a humantime duration, naming the offending field on failure.
pub(crate) fn parse_duration(field: &str, raw: &str) -> ValidationResult<Duration> {
    humantime::parse_duration(raw).map_err(|e| ValidationError::InvalidField {
        field: field.to_string(),
        message: format!("'{raw}' is not a valid duration: {e}"),
    })
}

/// Main gateway configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Socket address the inbound listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// HMAC key for session tokens
    #[serde(default)]
    pub signing_key: String,

    /// Hostname to backend bindings
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub client_ip: ClientIpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            signing_key: String::new(),
            services: Vec::new(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            backend: BackendConfig::default(),
            client_ip: ClientIpConfig::default(),
            logging: LoggingConfig::default(),
            shutdown: ShutdownConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// One hostname bound to one backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Public hostname (case-insensitive)
    pub hostname: String,
    /// Service type; selects a built-in profile (`nextcloud`, `immich`, `paperless`)
    #[serde(rename = "type")]
    pub service_type: String,
    /// Backend base URL, `http(s)://host[:port][/prefix]`
    pub url: String,
    /// Overrides the profile's share path prefixes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_paths: Option<Vec<String>>,
    /// Overrides the profile's validation method (`head`, `api_key`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
    /// Overrides whether a successful knock mints a session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grants_session: Option<bool>,
    /// Cookie `Domain`; defaults to the backend host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_domain: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Session lifetime, also the cookie `Max-Age`
    pub max_age: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age: "24h".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn max_age(&self) -> ValidationResult<Duration> {
        parse_duration("session.max_age", &self.max_age)
    }
}

/// Knock budget per client identity.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests: usize,
    pub window: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 10,
            window: "5m".to_string(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> ValidationResult<Duration> {
        parse_duration("rate_limit.window", &self.window)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Bound on every probe and on the wait for proxied response headers
    pub timeout: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout: "5s".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> ValidationResult<Duration> {
        parse_duration("backend.timeout", &self.timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientIpConfig {
    /// Honour `X-Forwarded-For` / `X-Real-IP` before the socket peer.
    ///
    /// Only safe when every request arrives through a trusted reverse proxy
    /// that overwrites these headers. A client that reaches the gateway
    /// directly can send a fresh `X-Forwarded-For` on each knock and get a
    /// new knock budget every time; set this to `false` for such deployments.
    #[serde(default = "default_true")]
    pub trust_forwarded_headers: bool,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_headers: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight requests may drain after a shutdown signal
    pub grace_period: String,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: "30s".to_string(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> ValidationResult<Duration> {
        parse_duration("shutdown.grace_period", &self.grace_period)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Period of the session gauge refresh
    pub refresh_interval: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            refresh_interval: "10s".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn refresh_interval(&self) -> ValidationResult<Duration> {
        parse_duration("metrics.refresh_interval", &self.refresh_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.session.max_age().unwrap(), Duration::from_secs(24 * 3600));
        assert_eq!(config.rate_limit.requests, 10);
        assert_eq!(config.rate_limit.window().unwrap(), Duration::from_secs(300));
        assert_eq!(config.backend.timeout().unwrap(), Duration::from_secs(5));
        assert!(config.client_ip.trust_forwarded_headers);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.json);
        assert_eq!(config.shutdown.grace_period().unwrap(), Duration::from_secs(30));
        assert_eq!(config.metrics.refresh_interval().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_bad_duration_names_field() {
        let session = SessionConfig {
            max_age: "forever".to_string(),
        };
        match session.max_age() {
            Err(ValidationError::InvalidField { field, .. }) => {
                assert_eq!(field, "session.max_age")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_service_type_field_is_renamed() {
        let json = r#"{"hostname": "a.example", "type": "nextcloud", "url": "http://nc:80"}"#;
        let service: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(service.service_type, "nextcloud");
        assert!(service.share_paths.is_none());
        assert!(service.grants_session.is_none());
    }
}
