//! Hostname routing table.
//!
//! The registry maps each configured hostname to exactly one
//! [`ServiceDescriptor`]. It is built once at startup and never mutated, so
//! request tasks read it through a shared `Arc` without locking.
use std::{collections::HashMap, fmt, str::FromStr};

use thiserror::Error;
use url::Url;

use crate::{
    config::ServiceConfig,
    core::{
        error::{ConfigError, ConfigResult},
        validation::ValidationStrategy,
    },
};

/// Errors related to backend URLs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    /// Error when URL is invalid
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A validated `http(s)://host[:port][/prefix]` backend base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUrl {
    url: Url,
    /// `host[:port]`, used as the outbound `Host` header
    authority: String,
    /// Path prefix without a trailing slash (often empty)
    base_path: String,
}

impl BackendUrl {
    /// Parse and validate a backend base URL.
    pub fn new(raw: &str) -> BackendResult<Self> {
        let url = Url::parse(raw)
            .map_err(|e| BackendError::InvalidUrl(format!("{raw}: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(BackendError::InvalidUrl(format!(
                "Backend URL must start with http:// or https://, got: {raw}"
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BackendError::InvalidUrl(format!("{raw}: missing host")))?;

        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let base_path = url.path().trim_end_matches('/').to_string();

        Ok(Self {
            url,
            authority,
            base_path,
        })
    }

    /// Host name without port.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// `host[:port]` as it should appear in a `Host` header.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Absolute URL for `path_and_query` on this backend, keeping any base
    /// path prefix.
    pub fn join(&self, path_and_query: &str) -> String {
        let separator = if path_and_query.starts_with('/') { "" } else { "/" };
        format!(
            "{}://{}{}{}{}",
            self.url.scheme(),
            self.authority,
            self.base_path,
            separator,
            path_and_query
        )
    }
}

impl FromStr for BackendUrl {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for BackendUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Defaults for a known share-issuing application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProfile {
    pub share_paths: &'static [&'static str],
    pub validation: &'static str,
    pub grants_session: bool,
}

/// Built-in profiles keyed by service type.
pub fn builtin_profile(service_type: &str) -> Option<ServiceProfile> {
    match service_type.to_ascii_lowercase().as_str() {
        "nextcloud" => Some(ServiceProfile {
            share_paths: &["/s/"],
            validation: "head",
            grants_session: true,
        }),
        "immich" => Some(ServiceProfile {
            share_paths: &["/share/"],
            validation: "api_key",
            grants_session: true,
        }),
        // Document shares hand out one file; no browsing session
        "paperless" => Some(ServiceProfile {
            share_paths: &["/share/"],
            validation: "head",
            grants_session: false,
        }),
        _ => None,
    }
}

/// Everything the access controller needs to know about one hostname.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub hostname: String,
    pub backend: BackendUrl,
    pub service_type: String,
    pub share_paths: Vec<String>,
    pub validation: ValidationStrategy,
    /// Issue a session cookie after a successful knock (otherwise proxy the
    /// knock itself and nothing more)
    pub grants_session: bool,
    pub cookie_domain: String,
}

impl ServiceDescriptor {
    pub fn new(
        hostname: &str,
        backend: BackendUrl,
        service_type: &str,
        share_paths: Vec<String>,
        validation: ValidationStrategy,
        grants_session: bool,
    ) -> Self {
        let cookie_domain = backend.host().to_string();
        Self {
            hostname: normalize_hostname(hostname),
            backend,
            service_type: service_type.to_string(),
            share_paths,
            validation,
            grants_session,
            cookie_domain,
        }
    }

    /// Build a descriptor from configuration, merging the built-in profile for
    /// the service type with any explicit overrides.
    pub fn from_config(config: &ServiceConfig) -> ConfigResult<Self> {
        let backend = BackendUrl::new(&config.url).map_err(|source| ConfigError::InvalidBackend {
            hostname: config.hostname.clone(),
            source,
        })?;
        let profile = builtin_profile(&config.service_type);

        let share_paths = match (&config.share_paths, profile) {
            (Some(paths), _) if !paths.is_empty() => paths.clone(),
            (_, Some(profile)) => profile.share_paths.iter().map(|p| p.to_string()).collect(),
            _ => {
                return Err(ConfigError::UnknownServiceType {
                    hostname: config.hostname.clone(),
                    service_type: config.service_type.clone(),
                });
            }
        };

        let method = config
            .validation
            .as_deref()
            .or(profile.map(|p| p.validation));
        let validation = ValidationStrategy::from_method(method, &share_paths);
        let grants_session = config
            .grants_session
            .or(profile.map(|p| p.grants_session))
            .unwrap_or(true);

        let mut descriptor = Self::new(
            &config.hostname,
            backend,
            &config.service_type,
            share_paths,
            validation,
            grants_session,
        );
        if let Some(domain) = &config.cookie_domain {
            descriptor.cookie_domain = domain.clone();
        }
        Ok(descriptor)
    }

    /// Whether `path` falls under one of this service's share prefixes.
    ///
    /// Paths a backend would rewrite before routing (dot segments, encoded
    /// separators) never qualify, so the path checked here is the path the
    /// backend validates.
    pub fn is_share_path(&self, path: &str) -> bool {
        is_canonical_path(path)
            && self.share_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// True when no segment of `path` is `.` or `..` (plain or percent-encoded)
/// and no segment hides a separator as `%2f`, `%5c` or `\`.
pub fn is_canonical_path(path: &str) -> bool {
    path.split('/').all(|segment| {
        let lowered = segment.to_ascii_lowercase();
        if lowered.contains("%2f") || lowered.contains("%5c") || lowered.contains('\\') {
            return false;
        }
        let decoded = lowered.replace("%2e", ".");
        decoded != "." && decoded != ".."
    })
}

/// Immutable hostname → service table.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceDescriptor>,
}

impl ServiceRegistry {
    /// Build a registry, refusing an empty set or a repeated hostname.
    pub fn new(descriptors: impl IntoIterator<Item = ServiceDescriptor>) -> ConfigResult<Self> {
        let mut services = HashMap::new();
        for descriptor in descriptors {
            let hostname = descriptor.hostname.clone();
            if services.insert(hostname.clone(), descriptor).is_some() {
                return Err(ConfigError::DuplicateHostname(hostname));
            }
        }
        if services.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        Ok(Self { services })
    }

    pub fn from_config(services: &[ServiceConfig]) -> ConfigResult<Self> {
        let descriptors = services
            .iter()
            .map(ServiceDescriptor::from_config)
            .collect::<ConfigResult<Vec<_>>>()?;
        Self::new(descriptors)
    }

    /// Look up the service bound to `hostname`. A `Host` header value with a
    /// port is accepted; matching is case-insensitive.
    pub fn resolve(&self, hostname: &str) -> Option<&ServiceDescriptor> {
        self.services.get(&normalize_hostname(hostname))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }
}

/// Lowercase, drop a trailing dot and any `:port` suffix.
pub fn normalize_hostname(host: &str) -> String {
    let host = host.trim();
    let without_port = if host.starts_with('[') {
        // [v6]:port
        host.find(']').map_or(host, |end| &host[..=end])
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
                name
            }
            _ => host,
        }
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_config(hostname: &str, service_type: &str, url: &str) -> ServiceConfig {
        ServiceConfig {
            hostname: hostname.to_string(),
            service_type: service_type.to_string(),
            url: url.to_string(),
            share_paths: None,
            validation: None,
            grants_session: None,
            cookie_domain: None,
        }
    }

    #[test]
    fn test_share_path_refuses_dot_segments() {
        let service = ServiceDescriptor::from_config(&service_config(
            "cloud.test",
            "nextcloud",
            "http://cloud.internal",
        ))
        .unwrap();

        assert!(service.is_share_path("/s/abc123"));
        assert!(service.is_share_path("/s/abc.def"));
        assert!(service.is_share_path("/s/abc/download"));

        for path in [
            "/s/../login",
            "/s/./../status.php",
            "/s/%2e%2e/login",
            "/s/%2E./login",
            "/s/.%2e/index.php",
            "/s/abc%2f..%2flogin",
            "/s/abc%5C..%5Clogin",
            "/s/abc\\..\\login",
            "/s/abc/..",
        ] {
            assert!(!service.is_share_path(path), "{path} must not count as a share");
        }
    }

    #[test]
    fn test_canonical_path() {
        assert!(is_canonical_path("/"));
        assert!(is_canonical_path("/s/x.y..z"));
        assert!(is_canonical_path("/s/...")); // not a dot segment
        assert!(!is_canonical_path("/./s/x"));
        assert!(!is_canonical_path("/s/x/%2e"));
    }

    #[test]
    fn test_backend_url_validation() {
        assert!(BackendUrl::new("http://cloud.internal:8080").is_ok());
        assert!(BackendUrl::new("https://cloud.internal").is_ok());
        assert!(BackendUrl::new("ftp://cloud.internal").is_err());
        assert!(BackendUrl::new("cloud.internal").is_err());
        assert!(BackendUrl::new("").is_err());
    }

    #[test]
    fn test_backend_url_join_and_authority() {
        let backend = BackendUrl::new("http://cloud.internal:8080/").unwrap();
        assert_eq!(backend.authority(), "cloud.internal:8080");
        assert_eq!(backend.host(), "cloud.internal");
        assert_eq!(backend.join("/s/abc?x=1"), "http://cloud.internal:8080/s/abc?x=1");

        let prefixed = BackendUrl::new("https://example.org/nextcloud/").unwrap();
        assert_eq!(prefixed.authority(), "example.org");
        assert_eq!(prefixed.join("/s/abc"), "https://example.org/nextcloud/s/abc");
    }

    #[test]
    fn test_builtin_profiles() {
        let nextcloud = builtin_profile("nextcloud").unwrap();
        assert_eq!(nextcloud.share_paths, &["/s/"]);
        assert!(nextcloud.grants_session);

        assert_eq!(builtin_profile("Immich").unwrap().validation, "api_key");
        assert!(!builtin_profile("paperless").unwrap().grants_session);
        assert!(builtin_profile("gitea").is_none());
    }

    #[test]
    fn test_descriptor_from_builtin_profile() {
        let descriptor = ServiceDescriptor::from_config(&service_config(
            "Photos.Example.com",
            "immich",
            "http://immich:2283",
        ))
        .unwrap();

        assert_eq!(descriptor.hostname, "photos.example.com");
        assert_eq!(descriptor.share_paths, vec!["/share/".to_string()]);
        assert!(matches!(
            descriptor.validation,
            ValidationStrategy::ApiKeyProbe { .. }
        ));
        assert!(descriptor.grants_session);
        assert_eq!(descriptor.cookie_domain, "immich");
    }

    #[test]
    fn test_descriptor_overrides() {
        let mut config = service_config("git.example.com", "gitea", "http://gitea:3000");
        assert!(matches!(
            ServiceDescriptor::from_config(&config),
            Err(ConfigError::UnknownServiceType { .. })
        ));

        config.share_paths = Some(vec!["/shared/".to_string()]);
        config.validation = Some("carrier-pigeon".to_string());
        config.cookie_domain = Some("example.com".to_string());
        let descriptor = ServiceDescriptor::from_config(&config).unwrap();
        assert_eq!(descriptor.validation, ValidationStrategy::HeadProbe);
        assert!(descriptor.grants_session);
        assert_eq!(descriptor.cookie_domain, "example.com");
        assert!(descriptor.is_share_path("/shared/xyz"));
        assert!(!descriptor.is_share_path("/s/xyz"));
    }

    #[test]
    fn test_registry_rejects_empty_and_duplicates() {
        assert!(matches!(
            ServiceRegistry::from_config(&[]),
            Err(ConfigError::EmptyRegistry)
        ));

        let configs = vec![
            service_config("cloud.example.com", "nextcloud", "http://a"),
            service_config("CLOUD.example.com", "nextcloud", "http://b"),
        ];
        assert!(matches!(
            ServiceRegistry::from_config(&configs),
            Err(ConfigError::DuplicateHostname(host)) if host == "cloud.example.com"
        ));
    }

    #[test]
    fn test_registry_rejects_bad_backend() {
        let configs = vec![service_config("cloud.example.com", "nextcloud", "not a url")];
        assert!(matches!(
            ServiceRegistry::from_config(&configs),
            Err(ConfigError::InvalidBackend { .. })
        ));
    }

    #[test]
    fn test_resolve() {
        let registry = ServiceRegistry::from_config(&[
            service_config("cloud.example.com", "nextcloud", "http://nextcloud"),
            service_config("docs.example.com", "paperless", "http://paperless:8000"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.resolve("cloud.example.com").unwrap().service_type,
            "nextcloud"
        );
        assert!(registry.resolve("Cloud.Example.com:443").is_some());
        assert!(registry.resolve("cloud.example.com.").is_some());
        assert!(registry.resolve("unknown.example.com").is_none());
        assert!(registry.resolve("").is_none());
    }

    #[test]
    fn test_normalize_hostname() {
        assert_eq!(normalize_hostname("Example.COM:8080"), "example.com");
        assert_eq!(normalize_hostname("example.com"), "example.com");
        assert_eq!(normalize_hostname("[::1]:8080"), "[::1]");
        assert_eq!(normalize_hostname("::1"), "::1");
    }
}
