use std::{collections::HashSet, net::SocketAddr};

use crate::{
    config::models::{GatewayConfig, ServiceConfig},
    core::registry::{builtin_profile, normalize_hostname},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Hostname conflict detected: {message}")]
    HostnameConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Signing keys shorter than this still work but are flagged.
pub const RECOMMENDED_KEY_BYTES: usize = 32;

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, reporting every problem at once.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.signing_key.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "signing_key".to_string(),
            });
        } else if config.signing_key.len() < RECOMMENDED_KEY_BYTES {
            tracing::warn!(
                "signing_key is {} bytes; at least {} are recommended",
                config.signing_key.len(),
                RECOMMENDED_KEY_BYTES
            );
        }

        if config.services.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "services".to_string(),
            });
        } else {
            for (i, service) in config.services.iter().enumerate() {
                errors.extend(Self::validate_service(i, service));
            }
            errors.extend(Self::check_hostname_conflicts(&config.services));
        }

        if config.rate_limit.requests == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.requests".to_string(),
                message: "Request budget must be greater than 0".to_string(),
            });
        }

        let durations = [
            config.session.max_age(),
            config.rate_limit.window(),
            config.backend.timeout(),
            config.shutdown.grace_period(),
            config.metrics.refresh_interval(),
        ];
        let fields = [
            "session.max_age",
            "rate_limit.window",
            "backend.timeout",
            "shutdown.grace_period",
            "metrics.refresh_interval",
        ];
        for (result, field) in durations.into_iter().zip(fields) {
            match result {
                Ok(d) if d.is_zero() => errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "Duration must be greater than 0".to_string(),
                }),
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_service(index: usize, service: &ServiceConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let label = if service.hostname.is_empty() {
            format!("services[{index}]")
        } else {
            format!("service '{}'", service.hostname)
        };

        if service.hostname.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("services[{index}].hostname"),
            });
        }

        if let Err(e) = Self::validate_url(&service.url, &format!("{label} url")) {
            errors.push(e);
        }

        match &service.share_paths {
            Some(paths) if !paths.is_empty() => {
                for path in paths {
                    if !path.starts_with('/') {
                        errors.push(ValidationError::InvalidField {
                            field: format!("{label} share_paths"),
                            message: format!("Share path '{path}' must start with '/'"),
                        });
                    }
                }
            }
            _ => {
                if builtin_profile(&service.service_type).is_none() {
                    errors.push(ValidationError::InvalidField {
                        field: format!("{label} type"),
                        message: format!(
                            "Unknown service type '{}' requires explicit share_paths",
                            service.service_type
                        ),
                    });
                }
            }
        }

        errors
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn check_hostname_conflicts(services: &[ServiceConfig]) -> Vec<ValidationError> {
        let mut seen = HashSet::new();
        let mut errors = Vec::new();
        for service in services {
            let host = normalize_hostname(&service.hostname);
            if host.is_empty() {
                continue;
            }
            if !seen.insert(host.clone()) {
                errors.push(ValidationError::HostnameConflict {
                    message: format!("hostname '{host}' is configured more than once"),
                });
            }
        }
        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
