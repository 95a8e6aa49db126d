use thiserror::Error;

use crate::{config::ValidationError, core::registry::BackendError};

/// Startup-time failures. Any of these keeps the gateway from accepting traffic.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// The HMAC signing key is absent or empty
    #[error("signing key is missing or empty")]
    MissingSigningKey,

    /// No hostname is bound to a backend
    #[error("service registry is empty; at least one service must be configured")]
    EmptyRegistry,

    /// Two services claim the same hostname
    #[error("hostname '{0}' is configured more than once")]
    DuplicateHostname(String),

    /// A service's backend URL could not be used
    #[error("service '{hostname}': {source}")]
    InvalidBackend {
        hostname: String,
        #[source]
        source: BackendError,
    },

    /// A service type without a built-in profile that also lacks share paths
    #[error("service '{hostname}' has unknown type '{service_type}' and no share_paths")]
    UnknownServiceType {
        hostname: String,
        service_type: String,
    },

    /// The configuration failed field-level validation
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Result type for startup construction
pub type ConfigResult<T> = Result<T, ConfigError>;
