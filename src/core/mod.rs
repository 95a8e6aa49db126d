pub mod access;
pub mod admission;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod token;
pub mod validation;

pub use access::{AccessController, AccessDecision, AccessOutcome};
pub use admission::AdmissionLimiter;
pub use error::{ConfigError, ConfigResult};
pub use proxy::{ProxyOutcome, ReverseProxy};
pub use registry::{BackendUrl, ServiceDescriptor, ServiceRegistry};
pub use token::{SigningKey, TokenAuthority};
pub use validation::ValidationStrategy;
