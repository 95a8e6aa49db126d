pub mod audit;
pub mod http_client;

pub use audit::{AuditSink, SecurityEventKind};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
