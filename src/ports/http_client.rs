use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the backend does not answer in time
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to backends.
///
/// Implementations bound every call with a timeout. Dropping the returned
/// future cancels the outbound request.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to a backend server
    ///
    /// # Arguments
    /// * `req` - The fully addressed request to send (absolute URI)
    ///
    /// # Returns
    /// The backend's response with a streaming body, or a transport error
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;

    /// Issue a bodiless `HEAD` to `url` and report the status code
    ///
    /// Any status, including 4xx and 5xx, is `Ok`; only transport failures
    /// are errors.
    async fn probe(&self, url: &str) -> HttpClientResult<StatusCode>;
}
