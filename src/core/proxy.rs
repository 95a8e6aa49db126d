//! Reverse proxy transport.
//!
//! Rewrites an admitted inbound request so it targets the resolved backend and
//! hands it to the [`HttpClient`] port. Method, end-to-end headers and the
//! streaming body pass through untouched.
use std::sync::Arc;

use axum::{
    body::Body as AxumBody,
    response::{IntoResponse, Response as AxumResponse},
};
use hyper::{
    HeaderMap, Request, StatusCode, Uri,
    header::{self, HeaderName, HeaderValue},
};

use crate::{
    core::registry::BackendUrl,
    ports::http_client::{HttpClient, HttpClientError},
};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Result of forwarding one request.
#[derive(Debug)]
pub enum ProxyOutcome {
    /// The backend answered; its status may be anything.
    Forwarded(AxumResponse),
    /// The backend could not be reached or did not answer in time.
    UpstreamUnavailable(HttpClientError),
}

impl ProxyOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Forwarded(response) => response.status(),
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn into_response(self) -> AxumResponse {
        match self {
            Self::Forwarded(response) => response,
            Self::UpstreamUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, "Backend service unavailable").into_response()
            }
        }
    }
}

/// Forwards admitted requests to backends.
#[derive(Clone)]
pub struct ReverseProxy {
    client: Arc<dyn HttpClient>,
}

impl ReverseProxy {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// Forward `req` to `backend`. Transport failures are folded into
    /// [`ProxyOutcome::UpstreamUnavailable`] and never escape as errors.
    pub async fn forward(
        &self,
        backend: &BackendUrl,
        req: Request<AxumBody>,
        client_ip: &str,
    ) -> ProxyOutcome {
        let outbound = match prepare_request(backend, req, client_ip) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::error!("Failed to build backend request for {}: {}", backend, e);
                return ProxyOutcome::UpstreamUnavailable(e);
            }
        };

        match self.client.send_request(outbound).await {
            Ok(response) => ProxyOutcome::Forwarded(response),
            Err(e) => {
                tracing::error!(backend = %backend, "Backend request failed: {}", e);
                ProxyOutcome::UpstreamUnavailable(e)
            }
        }
    }
}

/// Re-target `req` at `backend`: absolute URI, backend `Host`, hop-by-hop
/// headers stripped and `X-Forwarded-*` set.
pub fn prepare_request(
    backend: &BackendUrl,
    mut req: Request<AxumBody>,
    client_ip: &str,
) -> Result<Request<AxumBody>, HttpClientError> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();
    let target: Uri = backend
        .join(&path_and_query)
        .parse()
        .map_err(|e| HttpClientError::InvalidRequest(format!("backend URI: {e}")))?;

    let original_host = req
        .headers()
        .get(header::HOST)
        .cloned()
        .or_else(|| {
            req.uri()
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });

    *req.uri_mut() = target;
    let headers = req.headers_mut();
    strip_hop_by_hop(headers);

    let host = HeaderValue::from_str(backend.authority())
        .map_err(|e| HttpClientError::InvalidRequest(format!("backend host: {e}")))?;
    headers.insert(header::HOST, host);

    let forwarded_for = match headers
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        Some(prior) if !prior.is_empty() => format!("{prior}, {client_ip}"),
        _ => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Some(original_host) = original_host {
        headers.insert(X_FORWARDED_HOST, original_host);
    }
    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    Ok(req)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are connection-scoped too
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
