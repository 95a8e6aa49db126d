use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, StatusCode, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter using Hyper with Rustls.
///
/// Responsibilities:
/// * Sends proxied requests as-is; `Host` and forwarding headers are set by
///   the proxy before they reach this adapter
/// * Bounds every backend call with the configured timeout
/// * Performs `HEAD` share probes, draining the response body
/// * Converts between Hyper body and Axum body types
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    timeout: Duration,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter whose calls give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(timeout));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!(timeout = ?timeout, "Created backend HTTP client");
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        if req.uri().host().is_none() {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        }

        let span = tracing::debug_span!(
            "backend_request",
            http.method = %req.method(),
            http.uri = %req.uri(),
            http.status_code = tracing::field::Empty,
        );

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        tracing::debug!("Outgoing request headers: {:?}", parts.headers);

        let pending = self
            .client
            .request(Request::from_parts(parts, body))
            .instrument(span.clone());

        match timeout(self.timeout, pending).await {
            Ok(Ok(response)) => {
                span.record("http.status_code", response.status().as_u16());

                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed by the downstream server
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Ok(Err(e)) => {
                span.record("http.status_code", 599u16);
                tracing::error!("Error making request to backend ({} {}): {}", method, uri, e);
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!("Backend request {} {} timed out", method, uri);
                Err(HttpClientError::Timeout(self.timeout))
            }
        }
    }

    async fn probe(&self, url: &str) -> HttpClientResult<StatusCode> {
        let request = Request::builder()
            .method(Method::HEAD)
            .uri(url)
            .version(Version::HTTP_11)
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        tracing::debug!("Probing URL: {}", url);

        match timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                // Consume the body to release the connection
                let _ = response.into_body().collect().await;
                tracing::debug!("Probe of {} answered {}", url, status);
                Ok(status)
            }
            Ok(Err(e)) => {
                tracing::debug!("Probe error for {}: {}", url, e);
                Err(HttpClientError::ConnectionError(format!(
                    "Probe of {url} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::debug!("Probe timeout for {}", url);
                Err(HttpClientError::Timeout(self.timeout))
            }
        }
    }
}
