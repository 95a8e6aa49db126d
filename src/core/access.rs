//! Per-request admission state machine.
//!
//! ```text
//! ResolveService ──not found──────────────────────────────▶ DeniedNoCredential (404)
//!      │
//! CheckToken ──valid cookie (session services only)───────▶ Proxied
//!      │ absent / invalid (logged, not fatal)
//! CheckSharePath ──not a share prefix─────────────────────▶ DeniedUnsupportedPath (403)
//!      │
//! AdmissionCheck ──over budget────────────────────────────▶ RateLimited (429)
//!      │
//! Validate ──transport error──────────────────────────────▶ UpstreamUnavailable (500)
//!      │   └─backend says no──────────────────────────────▶ ShareInvalid (404)
//!      │
//! SessionPolicy ──issue cookie if the service grants one──▶ Proxied (502 if the backend drops)
//! ```
//!
//! Token holders never touch the limiter, and the limiter always runs before
//! any validation probe.
use std::{fmt, sync::Arc, time::Duration};

use axum::{
    body::Body as AxumBody,
    response::{IntoResponse, Response as AxumResponse},
};
use hyper::{
    HeaderMap, Request, StatusCode,
    header::{self, HeaderValue},
};
use tokio::time::Instant;

use crate::{
    config::{GatewayConfig, GatewayConfigValidator},
    core::{
        admission::AdmissionLimiter,
        error::ConfigResult,
        proxy::{ProxyOutcome, ReverseProxy},
        registry::{ServiceDescriptor, ServiceRegistry},
        token::{IssuedToken, SigningKey, TokenAuthority},
    },
    ports::{
        audit::{AuditSink, SecurityEventKind},
        http_client::HttpClient,
    },
};

/// Name of the session cookie.
pub const SESSION_COOKIE_NAME: &str = "sneak-link-token";

/// Terminal outcome of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Proxied,
    DeniedNoCredential,
    DeniedUnsupportedPath,
    RateLimited,
    ShareInvalid,
    UpstreamUnavailable,
}

impl AccessDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proxied => "proxied",
            Self::DeniedNoCredential => "denied_no_credential",
            Self::DeniedUnsupportedPath => "denied_unsupported_path",
            Self::RateLimited => "rate_limited",
            Self::ShareInvalid => "share_invalid",
            Self::UpstreamUnavailable => "upstream_unavailable",
        }
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision plus the response to send back.
#[derive(Debug)]
pub struct AccessOutcome {
    pub decision: AccessDecision,
    pub response: AxumResponse,
}

impl AccessOutcome {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }
}

/// Ties registry, tokens, limiter, validation and proxying together.
pub struct AccessController {
    registry: Arc<ServiceRegistry>,
    tokens: TokenAuthority,
    limiter: Arc<AdmissionLimiter>,
    http_client: Arc<dyn HttpClient>,
    proxy: ReverseProxy,
    audit: Arc<dyn AuditSink>,
    session_max_age: Duration,
}

impl AccessController {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        tokens: TokenAuthority,
        limiter: Arc<AdmissionLimiter>,
        http_client: Arc<dyn HttpClient>,
        audit: Arc<dyn AuditSink>,
        session_max_age: Duration,
    ) -> Self {
        Self {
            registry,
            tokens,
            limiter,
            proxy: ReverseProxy::new(http_client.clone()),
            http_client,
            audit,
            session_max_age,
        }
    }

    /// Validate `config` and assemble a controller from it. Refuses to build
    /// without a signing key or with an empty or ambiguous registry.
    pub fn from_config(
        config: &GatewayConfig,
        http_client: Arc<dyn HttpClient>,
        audit: Arc<dyn AuditSink>,
    ) -> ConfigResult<Self> {
        GatewayConfigValidator::validate(config)?;

        let tokens = TokenAuthority::new(SigningKey::new(config.signing_key.as_bytes())?);
        let registry = Arc::new(ServiceRegistry::from_config(&config.services)?);
        let limiter = Arc::new(AdmissionLimiter::new(
            config.rate_limit.requests,
            config.rate_limit.window()?,
        ));

        Ok(Self::new(
            registry,
            tokens,
            limiter,
            http_client,
            audit,
            config.session.max_age()?,
        ))
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.limiter
    }

    /// Run one request through the state machine. Never fails: every path
    /// ends in a response and exactly one access record.
    pub async fn handle(&self, req: Request<AxumBody>, client_ip: &str) -> AccessOutcome {
        let started = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let finish = |decision: AccessDecision, response: AxumResponse| {
            self.audit.record_access(
                client_ip,
                &method,
                &path,
                response.status().as_u16(),
                started.elapsed(),
            );
            AccessOutcome { decision, response }
        };

        let Some(service) = request_host(&req).and_then(|host| self.registry.resolve(&host)) else {
            tracing::debug!(path = %path, "No service bound to request host");
            return finish(
                AccessDecision::DeniedNoCredential,
                (StatusCode::NOT_FOUND, "Service Not Found").into_response(),
            );
        };

        if service.grants_session && self.has_valid_session(req.headers(), client_ip) {
            let outcome = self.proxy.forward(&service.backend, req, client_ip).await;
            return finish(proxied_decision(&outcome), outcome.into_response());
        }

        if !service.is_share_path(&path) {
            return finish(
                AccessDecision::DeniedUnsupportedPath,
                (StatusCode::FORBIDDEN, "Access Denied").into_response(),
            );
        }

        if !self.limiter.allow(client_ip) {
            let details = format!(
                "requests: {}, window: {}",
                self.limiter.request_count(client_ip),
                humantime::format_duration(self.limiter.window())
            );
            self.audit
                .record_security_event(SecurityEventKind::RateLimitExceeded, client_ip, &details);
            return finish(
                AccessDecision::RateLimited,
                (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response(),
            );
        }

        let validation = match service
            .validation
            .validate(self.http_client.as_ref(), &service.backend, &path)
            .await
        {
            Ok(validation) => validation,
            Err(e) => {
                tracing::error!(
                    service = %service.service_type,
                    backend = %service.backend,
                    "Failed to validate share: {}",
                    e
                );
                return finish(
                    AccessDecision::UpstreamUnavailable,
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response(),
                );
            }
        };
        self.audit
            .record_validation(client_ip, &path, validation.valid, validation.status.as_u16());

        let share_details = format!("share: {}, service: {}", path, service.service_type);
        if !validation.valid {
            if validation.status == StatusCode::NOT_FOUND {
                self.audit.record_security_event(
                    SecurityEventKind::InvalidShareAttempt,
                    client_ip,
                    &share_details,
                );
            }
            return finish(
                AccessDecision::ShareInvalid,
                (StatusCode::NOT_FOUND, "Not Found").into_response(),
            );
        }

        let session_cookie = if service.grants_session {
            match self.start_session(service, &path) {
                Ok(cookie) => Some(cookie),
                Err(response) => return finish(AccessDecision::UpstreamUnavailable, response),
            }
        } else {
            None
        };

        self.audit
            .record_security_event(SecurityEventKind::AccessGranted, client_ip, &share_details);

        let outcome = self.proxy.forward(&service.backend, req, client_ip).await;
        let decision = proxied_decision(&outcome);
        let mut response = outcome.into_response();
        if let Some(cookie) = session_cookie {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        finish(decision, response)
    }

    fn has_valid_session(&self, headers: &HeaderMap, client_ip: &str) -> bool {
        // A browser may send several, e.g. a stale one scoped to a parent domain
        let mut rejection = None;
        for token in session_cookies(headers) {
            match self.tokens.verify(token) {
                Ok(_) => return true,
                Err(e) => rejection = Some(e),
            }
        }
        if let Some(e) = rejection {
            self.audit
                .record_security_event(SecurityEventKind::InvalidToken, client_ip, &e.to_string());
        }
        false
    }

    /// Mint a token, report the session and build its `Set-Cookie` value.
    fn start_session(
        &self,
        service: &ServiceDescriptor,
        share_path: &str,
    ) -> Result<HeaderValue, AxumResponse> {
        let internal_error =
            || (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();

        let issued = self.tokens.issue(self.session_max_age).map_err(|e| {
            tracing::error!("Failed to generate token: {}", e);
            internal_error()
        })?;
        let cookie = format_session_cookie(&issued, &service.cookie_domain, self.session_max_age);
        let cookie = HeaderValue::from_str(&cookie).map_err(|e| {
            tracing::error!("Failed to encode session cookie: {}", e);
            internal_error()
        })?;

        self.audit.record_session(
            &issued.digest(),
            share_path,
            &service.service_type,
            issued.claims.expires_at,
        );
        Ok(cookie)
    }
}

fn proxied_decision(outcome: &ProxyOutcome) -> AccessDecision {
    match outcome {
        ProxyOutcome::Forwarded(_) => AccessDecision::Proxied,
        ProxyOutcome::UpstreamUnavailable(_) => AccessDecision::UpstreamUnavailable,
    }
}

/// Hostname the client addressed: `Host` header, else the URI authority
/// (HTTP/2).
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
        .filter(|host| !host.is_empty())
}

/// Every non-empty session cookie value the request carries, in header order.
pub fn session_cookies(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE_NAME && !value.is_empty()).then_some(value)
        })
}

/// `Set-Cookie` value for a freshly issued session.
pub fn format_session_cookie(token: &IssuedToken, domain: &str, max_age: Duration) -> String {
    format!(
        "{SESSION_COOKIE_NAME}={}; Domain={domain}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Lax",
        token.value,
        max_age.as_secs()
    )
}
