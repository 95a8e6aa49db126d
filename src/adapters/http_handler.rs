use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body as AxumBody,
    extract::{ConnectInfo, Request},
    http::HeaderMap,
    routing::any,
};
use hyper::Response;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{
    core::access::AccessController, metrics::InFlightGuard, tracing_setup::create_request_span,
};

/// Client identity used when neither headers nor the socket reveal one.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Inbound HTTP surface of the gateway
#[derive(Clone)]
pub struct HttpHandler {
    controller: Arc<AccessController>,
    trust_forwarded_headers: bool,
}

impl HttpHandler {
    pub fn new(controller: Arc<AccessController>, trust_forwarded_headers: bool) -> Self {
        Self {
            controller,
            trust_forwarded_headers,
        }
    }

    pub fn controller(&self) -> &Arc<AccessController> {
        &self.controller
    }

    /// Resolve the client identity and run the request through the access
    /// controller. Always produces a response.
    pub async fn handle_request(
        &self,
        req: Request,
        client_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let _in_flight = InFlightGuard::new();
        let ip = client_ip(req.headers(), client_addr, self.trust_forwarded_headers);

        tracing::debug!("Handling {} request to {}", req.method(), req.uri().path());

        let outcome = self.controller.handle(req, &ip).await;
        tracing::debug!(
            decision = %outcome.decision,
            status = outcome.status().as_u16(),
            "Request finished"
        );
        outcome.response
    }
}

/// Client identity: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// socket peer. Forwarded headers are ignored unless trusted; trusting them
/// without a proxy that overwrites them lets a client pick its own identity.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded_for = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded_for {
            return ip.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Catch-all router. Every path on every host goes through the handler.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// peer address is available as a fallback identity.
pub fn router(handler: Arc<HttpHandler>) -> Router {
    let make_route = |handler: Arc<HttpHandler>| {
        any(move |req: Request| {
            let handler = handler.clone();
            async move {
                let peer = req
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| *addr);
                handler.handle_request(req, peer).await
            }
        })
    };

    Router::new()
        .route("/{*path}", make_route(handler.clone()))
        .route("/", make_route(handler))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<AxumBody>| {
                create_request_span(
                    req.method().as_str(),
                    &req.uri().to_string(),
                    &Uuid::new_v4().to_string(),
                )
            }),
        )
}
