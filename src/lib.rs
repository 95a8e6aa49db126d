//! Sneak Link - a capability gateway that turns share links into sessions.
//!
//! Sneak Link sits in front of self-hosted services (Nextcloud, Immich,
//! Paperless, ...) and only lets a visitor through after they have presented a
//! share link the backend confirms exists. A confirmed "knock" is proxied and,
//! for services that allow it, answered with a signed session cookie so the
//! rest of the visit needs no further knocking.
//!
//! # Request flow
//! 1. The `Host` header selects a [`ServiceDescriptor`](core::ServiceDescriptor);
//!    unknown hosts get 404.
//! 2. A valid session cookie is proxied straight through.
//! 3. Otherwise the path must fall under one of the service's share prefixes
//!    (403 if not), the client must be within its knock budget (429 if not)
//!    and the backend must confirm the share (404 if not).
//! 4. The request is proxied; session-granting services also set a cookie.
//!
//! # Quick Example
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use sneak_link::{
//!     AccessController, HttpClientAdapter, HttpHandler, TracingAuditSink, adapters::router,
//!     config::load_config,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = load_config(Some("config.toml"))?;
//! let client = Arc::new(HttpClientAdapter::new(Duration::from_secs(5))?);
//! let audit = Arc::new(TracingAuditSink::new());
//! let controller = Arc::new(AccessController::from_config(&cfg, client, audit)?);
//! let app = router(Arc::new(HttpHandler::new(controller, true)));
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Decision logic lives in `core` and never touches sockets. `ports` holds the
//! traits at the I/O seams (backend HTTP, audit recording) and `adapters`
//! implements them with hyper, axum and `tracing`.
//!
//! # Error Handling
//! Startup failures are typed ([`ConfigError`](core::ConfigError)) and stop
//! the gateway before it listens. Per-request failures never escape: each one
//! becomes a status code and an audit record.
//!
//! # Concurrency & Data Structures
//! The registry and signing key are immutable after startup and shared via
//! `Arc`. The knock limiter serialises on one short mutex; the audit sink's
//! session table uses `scc::HashMap`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler, NoopAuditSink, TracingAuditSink},
    core::{AccessController, ConfigError},
    ports::{AuditSink, HttpClient},
    utils::GracefulShutdown,
};
