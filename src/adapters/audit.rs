//! Audit sink adapters.
//!
//! [`TracingAuditSink`] turns audit records into structured `tracing` events
//! and `metrics` updates, and keeps a digest-keyed table of live sessions for
//! the active-session gauge. [`NoopAuditSink`] discards everything.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use scc::HashMap;
use tokio_util::sync::CancellationToken;

use crate::{
    metrics,
    ports::audit::{AuditSink, SecurityEventKind},
    utils::periodic::PeriodicTask,
};

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record_access(&self, _: &str, _: &str, _: &str, _: u16, _: Duration) {}
    fn record_security_event(&self, _: SecurityEventKind, _: &str, _: &str) {}
    fn record_validation(&self, _: &str, _: &str, _: bool, _: u16) {}
    fn record_session(&self, _: &str, _: &str, _: &str, _: DateTime<Utc>) {}
}

#[derive(Debug, Clone)]
struct SessionEntry {
    service: String,
    expires_at: DateTime<Utc>,
}

/// Structured-log and metrics audit sink.
pub struct TracingAuditSink {
    sessions: HashMap<String, SessionEntry>,
    services: BTreeSet<String>,
    started: Instant,
}

impl TracingAuditSink {
    pub fn new() -> Self {
        Self::with_services(std::iter::empty::<String>())
    }

    /// Pre-register service types so their session gauge reports zero rather
    /// than going missing.
    pub fn with_services<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sessions: HashMap::new(),
            services: services.into_iter().map(Into::into).collect(),
            started: Instant::now(),
        }
    }

    /// Sessions recorded and not yet pruned.
    pub fn tracked_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Drop expired sessions and republish the session and uptime gauges.
    /// Returns the number of live sessions.
    pub fn refresh_sessions(&self) -> usize {
        self.refresh_sessions_at(Utc::now())
    }

    pub fn refresh_sessions_at(&self, now: DateTime<Utc>) -> usize {
        let mut per_service: BTreeMap<String, usize> =
            self.services.iter().map(|s| (s.clone(), 0)).collect();

        self.sessions.retain_sync(|_, entry| {
            let live = entry.expires_at > now;
            if live {
                *per_service.entry(entry.service.clone()).or_default() += 1;
            }
            live
        });

        let total: usize = per_service.values().sum();
        for (service, count) in &per_service {
            metrics::set_active_sessions(service, *count);
        }
        metrics::set_active_sessions("total", total);
        metrics::set_uptime(self.started.elapsed());

        total
    }

    /// Refresh the gauges every `period` until cancelled.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        period: Duration,
        parent: &CancellationToken,
    ) -> PeriodicTask {
        let sink = Arc::clone(self);
        PeriodicTask::spawn("session_refresh", period, parent, move || {
            let live = sink.refresh_sessions();
            tracing::trace!(active_sessions = live, "Refreshed session gauges");
        })
    }
}

impl Default for TracingAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for TracingAuditSink {
    fn record_access(&self, ip: &str, method: &str, path: &str, status: u16, duration: Duration) {
        tracing::info!(
            r#type = "access",
            ip,
            method,
            path,
            status,
            duration = duration.as_millis() as u64,
            "HTTP request"
        );
        metrics::record_http_request(method, status, duration);
    }

    fn record_security_event(&self, kind: SecurityEventKind, ip: &str, details: &str) {
        tracing::warn!(
            r#type = "security",
            event = kind.as_str(),
            ip,
            details,
            "Security event"
        );
        metrics::increment_security_event(kind.as_str());
        if kind == SecurityEventKind::RateLimitExceeded {
            metrics::increment_rate_limit_hits();
        }
    }

    fn record_validation(&self, ip: &str, share_path: &str, valid: bool, backend_status: u16) {
        tracing::info!(
            r#type = "validation",
            ip,
            share_path,
            valid,
            status = backend_status,
            "Share validation"
        );
        metrics::increment_share_validation(valid);
    }

    fn record_session(
        &self,
        token_digest: &str,
        share_path: &str,
        service: &str,
        expires_at: DateTime<Utc>,
    ) {
        tracing::info!(
            r#type = "session",
            token_digest,
            share_path,
            service,
            expires_at = %expires_at.to_rfc3339(),
            "Session issued"
        );
        let _ = self.sessions.insert_sync(
            token_digest.to_string(),
            SessionEntry {
                service: service.to_string(),
                expires_at,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn test_refresh_prunes_expired_sessions() {
        let sink = TracingAuditSink::with_services(["nextcloud", "immich"]);
        let now = Utc::now();

        sink.record_session("d1", "/s/a", "nextcloud", now + TimeDelta::minutes(5));
        sink.record_session("d2", "/s/b", "nextcloud", now - TimeDelta::seconds(1));
        sink.record_session("d3", "/share/c", "immich", now + TimeDelta::hours(1));
        assert_eq!(sink.tracked_sessions(), 3);

        assert_eq!(sink.refresh_sessions_at(now), 2);
        assert_eq!(sink.tracked_sessions(), 2);

        assert_eq!(sink.refresh_sessions_at(now + TimeDelta::minutes(10)), 1);
        assert_eq!(sink.refresh_sessions_at(now + TimeDelta::hours(2)), 0);
    }

    #[test]
    fn test_record_methods_do_not_panic() {
        let sink = TracingAuditSink::new();
        sink.record_access("127.0.0.1", "GET", "/s/x", 200, Duration::from_millis(3));
        sink.record_security_event(SecurityEventKind::RateLimitExceeded, "127.0.0.1", "requests: 10");
        sink.record_validation("127.0.0.1", "/s/x", true, 200);

        let noop = NoopAuditSink;
        noop.record_access("127.0.0.1", "GET", "/", 404, Duration::ZERO);
    }

    #[test]
    fn test_security_event_kind_names() {
        assert_eq!(SecurityEventKind::InvalidToken.as_str(), "invalid_token");
        assert_eq!(SecurityEventKind::RateLimitExceeded.to_string(), "rate_limit_exceeded");
        assert_eq!(
            SecurityEventKind::InvalidShareAttempt.as_str(),
            "invalid_share_attempt"
        );
        assert_eq!(SecurityEventKind::AccessGranted.as_str(), "access_granted");
    }
}
