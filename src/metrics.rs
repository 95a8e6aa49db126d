//! Lightweight metrics helpers for the gateway.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is embedded; the
//! application may install any compatible recorder. Without one, every call
//! is a cheap no-op.
//!
//! Provided metrics (labels vary by family):
//! * `sneak_link_http_requests_total` (counter; method, status)
//! * `sneak_link_http_request_duration_seconds` (histogram; method)
//! * `sneak_link_http_requests_in_flight` (gauge)
//! * `sneak_link_security_events_total` (counter; event_type)
//! * `sneak_link_rate_limit_hits_total` (counter)
//! * `sneak_link_share_validations_total` (counter; result)
//! * `sneak_link_active_sessions` (gauge; service, with `total`)
//! * `sneak_link_uptime_seconds` (gauge)
use std::time::Duration;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const HTTP_REQUESTS_TOTAL: &str = "sneak_link_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "sneak_link_http_request_duration_seconds";
pub const HTTP_REQUESTS_IN_FLIGHT: &str = "sneak_link_http_requests_in_flight";
pub const SECURITY_EVENTS_TOTAL: &str = "sneak_link_security_events_total";
pub const RATE_LIMIT_HITS_TOTAL: &str = "sneak_link_rate_limit_hits_total";
pub const SHARE_VALIDATIONS_TOTAL: &str = "sneak_link_share_validations_total";
pub const ACTIVE_SESSIONS: &str = "sneak_link_active_sessions";
pub const UPTIME_SECONDS: &str = "sneak_link_uptime_seconds";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests answered by the gateway."
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests answered by the gateway."
    );
    describe_gauge!(
        HTTP_REQUESTS_IN_FLIGHT,
        "Number of requests currently being processed."
    );
    describe_counter!(
        SECURITY_EVENTS_TOTAL,
        Unit::Count,
        "Security events by type (invalid tokens, rate limiting, bad shares, grants)."
    );
    describe_counter!(
        RATE_LIMIT_HITS_TOTAL,
        Unit::Count,
        "Share knocks refused by the admission limiter."
    );
    describe_counter!(
        SHARE_VALIDATIONS_TOTAL,
        Unit::Count,
        "Backend share validations by result."
    );
    describe_gauge!(ACTIVE_SESSIONS, "Unexpired sessions issued by this process.");
    describe_gauge!(UPTIME_SECONDS, Unit::Seconds, "Seconds since the gateway started.");
});

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing gateway metrics descriptions");
    Lazy::force(&DESCRIPTIONS);
    Ok(())
}

/// Count and time one answered request.
pub fn record_http_request(method: &str, status: u16, duration: Duration) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

pub fn increment_security_event(event_type: &str) {
    counter!(SECURITY_EVENTS_TOTAL, "event_type" => event_type.to_string()).increment(1);
}

pub fn increment_rate_limit_hits() {
    counter!(RATE_LIMIT_HITS_TOTAL).increment(1);
}

pub fn increment_share_validation(valid: bool) {
    let result = if valid { "valid" } else { "invalid" };
    counter!(SHARE_VALIDATIONS_TOTAL, "result" => result).increment(1);
}

pub fn set_active_sessions(service: &str, count: usize) {
    gauge!(ACTIVE_SESSIONS, "service" => service.to_string()).set(count as f64);
}

pub fn set_uptime(uptime: Duration) {
    gauge!(UPTIME_SECONDS).set(uptime.as_secs_f64());
}

/// RAII guard keeping the in-flight gauge accurate even when the request
/// future is dropped mid-flight (client disconnect).
pub struct InFlightGuard(());

impl InFlightGuard {
    pub fn new() -> Self {
        gauge!(HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
        Self(())
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_helpers_without_recorder() {
        record_http_request("GET", 200, Duration::from_millis(12));
        increment_security_event("access_granted");
        increment_rate_limit_hits();
        increment_share_validation(false);
        set_active_sessions("total", 3);
        set_uptime(Duration::from_secs(5));
        drop(InFlightGuard::new());
    }
}
