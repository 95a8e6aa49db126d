use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};

/// Security-relevant outcomes of the admission state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEventKind {
    /// A session cookie was presented but failed verification
    InvalidToken,
    /// A knock was refused by the admission limiter
    RateLimitExceeded,
    /// The backend said the knocked share does not exist
    InvalidShareAttempt,
    /// A knock succeeded and the request was let through
    AccessGranted,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::InvalidShareAttempt => "invalid_share_attempt",
            Self::AccessGranted => "access_granted",
        }
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Narrow recording interface the access controller reports to.
///
/// Logging, metrics and persistence live behind this trait. Calls happen on
/// the request path, so implementations must not block.
pub trait AuditSink: Send + Sync + 'static {
    /// One call per finished request.
    fn record_access(&self, ip: &str, method: &str, path: &str, status: u16, duration: Duration);

    fn record_security_event(&self, kind: SecurityEventKind, ip: &str, details: &str);

    /// One call per backend validation that actually ran.
    fn record_validation(&self, ip: &str, share_path: &str, valid: bool, backend_status: u16);

    /// A session was issued. Receives the token digest, never the token.
    fn record_session(
        &self,
        token_digest: &str,
        share_path: &str,
        service: &str,
        expires_at: DateTime<Utc>,
    );
}
