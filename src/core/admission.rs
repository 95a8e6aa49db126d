//! Sliding-window admission control for share knocks.
//!
//! Each client identity owns a log of request instants. A call to
//! [`AdmissionLimiter::allow`] prunes the log to the current window and admits
//! the request only while fewer than `max_requests` entries remain; refused
//! attempts are not recorded, so a client that keeps hammering is readmitted
//! as soon as its oldest admitted request leaves the window.
//!
//! The whole map sits behind one mutex. Critical sections touch a single
//! identity's short deque, and only unauthenticated knocks reach the limiter.
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::utils::periodic::PeriodicTask;

type Windows = HashMap<String, VecDeque<Instant>>;

/// Per-identity sliding-window request counter.
#[derive(Debug)]
pub struct AdmissionLimiter {
    max_requests: usize,
    window: Duration,
    windows: Mutex<Windows>,
}

impl AdmissionLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or refuse one request from `identity` at the current instant.
    pub fn allow(&self, identity: &str) -> bool {
        let mut windows = self.lock();
        // Read under the lock so each window stays in arrival order
        let now = Instant::now();
        self.admit(&mut windows, identity, now)
    }

    /// Admit or refuse one request from `identity` at `now`.
    pub fn allow_at(&self, identity: &str, now: Instant) -> bool {
        let mut windows = self.lock();
        self.admit(&mut windows, identity, now)
    }

    fn admit(
        &self,
        windows: &mut Windows,
        identity: &str,
        now: Instant,
    ) -> bool {
        let entries = windows.entry(identity.to_string()).or_default();
        Self::prune(entries, now, self.window);

        if entries.len() >= self.max_requests {
            return false;
        }
        entries.push_back(now);
        true
    }

    /// Requests from `identity` still inside the window.
    pub fn request_count(&self, identity: &str) -> usize {
        let now = Instant::now();
        self.lock().get(identity).map_or(0, |entries| {
            entries
                .iter()
                .filter(|at| now.duration_since(**at) < self.window)
                .count()
        })
    }

    /// Number of identities currently holding a window.
    pub fn tracked_identities(&self) -> usize {
        self.lock().len()
    }

    /// Prune every window and drop identities left empty. Returns how many
    /// identities were removed.
    pub fn compact(&self) -> usize {
        self.compact_at(Instant::now())
    }

    pub fn compact_at(&self, now: Instant) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, entries| {
            Self::prune(entries, now, self.window);
            !entries.is_empty()
        });
        before - windows.len()
    }

    /// Run [`compact`](Self::compact) once per window length until cancelled.
    pub fn spawn_compaction(self: &Arc<Self>, parent: &CancellationToken) -> PeriodicTask {
        let limiter = Arc::clone(self);
        PeriodicTask::spawn("admission_compaction", self.window, parent, move || {
            let removed = limiter.compact();
            if removed > 0 {
                tracing::debug!(
                    removed,
                    remaining = limiter.tracked_identities(),
                    "Compacted admission windows"
                );
            }
        })
    }

    // Entries are appended in order, so expired ones are always at the front.
    fn prune(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) < window {
                break;
            }
            entries.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        // A panic while holding the lock cannot leave a window half-updated
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
