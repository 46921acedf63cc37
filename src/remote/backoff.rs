//! Server-initiated throttling signals and the remote event registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

// ============================================================================
// BackoffTracker
// ============================================================================

/// Tracks the end of the most recent back-off window announced by the server.
#[derive(Default)]
pub struct BackoffTracker {
    until: Mutex<Option<Instant>>,
}

impl BackoffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a back-off of `seconds` starting now.
    pub fn observe(&self, seconds: u64) {
        let deadline = Instant::now() + Duration::from_secs(seconds);
        let mut until = self.until.lock();
        // Never shorten an already-announced window.
        match *until {
            Some(existing) if existing >= deadline => {}
            _ => *until = Some(deadline),
        }
    }

    /// Time left in the current back-off window, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let mut until = self.until.lock();
        match *until {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    Some(deadline - now)
                } else {
                    *until = None;
                    None
                }
            }
            None => None,
        }
    }
}

// ============================================================================
// RemoteEvents
// ============================================================================

/// A transport-level event announced by the server.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// Clients must slow down; `seconds` until requests are welcome again.
    Backoff { seconds: u64 },
    /// The server throttled a request; it was retried after `seconds`.
    RetryAfter { seconds: u64 },
    /// The service announced an end-of-life or API deprecation.
    Deprecated { message: String },
}

type RemoteListener = Arc<dyn Fn(&RemoteEvent) + Send + Sync>;

/// Registry remote facade implementations publish transport events through.
/// Backoff notifications also feed the embedded [`BackoffTracker`], which the
/// sync driver consults before starting a run.
#[derive(Default)]
pub struct RemoteEvents {
    listeners: RwLock<Vec<RemoteListener>>,
    backoff: BackoffTracker,
}

impl RemoteEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, listener: RemoteListener) {
        self.listeners.write().push(listener);
    }

    pub fn backoff_remaining(&self) -> Option<Duration> {
        self.backoff.remaining()
    }

    /// Called by facade implementations when the server sends a Backoff
    /// header.
    pub fn notify_backoff(&self, seconds: u64) {
        self.backoff.observe(seconds);
        self.emit(&RemoteEvent::Backoff { seconds });
    }

    pub fn notify_retry_after(&self, seconds: u64) {
        self.emit(&RemoteEvent::RetryAfter { seconds });
    }

    pub fn notify_deprecated(&self, message: impl Into<String>) {
        self.emit(&RemoteEvent::Deprecated {
            message: message.into(),
        });
    }

    fn emit(&self, event: &RemoteEvent) {
        let listeners: Vec<RemoteListener> =
            self.listeners.read().iter().map(Arc::clone).collect();
        for listener in listeners {
            listener(event);
        }
    }
}
