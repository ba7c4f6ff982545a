//! Process-wide "session ended" signal.
//!
//! The refresh coordinator sits deep inside the HTTP layer and must not know
//! about the session context. It announces termination here instead, and any
//! observer subscribes independently of the call stack that detected it.
//!
//! Delivery is at-least-once: emits that land inside the coalescing window are
//! dropped, but subscribers must still treat a repeated event as a no-op. The
//! window covers one session only; [`SessionBroadcast::session_started`] closes
//! it so the next session's termination is always delivered.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Wire name of the termination event.
pub const AUTH_LOGOUT_EVENT: &str = "auth:logout";

/// Emits closer together than this collapse into one event.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(500);

const CHANNEL_CAPACITY: usize = 16;

/// The `session-terminated` event. It carries no payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionTerminated;

impl SessionTerminated {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        AUTH_LOGOUT_EVENT
    }
}

#[derive(Clone)]
pub struct SessionBroadcast {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<SessionTerminated>,
    window: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl SessionBroadcast {
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(DEFAULT_COALESCE_WINDOW)
    }

    #[must_use]
    pub fn with_window(window: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tx,
                window,
                last_emit: Mutex::new(None),
            }),
        }
    }

    /// Announces that the session ended.
    ///
    /// Returns `false` when the emit was coalesced into one sent moments ago.
    /// Having no subscribers is not an error.
    pub fn emit(&self) -> bool {
        let now = Instant::now();
        {
            let mut last = self
                .inner
                .last_emit
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);

            if let Some(previous) = *last {
                if now.duration_since(previous) < self.inner.window {
                    debug!(event = AUTH_LOGOUT_EVENT, "coalesced duplicate emit");
                    return false;
                }
            }
            *last = Some(now);
        }

        let receivers = self.inner.tx.send(SessionTerminated).unwrap_or(0);
        info!(event = AUTH_LOGOUT_EVENT, receivers, "Session terminated");

        true
    }

    /// Marks the start of a new session. The next emit is never coalesced
    /// with one that ended an earlier session.
    pub fn session_started(&self) {
        self.inner
            .last_emit
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionTerminated> {
        self.inner.tx.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}

impl Default for SessionBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionBroadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBroadcast")
            .field("window", &self.inner.window)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn event_uses_wire_name() {
        assert_eq!(SessionTerminated.as_str(), "auth:logout");
    }

    #[tokio::test]
    async fn emit_reaches_every_subscriber() {
        let channel = SessionBroadcast::new();
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();

        assert!(channel.emit());

        assert_eq!(first.recv().await.ok(), Some(SessionTerminated));
        assert_eq!(second.recv().await.ok(), Some(SessionTerminated));
    }

    #[tokio::test]
    async fn emits_inside_window_are_coalesced() {
        let channel = SessionBroadcast::with_window(Duration::from_secs(60));
        let mut rx = channel.subscribe();

        assert!(channel.emit());
        assert!(!channel.emit());
        assert!(!channel.emit());

        assert_eq!(rx.recv().await.ok(), Some(SessionTerminated));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn new_session_is_not_coalesced_with_the_previous_one() {
        let channel = SessionBroadcast::with_window(Duration::from_secs(60));
        let mut rx = channel.subscribe();

        assert!(channel.emit());
        channel.session_started();
        assert!(channel.emit());
        assert!(!channel.emit());

        assert_eq!(rx.recv().await.ok(), Some(SessionTerminated));
        assert_eq!(rx.recv().await.ok(), Some(SessionTerminated));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn emits_outside_window_are_delivered() {
        let channel = SessionBroadcast::with_window(Duration::ZERO);
        let mut rx = channel.subscribe();

        assert!(channel.emit());
        assert!(channel.emit());

        assert_eq!(rx.recv().await.ok(), Some(SessionTerminated));
        assert_eq!(rx.recv().await.ok(), Some(SessionTerminated));
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let channel = SessionBroadcast::new();
        assert_eq!(channel.subscriber_count(), 0);
        assert!(channel.emit());
    }
}
