//! Refresh coordinator: single-flight token reissue.
//!
//! A `401` on a first attempt asks the coordinator for a fresh credential. At
//! most one reissue exchange runs at a time; every request that fails while it
//! is in flight awaits the same [`PendingRefresh`] handle and observes its one
//! outcome. Backends that rotate the refresh token on use would otherwise reject
//! the second of two racing exchanges and log the user out for no reason.
//!
//! Flow Overview:
//! 1. `refresh` returns the in-flight handle, or installs a new one and spawns
//!    the exchange. The exchange runs on its own task so a caller dropping its
//!    future does not strand the other waiters.
//! 2. The exchange posts the stored refresh token to `/auth/token/reissue`
//!    without going through the interceptor, so it is never itself refreshed.
//! 3. Success saves the new pair in one write. Failure (rejection, malformed
//!    response, transport error or timeout alike) clears the store and emits one
//!    `auth:logout`. Either write happens only if the store still holds the
//!    refresh token that was sent; a logout or login in the meantime wins.
//! 4. The handle is removed before the outcome is published; a `401` arriving
//!    afterwards starts from a clean slate.

use crate::{
    broadcast::SessionBroadcast,
    client::{config::ClientConfig, handle_json_response, REISSUE_PATH},
    error::Error,
    store::{CredentialPair, CredentialStore},
    types::{ReissueRequest, TokenResponse},
};
use secrecy::ExposeSecret;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn, Instrument};

/// Result of one reissue exchange, shared by every waiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new pair is in the store; replay with whatever the interceptor reads.
    Refreshed,
    /// The session is over. The store is cleared and `auth:logout` was emitted.
    Terminated,
}

/// Awaitable handle on the in-flight exchange.
#[derive(Clone)]
pub struct PendingRefresh {
    rx: watch::Receiver<Option<RefreshOutcome>>,
}

impl PendingRefresh {
    /// Waits for the exchange to settle. A vanished exchange counts as terminal.
    pub async fn wait(mut self) -> RefreshOutcome {
        let outcome = match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(RefreshOutcome::Terminated),
            Err(_) => RefreshOutcome::Terminated,
        };
        outcome
    }
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    reissue_url: String,
    store: Arc<dyn CredentialStore>,
    broadcast: SessionBroadcast,
    pending: Mutex<Option<PendingRefresh>>,
    exchanges: AtomicU64,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        broadcast: SessionBroadcast,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                reissue_url: config.endpoint_url(REISSUE_PATH),
                store,
                broadcast,
                pending: Mutex::new(None),
                exchanges: AtomicU64::new(0),
            }),
        }
    }

    /// Joins the in-flight exchange or starts one, then waits for its outcome.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.pending_or_start().wait().await
    }

    /// Whether an exchange is currently in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_pending().is_some()
    }

    /// Number of exchanges started since creation.
    #[must_use]
    pub fn exchanges(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }

    fn pending_or_start(&self) -> PendingRefresh {
        let mut pending = self.inner.lock_pending();

        if let Some(handle) = pending.as_ref() {
            debug!("joining in-flight token refresh");
            return handle.clone();
        }

        let (tx, rx) = watch::channel(None);
        let handle = PendingRefresh { rx };
        *pending = Some(handle.clone());
        drop(pending);

        let exchange = self.inner.exchanges.fetch_add(1, Ordering::Relaxed) + 1;
        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("fitsession.refresh", exchange);

        tokio::spawn(
            async move {
                let reset = PendingReset { inner: &inner };
                let outcome = inner.exchange().await;
                drop(reset);

                let _ = tx.send(Some(outcome));
            }
            .instrument(span),
        );

        handle
    }
}

impl Inner {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingRefresh>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn exchange(&self) -> RefreshOutcome {
        let Some(refresh_token) = self.store.refresh_token() else {
            warn!("No refresh token stored; ending session");
            self.store.clear();
            self.broadcast.emit();
            return RefreshOutcome::Terminated;
        };
        let sent = refresh_token.expose_secret();

        // Both branches write only if the store still holds the token that was
        // sent; a logout or login during the exchange wins.
        match self.reissue(sent).await {
            Ok(pair) => {
                if self.store.replace_if(sent, Some(pair)) {
                    info!("Access token reissued");
                    return RefreshOutcome::Refreshed;
                }
            }
            Err(err) => {
                warn!("Token reissue failed: {err}");
                if self.store.replace_if(sent, None) {
                    self.broadcast.emit();
                    return RefreshOutcome::Terminated;
                }
            }
        }

        if self.store.has_session() {
            debug!("session replaced during reissue; using the new credential");
            RefreshOutcome::Refreshed
        } else {
            info!("Session cleared during reissue; discarding the result");
            RefreshOutcome::Terminated
        }
    }

    #[instrument(skip_all, fields(http.method = "POST", url = %self.reissue_url))]
    async fn reissue(&self, refresh_token: &str) -> Result<CredentialPair, Error> {
        let response = self
            .http
            .post(&self.reissue_url)
            .json(&ReissueRequest { refresh_token })
            .send()
            .await?;

        let tokens: TokenResponse = handle_json_response(response).await?;
        tokens.into_pair()
    }

}

/// Removes the pending handle when the exchange task finishes or unwinds.
struct PendingReset<'a> {
    inner: &'a Inner,
}

impl Drop for PendingReset<'_> {
    fn drop(&mut self) {
        self.inner.lock_pending().take();
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("reissue_url", &self.inner.reissue_url)
            .field("exchanges", &self.exchanges())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use serde_json::json;
    use std::net::TcpListener;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn coordinator(
        server: &MockServer,
        store: Arc<dyn CredentialStore>,
        broadcast: SessionBroadcast,
    ) -> Result<RefreshCoordinator> {
        let config = ClientConfig::new(&server.uri())?;
        Ok(RefreshCoordinator::new(
            reqwest::Client::new(),
            &config,
            store,
            broadcast,
        ))
    }

    async fn reissue_calls(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == REISSUE_PATH)
            .count()
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_exchange() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REISSUE_PATH))
            .and(body_json(json!({"refreshToken": "r1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"accessToken": "a2", "refreshToken": "r2"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryStore::with_pair(CredentialPair::new("a1", "r1")));
        let coordinator = coordinator(&server, Arc::clone(&store), SessionBroadcast::new())?;

        let outcomes = tokio::join!(
            coordinator.refresh(),
            coordinator.refresh(),
            coordinator.refresh(),
            coordinator.refresh(),
        );

        assert_eq!(
            [outcomes.0, outcomes.1, outcomes.2, outcomes.3],
            [RefreshOutcome::Refreshed; 4]
        );
        assert_eq!(reissue_calls(&server).await, 1);
        assert_eq!(coordinator.exchanges(), 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(
            store.access_token().map(|t| t.expose_secret().to_string()),
            Some("a2".to_string())
        );
        assert_eq!(
            store.refresh_token().map(|t| t.expose_secret().to_string()),
            Some("r2".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn rejected_reissue_clears_store_and_emits_once() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REISSUE_PATH))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"message": "invalid refresh token"}))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;

        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryStore::with_pair(CredentialPair::new("a1", "r1")));
        let broadcast = SessionBroadcast::with_window(Duration::ZERO);
        let mut events = broadcast.subscribe();
        let coordinator = coordinator(&server, Arc::clone(&store), broadcast)?;

        let (first, second) = tokio::join!(coordinator.refresh(), coordinator.refresh());

        assert_eq!(first, RefreshOutcome::Terminated);
        assert_eq!(second, RefreshOutcome::Terminated);
        assert_eq!(reissue_calls(&server).await, 1);
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());

        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn store_cleared_during_reissue_stays_cleared() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REISSUE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"accessToken": "a2", "refreshToken": "r2"}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryStore::with_pair(CredentialPair::new("a1", "r1")));
        let broadcast = SessionBroadcast::with_window(Duration::ZERO);
        let mut events = broadcast.subscribe();
        let coordinator = coordinator(&server, Arc::clone(&store), broadcast)?;

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.clear();

        assert_eq!(pending.await?, RefreshOutcome::Terminated);
        assert_eq!(reissue_calls(&server).await, 1);
        assert!(store.load().is_none());
        assert!(events.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn login_during_failed_reissue_keeps_the_new_session() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REISSUE_PATH))
            .respond_with(ResponseTemplate::new(400).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryStore::with_pair(CredentialPair::new("a1", "r1")));
        let broadcast = SessionBroadcast::with_window(Duration::ZERO);
        let mut events = broadcast.subscribe();
        let coordinator = coordinator(&server, Arc::clone(&store), broadcast)?;

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.save(CredentialPair::new("b1", "s1"));

        assert_eq!(pending.await?, RefreshOutcome::Refreshed);
        assert_eq!(
            store.refresh_token().map(|t| t.expose_secret().to_string()),
            Some("s1".to_string())
        );
        assert!(events.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_reissue_response_is_terminal() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REISSUE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "a2"})))
            .mount(&server)
            .await;

        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryStore::with_pair(CredentialPair::new("a1", "r1")));
        let coordinator = coordinator(&server, Arc::clone(&store), SessionBroadcast::new())?;

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Terminated);
        assert!(store.load().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn missing_refresh_token_skips_exchange() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
        let broadcast = SessionBroadcast::new();
        let mut events = broadcast.subscribe();
        let coordinator = coordinator(&server, store, broadcast)?;

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Terminated);
        assert_eq!(reissue_calls(&server).await, 0);
        assert!(events.try_recv().is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_reissue_endpoint_is_terminal() -> Result<()> {
        // Bind then drop a listener to get a port nothing answers on.
        let port = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener.local_addr()?.port(),
            Err(_) => {
                eprintln!("Skipping test: cannot bind localhost");
                return Ok(());
            }
        };

        let config = ClientConfig::new(&format!("http://127.0.0.1:{port}"))?;
        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryStore::with_pair(CredentialPair::new("a1", "r1")));
        let coordinator = RefreshCoordinator::new(
            reqwest::Client::new(),
            &config,
            Arc::clone(&store),
            SessionBroadcast::new(),
        );

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Terminated);
        assert!(store.load().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn a_later_refresh_starts_a_new_exchange() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(REISSUE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"accessToken": "a2", "refreshToken": "r2"})),
            )
            .mount(&server)
            .await;

        let store: Arc<dyn CredentialStore> =
            Arc::new(MemoryStore::with_pair(CredentialPair::new("a1", "r1")));
        let coordinator = coordinator(&server, store, SessionBroadcast::new())?;

        assert_eq!(coordinator.refresh().await, RefreshOutcome::Refreshed);
        assert_eq!(coordinator.refresh().await, RefreshOutcome::Refreshed);
        assert_eq!(reissue_calls(&server).await, 2);
        Ok(())
    }
}
