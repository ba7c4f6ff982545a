//! Session context: the single source of truth for "is someone logged in, and who".
//!
//! The context hydrates once on start, listens to the session broadcast for the
//! rest of its life, and exposes the imperative transitions used by the rest of
//! the application. State lives in a `watch` channel so observers can react to
//! transitions instead of polling.
//!
//! Flow Overview:
//! - `start` subscribes to `auth:logout` and runs the mount probe. With no
//!   stored credential the state goes straight from `Unknown` to `Anonymous`
//!   without a network call; otherwise `GET /me` decides.
//! - `login` posts credentials outside the refresh path, stores the pair, then
//!   fetches the profile.
//! - `logout` tells the backend on a best-effort basis and always clears locally.
//! - A termination event flips any state to `Anonymous`. Repeats are no-ops.

use crate::{
    broadcast::SessionTerminated,
    client::{handle_json_response, ApiClient, ApiRequest, LOGIN_PATH, LOGOUT_PATH, ME_PATH},
    error::{Error, Result},
    store::CredentialStore,
    types::{LoginRequest, LogoutRequest, TokenResponse, UserProfile},
};
use regex::Regex;
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
};
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum SessionState {
    /// Before the first probe resolves. Distinct from `Anonymous` so a UI does
    /// not flash a logged-out view while loading.
    Unknown,
    Authenticated(UserProfile),
    Anonymous,
}

impl SessionState {
    #[must_use]
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

/// What the UI tree consumes: `{ is_logged_in, is_loading, user }`.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub is_logged_in: bool,
    pub is_loading: bool,
    pub user: Option<UserProfile>,
}

impl From<&SessionState> for SessionSnapshot {
    fn from(state: &SessionState) -> Self {
        Self {
            is_logged_in: matches!(state, SessionState::Authenticated(_)),
            is_loading: matches!(state, SessionState::Unknown),
            user: state.user().cloned(),
        }
    }
}

#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    client: ApiClient,
    state: watch::Sender<SessionState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionContext {
    /// Builds a context in the `Unknown` state without probing or listening.
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            inner: Arc::new(ContextInner {
                client,
                state,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Builds the context, subscribes to session termination, and resolves the
    /// initial `Unknown` state.
    pub async fn start(client: ApiClient) -> Self {
        let context = Self::new(client);
        context.listen();
        context.mount().await;
        context
    }

    /// Subscribes to `auth:logout` for the lifetime of the context. Calling it
    /// again is a no-op.
    pub fn listen(&self) {
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if listener.is_some() {
            return;
        }

        let mut events = self.inner.client.broadcast().subscribe();
        let weak: Weak<ContextInner> = Arc::downgrade(&self.inner);

        *listener = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionTerminated) | Err(RecvError::Lagged(_)) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        if inner.mark_anonymous() {
                            info!("Session ended by termination event");
                        } else {
                            debug!("termination event ignored; already anonymous");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Resolves the initial `Unknown` state. Only the first call has an effect.
    #[instrument(skip(self))]
    pub async fn mount(&self) {
        if !self.is_loading() {
            debug!("session already resolved");
            return;
        }

        if !self.store().has_session() {
            debug!("no stored credential; anonymous");
            self.inner.resolve_unknown(SessionState::Anonymous);
            return;
        }

        match self.fetch_profile().await {
            Ok(user) => {
                if self.inner.resolve_unknown(SessionState::Authenticated(user)) {
                    info!("Session restored from stored credential");
                }
            }
            Err(err) => {
                warn!("Session probe failed: {err}");
                if self.is_loading() {
                    self.store().clear();
                    self.inner.resolve_unknown(SessionState::Anonymous);
                }
            }
        }
    }

    /// Logs in with email and password, stores the returned pair, then loads the profile.
    ///
    /// If the profile cannot be loaded the new pair is discarded and the state
    /// stays (or becomes) `Anonymous`.
    ///
    /// # Errors
    /// Returns `Error::InvalidInput` for a malformed email, `Error::Unauthorized`
    /// for rejected credentials, and any transport or decoding error.
    #[instrument(skip_all, fields(email = %credentials.email))]
    pub async fn login(&self, credentials: LoginRequest) -> Result<()> {
        if !valid_email(&credentials.email) {
            return Err(Error::InvalidInput(format!(
                "invalid email address: {}",
                credentials.email
            )));
        }

        let request = ApiRequest::post(LOGIN_PATH).json(&credentials)?;
        let response = self.inner.client.send_unauthenticated(request).await?;
        let tokens: TokenResponse = handle_json_response(response).await?;
        self.store().save(tokens.into_pair()?);
        self.inner.client.broadcast().session_started();

        match self.fetch_profile().await {
            Ok(user) => {
                self.inner.state.send_replace(SessionState::Authenticated(user));
                info!("Logged in");
                Ok(())
            }
            Err(err) => {
                warn!("Profile fetch after login failed: {err}");
                self.store().clear();
                self.inner.mark_anonymous();
                Err(err)
            }
        }
    }

    /// Ends the session. The backend call is best effort; local state is always
    /// cleared, and calling this while anonymous is harmless.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.store().refresh_token() {
            let body = LogoutRequest {
                refresh_token: refresh_token.expose_secret(),
            };

            match ApiRequest::post(LOGOUT_PATH).json(&body) {
                Ok(request) => match self.inner.client.send_unauthenticated(request).await {
                    Ok(response) if response.status().is_success() => {
                        debug!("backend session revoked");
                    }
                    Ok(response) => {
                        warn!(status = response.status().as_u16(), "Logout request rejected");
                    }
                    Err(err) => warn!("Logout request failed: {err}"),
                },
                Err(err) => warn!("Failed to encode logout request: {err}"),
            }
        }

        self.store().clear();
        if self.inner.mark_anonymous() {
            info!("Logged out");
        }
    }

    /// Re-fetches the profile without touching tokens.
    ///
    /// # Errors
    /// Returns the error of the `GET /me` call; a terminal session error also
    /// flips the state to `Anonymous` through the broadcast.
    #[instrument(skip(self))]
    pub async fn refresh_user(&self) -> Result<()> {
        let user = self.fetch_profile().await?;

        let updated = self.inner.state.send_if_modified(|state| match state {
            SessionState::Authenticated(current) => {
                *current = user;
                true
            }
            _ => false,
        });

        if !updated {
            debug!("profile refreshed while not authenticated; ignored");
        }

        Ok(())
    }

    /// Optimistically merges `partial` into the cached profile, without a round-trip.
    /// Ignored unless authenticated; a merge that breaks the profile is dropped.
    pub fn update_user(&self, partial: &Map<String, Value>) {
        self.inner.state.send_if_modified(|state| {
            let SessionState::Authenticated(user) = state else {
                debug!("update_user ignored; not authenticated");
                return false;
            };

            match user.merged(partial) {
                Ok(merged) if merged != *user => {
                    *user = merged;
                    true
                }
                Ok(_) => false,
                Err(err) => {
                    warn!("Rejected profile update: {err}");
                    false
                }
            }
        });
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::from(&*self.inner.state.borrow())
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        matches!(*self.inner.state.borrow(), SessionState::Authenticated(_))
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(*self.inner.state.borrow(), SessionState::Unknown)
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().user().cloned()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    fn store(&self) -> &Arc<dyn CredentialStore> {
        self.inner.client.store()
    }

    async fn fetch_profile(&self) -> Result<UserProfile> {
        self.inner.client.get_json(ME_PATH).await
    }
}

impl ContextInner {
    /// Returns `true` if the state actually changed.
    fn mark_anonymous(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Anonymous) {
                false
            } else {
                *state = SessionState::Anonymous;
                true
            }
        })
    }

    /// Replaces `Unknown` with `next`; any other state is left alone.
    fn resolve_unknown(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Unknown) {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}
