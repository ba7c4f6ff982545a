//! Request dispatcher shared by every API call.
//!
//! All domain modules go through one [`ApiClient`]; constructing a separate
//! HTTP client would bypass the interceptor and the refresh coordinator. The
//! client is cheap to clone and every clone shares the same store, broadcast
//! channel and pending refresh.
//!
//! Per logical request the dispatcher walks this state machine, driven by the
//! explicit [`Attempt`] marker rather than a flag on the request:
//!
//! ```text
//! Initial -> non-401            -> done
//! Initial -> 401 -> refresh ok  -> Replay -> non-401 -> done
//! Initial -> 401 -> refresh err -> SessionExpired
//! Replay  -> 401                -> SessionExpired (store cleared, auth:logout)
//! ```

pub mod config;
pub mod interceptor;
pub mod refresh;

pub use config::ClientConfig;
pub use refresh::{PendingRefresh, RefreshCoordinator, RefreshOutcome};

use crate::{
    broadcast::SessionBroadcast,
    error::{Error, Result},
    store::CredentialStore,
};
use interceptor::attach_credential;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{fmt, sync::Arc};
use tracing::{debug, field, instrument, warn, Span};
use uuid::Uuid;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REISSUE_PATH: &str = "/auth/token/reissue";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const ME_PATH: &str = "/me";

/// Header carrying the logical request id on the first send and on the replay.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Retry marker for one logical request. A request is replayed at most once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt {
    Initial,
    Replay,
}

impl Attempt {
    /// The attempt that may follow a `401`, or `None` once the replay is spent.
    #[must_use]
    pub fn next(self) -> Option<Attempt> {
        match self {
            Attempt::Initial => Some(Attempt::Replay),
            Attempt::Replay => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Attempt::Initial => "initial",
            Attempt::Replay => "replay",
        }
    }
}

/// Replayable description of a call, rebuilt into a `reqwest` request per attempt.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// # Errors
    /// Returns `Error::Serialization` if `body` cannot be encoded as JSON.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|err| Error::Serialization(err.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn to_builder(&self, http: &reqwest::Client, config: &ClientConfig) -> RequestBuilder {
        let mut builder = http.request(self.method.clone(), config.endpoint_url(&self.path));

        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &self.body {
            builder = builder.json(body);
        }

        builder
    }
}

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    broadcast: SessionBroadcast,
    refresh: RefreshCoordinator,
}

impl ApiClient {
    /// # Errors
    /// Returns `Error::Config` if the HTTP client cannot be constructed.
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        broadcast: SessionBroadcast,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|err| Error::Config(format!("failed to build HTTP client: {err}")))?;

        let refresh =
            RefreshCoordinator::new(http.clone(), &config, Arc::clone(&store), broadcast.clone());

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                config,
                store,
                broadcast,
                refresh,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn broadcast(&self) -> &SessionBroadcast {
        &self.inner.broadcast
    }

    #[must_use]
    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.inner.refresh
    }

    /// Sends `request` with the current credential, refreshing and replaying once on `401`.
    ///
    /// Any status other than `401` is returned untouched, including errors.
    ///
    /// # Errors
    /// Returns `Error::SessionExpired` when the session cannot be recovered, and
    /// transport errors (`Error::Transport`, `Error::Timeout`) unchanged.
    #[instrument(
        name = "fitsession.request",
        skip_all,
        fields(http.method = %request.method, path = %request.path, request_id = field::Empty)
    )]
    pub async fn send(&self, request: ApiRequest) -> Result<Response> {
        let request_id = Uuid::now_v7();
        Span::current().record("request_id", field::display(request_id));

        let mut attempt = Attempt::Initial;
        loop {
            let (response, sent_with) = self.dispatch(&request, request_id, attempt).await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            let Some(next) = attempt.next() else {
                warn!("Replayed request was rejected again; ending session");
                self.terminate();
                return Err(Error::SessionExpired);
            };

            self.await_fresh_credential(sent_with.as_ref()).await?;
            attempt = next;
        }
    }

    /// Sends and decodes a JSON response body.
    ///
    /// # Errors
    /// Returns `Error::Http` for non-success statuses and `Error::Parse` for bad bodies,
    /// plus everything [`ApiClient::send`] returns.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        handle_json_response(response).await
    }

    /// Sends and expects a success status, ignoring the body.
    ///
    /// # Errors
    /// Returns `Error::Http` for non-success statuses, plus everything
    /// [`ApiClient::send`] returns.
    pub async fn send_empty(&self, request: ApiRequest) -> Result<()> {
        let response = self.send(request).await?;
        handle_empty_response(response).await
    }

    /// # Errors
    /// See [`ApiClient::send_json`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    /// # Errors
    /// See [`ApiClient::send_json`].
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::post(path).json(body)?).await
    }

    /// # Errors
    /// See [`ApiClient::send_json`].
    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::put(path).json(body)?).await
    }

    /// # Errors
    /// See [`ApiClient::send_json`].
    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(ApiRequest::patch(path).json(body)?).await
    }

    /// # Errors
    /// See [`ApiClient::send_empty`].
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send_empty(ApiRequest::delete(path)).await
    }

    /// Sends without credentials and without refresh handling.
    ///
    /// Used for login and logout, where there is no session to recover.
    ///
    /// # Errors
    /// Returns transport errors only; statuses are left to the caller.
    #[instrument(
        name = "fitsession.request",
        skip_all,
        fields(http.method = %request.method, path = %request.path, request_id = field::Empty)
    )]
    pub async fn send_unauthenticated(&self, request: ApiRequest) -> Result<Response> {
        let request_id = Uuid::now_v7();
        Span::current().record("request_id", field::display(request_id));

        let response = request
            .to_builder(&self.inner.http, &self.inner.config)
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .send()
            .await?;

        debug!(status = response.status().as_u16(), "unauthenticated request settled");
        Ok(response)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        request_id: Uuid,
        attempt: Attempt,
    ) -> Result<(Response, Option<SecretString>)> {
        let builder = request
            .to_builder(&self.inner.http, &self.inner.config)
            .header(REQUEST_ID_HEADER, request_id.to_string());
        let (builder, sent_with) = attach_credential(builder, self.inner.store.as_ref());

        let response = builder.send().await?;
        debug!(
            attempt = attempt.as_str(),
            authenticated = sent_with.is_some(),
            status = response.status().as_u16(),
            "request settled"
        );

        Ok((response, sent_with))
    }

    /// Makes sure the store holds a credential newer than the one that was rejected.
    async fn await_fresh_credential(&self, sent_with: Option<&SecretString>) -> Result<()> {
        let current = self.inner.store.access_token();

        // A refresh that finished while this request was in flight already
        // rotated the token; replay with it instead of starting another exchange.
        let rotated = match (sent_with, current.as_ref()) {
            (Some(sent), Some(current)) => sent.expose_secret() != current.expose_secret(),
            (None, Some(_)) => true,
            (_, None) => false,
        };

        if rotated {
            debug!("credential rotated while request was in flight; replaying");
            return Ok(());
        }

        match self.inner.refresh.refresh().await {
            RefreshOutcome::Refreshed => Ok(()),
            RefreshOutcome::Terminated => Err(Error::SessionExpired),
        }
    }

    fn terminate(&self) {
        self.inner.store.clear();
        self.inner.broadcast.emit();
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("api_base_url", &self.inner.config.api_base_url.as_str())
            .field("has_session", &self.inner.store.has_session())
            .finish_non_exhaustive()
    }
}

/// Decodes JSON from a success response, or turns the status and body into an error.
pub(crate) async fn handle_json_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    if response.status().is_success() {
        response
            .json::<T>()
            .await
            .map_err(|err| Error::Parse(err.to_string()))
    } else {
        Err(error_from_response(response).await)
    }
}

pub(crate) async fn handle_empty_response(response: Response) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::from_status(status, &body)
}
