//! # Fitsession (Session Lifecycle Client)
//!
//! `fitsession` owns the client side of authentication for the fitness platform
//! API. Every domain call made through the shared [`ApiClient`] carries the
//! current bearer credential, and a `401` is turned into either a transparently
//! replayed success or a terminated session.
//!
//! ## Components
//!
//! - **Credential store** ([`store`]): the access/refresh pair, written and
//!   cleared as one value. Backed by memory or by a JSON file.
//! - **Request dispatcher** ([`client`]): one `reqwest` client shared by all
//!   callers. The outgoing interceptor re-reads the store on every send.
//! - **Refresh coordinator** ([`client::refresh`]): a single-flight reissue
//!   exchange. Concurrent `401`s wait on the same pending handle, and each
//!   logical request is replayed at most once.
//! - **Session broadcast** ([`broadcast`]): the `auth:logout` signal, fired when
//!   a session ends somewhere deep in the HTTP layer.
//! - **Session context** ([`session`]): `Unknown`, `Authenticated` or
//!   `Anonymous`, plus the cached user profile and the `login` / `logout` /
//!   `refresh_user` / `update_user` transitions.
//!
//! ## Flow Overview
//!
//! 1. A caller issues `client.get_json("/workouts")`.
//! 2. The interceptor attaches `Authorization: Bearer <access>` if one is stored.
//! 3. On `401`, the coordinator joins (or starts) the pending refresh, which posts
//!    the refresh token to `/auth/token/reissue` outside the interceptor.
//! 4. Success stores the new pair and replays the request once. Failure clears
//!    the store, emits `auth:logout`, and the session context flips to
//!    `Anonymous`.
//!
//! Token material is held in `SecretString` and must never be logged.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod error;
pub mod session;
pub mod store;
pub mod types;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub use broadcast::{SessionBroadcast, SessionTerminated, AUTH_LOGOUT_EVENT};
pub use client::{ApiClient, ApiRequest, Attempt, ClientConfig};
pub use error::{Error, Result};
pub use session::{SessionContext, SessionSnapshot, SessionState};
pub use store::{CredentialPair, CredentialStore, FileStore, MemoryStore};
pub use types::{LoginRequest, TokenResponse, UserProfile};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
