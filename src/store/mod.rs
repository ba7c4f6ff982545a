//! Credential storage for the access/refresh token pair.
//!
//! The pair is the only mutable state shared between the dispatcher, the
//! refresh coordinator and the session context. Both tokens are always written
//! and cleared together; an access token without its refresh token (or the
//! reverse) is never observable through this interface.
//!
//! Stores are synchronous. No `.await` ever sits between reading a pair and
//! writing its replacement, so callers update the whole pair in one step.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed key of the access token in persisted state.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Fixed key of the refresh token in persisted state.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Opaque bearer credentials. The client never parses either token.
#[derive(Clone)]
pub struct CredentialPair {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl CredentialPair {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }

    /// A pair with an empty token on either side is not a usable session.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.access_token.expose_secret().is_empty()
            && !self.refresh_token.expose_secret().is_empty()
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

impl Serialize for CredentialPair {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("CredentialPair", 2)?;
        state.serialize_field(ACCESS_TOKEN_KEY, self.access_token.expose_secret())?;
        state.serialize_field(REFRESH_TOKEN_KEY, self.refresh_token.expose_secret())?;
        state.end()
    }
}

/// Persisted shape; the strings move straight into `SecretString`s.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPair {
    access_token: String,
    refresh_token: String,
}

impl<'de> Deserialize<'de> for CredentialPair {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = StoredPair::deserialize(deserializer)?;
        Ok(Self::new(stored.access_token, stored.refresh_token))
    }
}

/// Typed accessor surface over the persisted pair.
///
/// Implementations must make `save` and `clear` atomic for readers and must not
/// surface storage failures: an unwritable backend degrades to a session that
/// asks for login again.
pub trait CredentialStore: Send + Sync {
    /// Replaces both tokens.
    fn save(&self, pair: CredentialPair);

    /// Removes both tokens. Idempotent.
    fn clear(&self);

    /// Current pair, if both tokens are present.
    fn load(&self) -> Option<CredentialPair>;

    /// Writes `next` (or clears the store for `None`) only while the stored
    /// refresh token is still `expected_refresh`. Returns whether it wrote.
    ///
    /// Check and write happen under one lock, so a logout or a new login that
    /// lands in between is never overwritten.
    fn replace_if(&self, expected_refresh: &str, next: Option<CredentialPair>) -> bool;

    fn access_token(&self) -> Option<SecretString> {
        self.load().map(|pair| pair.access_token)
    }

    fn refresh_token(&self) -> Option<SecretString> {
        self.load().map(|pair| pair.refresh_token)
    }

    /// Local heuristic only: a stored access token may already be expired server-side.
    fn has_session(&self) -> bool {
        self.access_token().is_some()
    }
}

fn holds_refresh(current: Option<&CredentialPair>, expected_refresh: &str) -> bool {
    current.is_some_and(|pair| pair.refresh_token.expose_secret() == expected_refresh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_pair_debug_is_redacted() {
        let pair = CredentialPair::new("access-secret", "refresh-secret");
        let debug = format!("{pair:?}");
        assert!(!debug.contains("access-secret"));
        assert!(!debug.contains("refresh-secret"));
    }

    #[test]
    fn credential_pair_uses_fixed_keys() -> anyhow::Result<()> {
        let pair = CredentialPair::new("a1", "r1");
        let value = serde_json::to_value(&pair)?;
        assert_eq!(value["accessToken"], "a1");
        assert_eq!(value["refreshToken"], "r1");

        let decoded: CredentialPair = serde_json::from_value(value)?;
        assert_eq!(decoded.access_token.expose_secret(), "a1");
        assert_eq!(decoded.refresh_token.expose_secret(), "r1");
        Ok(())
    }

    #[test]
    fn credential_pair_reads_persisted_file_shape() -> anyhow::Result<()> {
        let decoded: CredentialPair =
            serde_json::from_str(r#"{"accessToken":"a9","refreshToken":"r9"}"#)?;
        assert!(decoded.is_complete());
        assert_eq!(decoded.access_token.expose_secret(), "a9");
        assert_eq!(decoded.refresh_token.expose_secret(), "r9");
        Ok(())
    }

    #[test]
    fn credential_pair_rejects_half_pairs() {
        let decoded = serde_json::from_str::<CredentialPair>(r#"{"accessToken":"a1"}"#);
        assert!(decoded.is_err());
        assert!(!CredentialPair::new("a1", "").is_complete());
    }
}
