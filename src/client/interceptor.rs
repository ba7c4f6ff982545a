//! Outgoing interceptor: attaches the current access token to a request.
//!
//! The store is re-read on every call. Caching the token here would replay
//! requests with a credential that a concurrent refresh already replaced.

use crate::store::CredentialStore;
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, SecretString};

/// Adds `Authorization: Bearer <access>` when the store holds a token and
/// returns the token that was attached. Without one the request goes out
/// unmodified, so login and signup share the same dispatcher.
pub fn attach_credential(
    builder: RequestBuilder,
    store: &dyn CredentialStore,
) -> (RequestBuilder, Option<SecretString>) {
    match store.access_token() {
        Some(token) => {
            let builder = builder.bearer_auth(token.expose_secret());
            (builder, Some(token))
        }
        None => (builder, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CredentialPair, MemoryStore};
    use anyhow::Result;
    use reqwest::{header::AUTHORIZATION, Client};

    #[test]
    fn attaches_bearer_when_present() -> Result<()> {
        let store = MemoryStore::with_pair(CredentialPair::new("a1", "r1"));
        let client = Client::new();

        let (builder, sent) = attach_credential(client.get("http://localhost/me"), &store);
        let request = builder.build()?;

        assert_eq!(
            request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            Some("Bearer a1")
        );
        assert_eq!(sent.map(|t| t.expose_secret().to_string()), Some("a1".to_string()));
        Ok(())
    }

    #[test]
    fn leaves_request_alone_without_token() -> Result<()> {
        let store = MemoryStore::new();
        let client = Client::new();

        let (builder, sent) = attach_credential(client.post("http://localhost/auth/login"), &store);
        let request = builder.build()?;

        assert!(request.headers().get(AUTHORIZATION).is_none());
        assert!(sent.is_none());
        Ok(())
    }

    #[test]
    fn rereads_store_on_every_request() -> Result<()> {
        let store = MemoryStore::with_pair(CredentialPair::new("a1", "r1"));
        let client = Client::new();

        let (first, _) = attach_credential(client.get("http://localhost/me"), &store);
        store.save(CredentialPair::new("a2", "r2"));
        let (second, _) = attach_credential(client.get("http://localhost/me"), &store);

        let first = first.build()?;
        let second = second.build()?;
        assert_eq!(
            first.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer a1")
        );
        assert_eq!(
            second.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer a2")
        );
        Ok(())
    }
}
