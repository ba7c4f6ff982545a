//! Request and response payloads for the auth endpoints and the profile probe.
//! Login and token payloads carry secrets, so none of them derive `Debug` with
//! their raw contents.

use crate::{error::Error, store::CredentialPair};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// `POST /auth/login` body.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    #[serde(serialize_with = "expose")]
    pub password: SecretString,
}

impl LoginRequest {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// `POST /auth/token/reissue` body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReissueRequest<'a> {
    pub refresh_token: &'a str,
}

/// `POST /auth/logout` body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest<'a> {
    pub refresh_token: &'a str,
}

/// Token pair returned by login and reissue.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Both tokens must be present and non-empty; a half pair is never stored.
    ///
    /// # Errors
    /// Returns `Error::Parse` if either token is missing or empty.
    pub fn into_pair(self) -> Result<CredentialPair, Error> {
        match (self.access_token, self.refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Ok(CredentialPair::new(access, refresh))
            }
            _ => Err(Error::Parse(
                "token response is missing accessToken or refreshToken".to_string(),
            )),
        }
    }
}

/// `GET /me` snapshot of the signed-in user.
///
/// Fields the client does not model are kept in `extra` so a partial update
/// and a later re-serialization do not drop them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Value,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    /// Merges the top-level keys of `partial` into a copy of this profile.
    ///
    /// # Errors
    /// Returns `Error::Parse` if the merged document is no longer a valid profile.
    pub fn merged(&self, partial: &Map<String, Value>) -> Result<Self, Error> {
        let mut document = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => return Err(Error::Parse("profile is not a JSON object".to_string())),
        };

        for (key, value) in partial {
            document.insert(key.clone(), value.clone());
        }

        Ok(serde_json::from_value(Value::Object(document))?)
    }
}

fn expose<S: serde::Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}
