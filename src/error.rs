use thiserror::Error;

/// Maximum number of error body characters surfaced to callers.
const MAX_ERROR_CHARS: usize = 200;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The session ended: the refresh exchange failed or a replay was rejected again.
    #[error("session expired, please log in again")]
    SessionExpired,
    /// A `401` from a call that never takes part in refresh (login, reissue, logout).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("request timed out")]
    Timeout,
    #[error("unable to reach the server: {0}")]
    Transport(String),
    #[error("request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Parse(String),
    #[error("failed to encode request: {0}")]
    Serialization(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error means the caller is no longer authenticated.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::SessionExpired | Error::Unauthorized(_))
    }

    /// Status code carried by the error, if it came from an HTTP response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Unauthorized(_) | Error::SessionExpired => Some(401),
            _ => None,
        }
    }

    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        let message = sanitize_body(body);
        if status == 401 {
            Error::Unauthorized(message)
        } else {
            Error::Http { status, message }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else if err.is_decode() {
            Error::Parse(err.to_string())
        } else if err.is_builder() {
            Error::Config(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

/// Trims and truncates an HTTP error body for display.
pub(crate) fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_body_replaces_empty() {
        assert_eq!(sanitize_body("   "), "Request failed.");
        assert_eq!(sanitize_body(" not found \n"), "not found");
    }

    #[test]
    fn sanitize_body_truncates() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_body(&long).chars().count(), MAX_ERROR_CHARS);
    }

    #[test]
    fn from_status_maps_401_to_unauthorized() {
        let err = Error::from_status(401, "bad credentials");
        assert!(err.is_auth());
        assert_eq!(err.status(), Some(401));

        let err = Error::from_status(422, "");
        assert!(!err.is_auth());
        assert_eq!(err.to_string(), "request failed (422): Request failed.");
    }
}
