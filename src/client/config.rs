//! Dispatcher configuration: API base URL, timeouts and user agent.

use crate::{error::Error, APP_USER_AGENT};
use std::time::Duration;
use url::Url;

/// Default request timeout applied to every call, including the refresh exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_base_url: Url,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl ClientConfig {
    /// # Errors
    /// Returns `Error::Config` if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str) -> Result<Self, Error> {
        let api_base_url = parse_base_url(base_url)?;

        Ok(Self {
            api_base_url,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: APP_USER_AGENT.to_string(),
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Joins `path` onto the base URL, ignoring duplicate slashes on either side.
    #[must_use]
    pub fn endpoint_url(&self, path: &str) -> String {
        build_url_with_base(self.api_base_url.as_str(), path)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Config("API base URL is not configured".to_string()));
    }

    let url = Url::parse(trimmed)
        .map_err(|err| Error::Config(format!("invalid API base URL {trimmed}: {err}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::Config(format!(
                "invalid API base URL: unsupported scheme {scheme}"
            )))
        }
    }

    if url.host().is_none() {
        return Err(Error::Config(
            "invalid API base URL: no host specified".to_string(),
        ));
    }

    Ok(url)
}

fn build_url_with_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_joins_cleanly() -> anyhow::Result<()> {
        let config = ClientConfig::new("https://api.fit.example/v1/")?;
        assert_eq!(
            config.endpoint_url("/auth/login"),
            "https://api.fit.example/v1/auth/login"
        );
        assert_eq!(config.endpoint_url("me"), "https://api.fit.example/v1/me");
        Ok(())
    }

    #[test]
    fn base_url_must_be_http() {
        assert!(ClientConfig::new("").is_err());
        assert!(ClientConfig::new("   ").is_err());
        assert!(ClientConfig::new("ftp://api.fit.example").is_err());
        assert!(ClientConfig::new("not a url").is_err());
        assert!(ClientConfig::new("http://localhost:8080").is_ok());
    }

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let config = ClientConfig::new("http://localhost:8080")?;
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.user_agent.starts_with("fitsession/"));

        let config = config.with_timeout(Duration::from_secs(3));
        assert_eq!(config.timeout, Duration::from_secs(3));
        Ok(())
    }
}
