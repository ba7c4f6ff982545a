use crate::{ApiClient, ClientConfig, CredentialStore, FileStore, SessionBroadcast};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};

/// Connection settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub api_url: String,
    pub credentials_path: PathBuf,
    pub timeout: Duration,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(api_url: String, credentials_path: PathBuf) -> Self {
        Self {
            api_url,
            credentials_path,
            timeout: crate::client::config::DEFAULT_TIMEOUT,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Builds the shared client over the file-backed credential store.
    /// # Errors
    /// Returns an error if the API URL is invalid or the HTTP client cannot be built.
    pub fn client(&self) -> Result<ApiClient> {
        let config = ClientConfig::new(&self.api_url)
            .context("invalid FITSESSION_API_URL")?
            .with_timeout(self.timeout);

        let store: Arc<dyn CredentialStore> = Arc::new(FileStore::open(&self.credentials_path));

        ApiClient::new(config, store, SessionBroadcast::new()).context("failed to build API client")
    }
}
