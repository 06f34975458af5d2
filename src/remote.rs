//! Remote user API
//!
//! Elevated-mode profile edits are real changes, so they go to the backend
//! instead of the session override map.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::types::{Result, VibeError};

/// Backend calls the simulated store depends on
#[async_trait]
pub trait RemoteUserClient: Send + Sync {
    /// Apply `patch` to the signed-in user's record
    async fn update_current_user(&self, patch: &Map<String, Value>) -> Result<()>;
}

/// `RemoteUserClient` over HTTP: `PATCH {base_url}/users/me`
#[derive(Debug, Clone)]
pub struct HttpUserClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpUserClient {
    pub fn new(base_url: &str, bearer_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VibeError::Remote(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
        })
    }

    fn user_url(&self) -> String {
        format!("{}/users/me", self.base_url)
    }
}

#[async_trait]
impl RemoteUserClient for HttpUserClient {
    async fn update_current_user(&self, patch: &Map<String, Value>) -> Result<()> {
        let url = self.user_url();
        debug!(url = %url, fields = patch.len(), "Updating remote user");

        let mut request = self.client.patch(&url).json(patch);
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VibeError::Remote(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VibeError::Remote(format!("{} returned {}: {}", url, status, body)));
        }

        info!(fields = patch.len(), "Remote user updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_url_trims_trailing_slash() {
        let client =
            HttpUserClient::new("https://api.example.com/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.user_url(), "https://api.example.com/users/me");
    }
}
