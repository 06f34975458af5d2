//! Fetch outcomes shared between coalesced callers
//!
//! Every caller waiting on the same in-flight request receives a clone of the
//! same outcome, so the error type carries only owned, cloneable data.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// HTTP status signalling an expected logged-out state
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Error returned from a fetch routed through the coalescer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Remote answered with a non-success status
    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// Request never produced a response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The task driving the request ended without reporting an outcome
    #[error("Request abandoned before completion")]
    Abandoned,
}

impl FetchError {
    /// HTTP status attached to this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for authentication failures, which are not logged
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(STATUS_UNAUTHORIZED)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::Status {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None if e.is_decode() => FetchError::Decode(e.to_string()),
            None => FetchError::Transport(e.to_string()),
        }
    }
}

/// Thin JSON GET client used to build fetch closures for the coalescer
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    bearer_token: Option<String>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, bearer_token: Option<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self { client, bearer_token })
    }

    /// GET `url` and decode the body as JSON
    pub async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let mut request = self.client.get(url);
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(url = url, status = status.as_u16(), "HTTP fetch completed");

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}
