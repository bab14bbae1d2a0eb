//! Cloudlet registry protocol client
//!
//! The registry speaks a small HTTP protocol: a POST with url-encoded
//! `user_id`, `app_id` and `action` fields creates or deletes a session,
//! and a GET with `user_id`/`app_id` query parameters reports the tunnel
//! address assigned to the session (or the literal `None` while the
//! cloudlet is still provisioning).
//!
//! The client performs no retries; periodic re-issue of the status GET is
//! the polling scheduler's job.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;

use crate::config::RegistryConfig;

/// Session action sent to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Request a new cloudlet session
    Create,
    /// Tear down an existing cloudlet session
    Delete,
}

impl SessionAction {
    /// Wire form of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Create => "create",
            SessionAction::Delete => "delete",
        }
    }
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from registry requests
///
/// Every variant is transient from the caller's point of view: the request
/// failed, nothing more. Retry policy lives with the caller.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status: {0}")]
    Status(u16),
}

/// Client side of the cloudlet registry protocol
#[async_trait]
pub trait CloudletRegistry: Send + Sync {
    /// Issue a create/delete request for a (user, app) session
    ///
    /// Returns the response body on HTTP 200; any other outcome is an error.
    async fn request(
        &self,
        action: SessionAction,
        app_id: &str,
        user_id: &str,
    ) -> Result<String, RegistryError>;

    /// Query the tunnel address assigned to a (user, app) session
    ///
    /// Returns the raw response body; the literal string `None` means the
    /// address is not assigned yet.
    async fn poll_status(&self, user_id: &str, app_id: &str) -> Result<String, RegistryError>;
}

/// HTTP implementation of [`CloudletRegistry`] backed by reqwest
#[derive(Clone)]
pub struct HttpRegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistryClient {
    /// Create a client with the configured endpoint and timeouts
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// The configured registry endpoint
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CloudletRegistry for HttpRegistryClient {
    async fn request(
        &self,
        action: SessionAction,
        app_id: &str,
        user_id: &str,
    ) -> Result<String, RegistryError> {
        let response = self
            .client
            .post(&self.base_url)
            .form(&[
                ("user_id", user_id),
                ("app_id", app_id),
                ("action", action.as_str()),
            ])
            .send()
            .await?;

        read_body_strict(response).await
    }

    async fn poll_status(&self, user_id: &str, app_id: &str) -> Result<String, RegistryError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("user_id", user_id), ("app_id", app_id)])
            .send()
            .await?;

        read_body_strict(response).await
    }
}

/// Accept only HTTP 200 and return the body with line breaks stripped
async fn read_body_strict(response: reqwest::Response) -> Result<String, RegistryError> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(RegistryError::Status(status.as_u16()));
    }

    let text = response.text().await?;
    Ok(text.lines().collect())
}
