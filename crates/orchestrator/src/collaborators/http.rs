//! HTTP adapter for tier collaborators.
//!
//! POSTs `{tier_input, cascade_key}` as JSON and expects `{output: object}`
//! back. Any non-2xx status is a collaborator failure carrying the body.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::tier::{Collaborator, CollaboratorError, TierRequest};

#[derive(Debug, Deserialize)]
struct CollaboratorResponse {
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// A collaborator reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCollaborator {
    name: String,
    url: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpCollaborator {
    /// Create an adapter for the collaborator at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let name = name.into();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| CollaboratorError::unreachable(name.clone(), e.to_string()))?;

        Ok(Self {
            name,
            url: url.into(),
            timeout,
            http_client,
        })
    }

    /// The endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Collaborator for HttpCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call(&self, request: &TierRequest) -> Result<serde_json::Value, CollaboratorError> {
        debug!(collaborator = %self.name, url = %self.url, "sending tier request");

        let response = self
            .http_client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| CollaboratorError::unreachable(self.name.clone(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::failed(
                self.name.clone(),
                format!("HTTP {status}: {body}"),
            ));
        }

        let body: CollaboratorResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::malformed(self.name.clone(), e.to_string()))?;

        match body {
            CollaboratorResponse {
                error: Some(reason),
                ..
            } => Err(CollaboratorError::failed(self.name.clone(), reason)),
            CollaboratorResponse {
                output: Some(output),
                ..
            } => Ok(output),
            CollaboratorResponse { output: None, .. } => Err(CollaboratorError::malformed(
                self.name.clone(),
                "response has no 'output' field",
            )),
        }
    }
}
