//! Upstream prediction client
//!
//! HTTP client for forwarding predict requests to an external service.

use std::time::Duration;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Request(String),
}

/// Reply relayed back to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: Value,
}

/// Upstream API client
pub struct UpstreamClient {
    base_url: String,
    token: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeout,
            http_client,
        })
    }

    pub fn predict_url(&self) -> String {
        format!("{}/predict", self.base_url)
    }

    /// POST `{samples}` upstream. A body that is not JSON comes back as
    /// `{status_code, text}`.
    pub async fn forward(&self, samples: &[Value]) -> Result<UpstreamReply, UpstreamError> {
        let url = self.predict_url();
        tracing::debug!("Forwarding {} samples to {}", samples.len(), url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "samples": samples }))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.classify(e))?;

        let body = match serde_json::from_str::<Value>(&text) {
            Ok(body) => body,
            Err(_) => {
                tracing::warn!(status, "Upstream returned a non-JSON body");
                json!({ "status_code": status, "text": text })
            }
        };

        Ok(UpstreamReply { status, body })
    }

    fn classify(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Request(err.to_string())
        }
    }
}
