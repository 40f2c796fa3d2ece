//! Boot decision service client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::types::{BootConfigRequest, BootConfigResponse};
use crate::error::ResolveError;

/// Source of boot decisions.
#[async_trait]
pub trait BootDecisionClient: Send + Sync {
    async fn fetch(&self, request: &BootConfigRequest) -> Result<BootConfigResponse, ResolveError>;

    /// Where decisions come from, for logs.
    fn endpoint(&self) -> &str;
}

/// JSON over HTTP: POST the request, expect `200` with a JSON body.
#[derive(Debug, Clone)]
pub struct HttpDecisionClient {
    client: reqwest::Client,
    url: String,
}

impl HttpDecisionClient {
    /// `timeout` bounds the whole exchange, body included.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BootDecisionClient for HttpDecisionClient {
    async fn fetch(&self, request: &BootConfigRequest) -> Result<BootConfigResponse, ResolveError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ResolveError::Timeout
                } else {
                    ResolveError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ResolveError::Status(status.as_u16()));
        }

        response
            .json::<BootConfigResponse>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ResolveError::Timeout
                } else {
                    ResolveError::Decode(e.to_string())
                }
            })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
