//! HTTP client for a remote facilitator.

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{Facilitator, FacilitatorConfig, FacilitatorError};
use crate::proto::{SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse};

/// Talks to a facilitator over its JSON HTTP API.
///
/// # Example
///
/// ```ignore
/// use x402_paywall::facilitator::{FacilitatorClient, FacilitatorConfig};
///
/// let client = FacilitatorClient::try_from_config(&FacilitatorConfig::default())?;
/// ```
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    http: reqwest::Client,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    timeout: Duration,
}

impl FacilitatorClient {
    /// Creates a client from configuration, validating the base URL.
    pub fn try_from_config(config: &FacilitatorConfig) -> Result<Self, FacilitatorError> {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    /// Creates a client reusing an existing `reqwest::Client`.
    pub fn with_http_client(
        http: reqwest::Client,
        config: &FacilitatorConfig,
    ) -> Result<Self, FacilitatorError> {
        let base = config.url.trim_end_matches('/');
        let endpoint = |path: &str| -> Result<Url, FacilitatorError> {
            let url = Url::parse(&format!("{base}/{path}"))
                .map_err(|e| FacilitatorError::InvalidUrl(format!("{}: {e}", config.url)))?;
            match url.scheme() {
                "http" | "https" => Ok(url),
                other => Err(FacilitatorError::InvalidUrl(format!(
                    "{}: unsupported scheme {other}",
                    config.url
                ))),
            }
        };
        Ok(Self {
            verify_url: endpoint("verify")?,
            settle_url: endpoint("settle")?,
            supported_url: endpoint("supported")?,
            http,
            timeout: config.timeout(),
        })
    }

    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> FacilitatorError {
        if e.is_timeout() {
            FacilitatorError::Timeout(self.timeout)
        } else {
            FacilitatorError::Transport(e.to_string())
        }
    }

    /// Decodes a facilitator answer.
    ///
    /// Facilitators commonly reject a payload with a 4xx status and a regular
    /// verdict body; that is still an answer. 5xx or an undecodable body is not.
    async fn read_verdict<R: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<R, FacilitatorError> {
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|e| FacilitatorError::InvalidResponse(e.to_string()));
        }
        if status.is_client_error() {
            if let Ok(verdict) = serde_json::from_slice(&body) {
                return Ok(verdict);
            }
        }
        Err(FacilitatorError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    async fn post_json<B, R>(&self, url: &Url, body: &B) -> Result<R, FacilitatorError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(url.clone())
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.read_verdict(response).await
    }
}

#[async_trait]
impl Facilitator for FacilitatorClient {
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError> {
        tracing::debug!(url = %self.verify_url, "Calling facilitator verify");
        self.post_json(&self.verify_url, request).await
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, FacilitatorError> {
        tracing::debug!(url = %self.settle_url, "Calling facilitator settle");
        self.post_json(&self.settle_url, request).await
    }

    async fn supported(&self) -> Result<SupportedResponse, FacilitatorError> {
        let response = self
            .http
            .get(self.supported_url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.read_verdict(response).await
    }
}
