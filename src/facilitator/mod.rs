//! The facilitator boundary.
//!
//! A facilitator is the external service that checks a payment payload against
//! its requirements (`verify`) and executes the transfer (`settle`). The gate
//! only ever talks to it through the [`Facilitator`] trait, which makes it
//! possible to plug in:
//!
//! - [`FacilitatorClient`] - HTTP client for a remote facilitator (`server` feature)
//! - [`InMemoryFacilitator`] - chain-less facilitator with a nonce ledger, for
//!   development and tests (`facilitator` feature)
//!
//! Replay protection is the facilitator's job. The gate keeps no nonce cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::proto::{SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse};

#[cfg(feature = "server")]
pub mod remote;
#[cfg(feature = "server")]
pub use remote::*;

#[cfg(feature = "facilitator")]
pub mod memory;
#[cfg(feature = "facilitator")]
pub use memory::*;

/// Public facilitator for Base Sepolia.
pub const DEFAULT_FACILITATOR_URL: &str = "https://x402.org/facilitator";

/// Default upper bound on a single facilitator call.
pub const DEFAULT_FACILITATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the facilitator lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorConfig {
    /// Base URL; `/verify`, `/settle`, and `/supported` are appended.
    pub url: String,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    duration_millis(DEFAULT_FACILITATOR_TIMEOUT)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FACILITATOR_URL.to_string(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl FacilitatorConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_millis(timeout);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Verification and settlement of payment payloads.
///
/// A rejected payment is not an error: it is an `Ok` response with
/// `is_valid = false` / `success = false`. Errors mean the facilitator
/// could not give an answer at all.
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Checks a payload against its requirements without moving funds.
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError>;

    /// Executes the payment. Called at most once per verified request.
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, FacilitatorError>;

    /// Lists the scheme/network pairs this facilitator handles.
    async fn supported(&self) -> Result<SupportedResponse, FacilitatorError>;
}

#[async_trait]
impl<T> Facilitator for Arc<T>
where
    T: Facilitator + ?Sized,
{
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError> {
        self.as_ref().verify(request).await
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, FacilitatorError> {
        self.as_ref().settle(request).await
    }

    async fn supported(&self) -> Result<SupportedResponse, FacilitatorError> {
        self.as_ref().supported().await
    }
}

/// The facilitator could not be reached or did not answer sensibly.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    /// The configured URL is not usable.
    #[error("Invalid facilitator URL: {0}")]
    InvalidUrl(String),

    /// Connection or protocol failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No answer within the allotted time.
    #[error("Facilitator timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success status without a usable body.
    #[error("Facilitator returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The body could not be decoded.
    #[error("Invalid facilitator response: {0}")]
    InvalidResponse(String),
}

impl FacilitatorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FacilitatorError::Timeout(_))
    }
}
