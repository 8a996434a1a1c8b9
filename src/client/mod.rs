//! Client side: a fetch wrapper that pays when asked to.
//!
//! [`X402Client::fetch`] sends a request; if the answer is `402 Payment
//! Required` it picks one of the offered requirements, has the [`Signer`]
//! produce a payload, and resends the same request once with the payload in
//! the `X-PAYMENT` header. At most two requests go out per call.
//!
//! ```no_run
//! # use x402_paywall::client::{Signer, X402Client};
//! # async fn run(signer: impl Signer) -> Result<(), Box<dyn std::error::Error>> {
//! let client = X402Client::new(reqwest::Client::new(), signer);
//! let request = http::Request::get("http://localhost:5678/protected").body(bytes::Bytes::new())?;
//! let response = client.fetch(request).await?;
//! if let Some(receipt) = x402_paywall::proto::decode_payment_response(response.headers()) {
//!     println!("paid in {}", receipt.transaction);
//! }
//! # Ok(())
//! # }
//! ```

pub mod signer;
pub mod transport;

pub use signer::*;
pub use transport::*;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use std::time::Duration;

use crate::chain::TokenAmount;
use crate::proto::{CodecError, PAYMENT_HEADER, PaymentRequired, PaymentRequirements};

/// How long the signer gets before the call fails.
pub const DEFAULT_SIGNING_TIMEOUT: Duration = Duration::from_secs(30);

/// Default payment ceiling in atomic units: 0.1 of a 6-decimal token such as USDC.
pub const DEFAULT_MAX_AMOUNT: u64 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum X402ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A 402 body that is not a payment challenge.
    #[error("Invalid payment challenge: {0}")]
    InvalidChallenge(String),

    #[error("No acceptable payment option among {offered} offered")]
    NoAcceptablePaymentOption { offered: usize },

    #[error("Signing failed: {0}")]
    SigningFailed(#[source] SignerError),

    #[error("Signer did not answer within {0:?}")]
    SigningTimeout(Duration),

    /// The paid retry was answered with another 402.
    #[error("Payment rejected: {reason}")]
    PaymentRejected {
        reason: String,
        response: Box<http::Response<Bytes>>,
    },

    #[error("Could not encode payment header: {0}")]
    Encode(#[from] CodecError),
}

/// HTTP client that settles `402 Payment Required` responses.
#[derive(Debug, Clone)]
pub struct X402Client<T, S> {
    transport: T,
    signer: S,
    max_amount: Option<TokenAmount>,
    signing_timeout: Duration,
}

impl<T, S> X402Client<T, S>
where
    T: HttpTransport,
    S: Signer,
{
    pub fn new(transport: T, signer: S) -> Self {
        Self {
            transport,
            signer,
            max_amount: Some(TokenAmount::from(DEFAULT_MAX_AMOUNT)),
            signing_timeout: DEFAULT_SIGNING_TIMEOUT,
        }
    }

    /// Refuse requirements asking for more than `max_amount` atomic units.
    pub fn with_max_amount(mut self, max_amount: impl Into<TokenAmount>) -> Self {
        self.max_amount = Some(max_amount.into());
        self
    }

    /// Pay whatever amount the server asks for.
    pub fn without_max_amount(mut self) -> Self {
        self.max_amount = None;
        self
    }

    pub fn with_signing_timeout(mut self, timeout: Duration) -> Self {
        self.signing_timeout = timeout;
        self
    }

    /// The first requirement the signer can pay within the amount ceiling.
    pub fn select<'a>(&self, accepts: &'a [PaymentRequirements]) -> Option<&'a PaymentRequirements> {
        accepts.iter().find(|requirements| {
            self.max_amount.is_none_or(|max| requirements.amount <= max) && self.signer.can_sign(requirements)
        })
    }

    /// Sends `request`, paying and retrying once if the server asks for payment.
    ///
    /// Non-402 responses, including errors, are returned untouched.
    pub async fn fetch<B>(&self, request: http::Request<B>) -> Result<http::Response<Bytes>, X402ClientError>
    where
        B: Into<Bytes>,
    {
        let request = Replayable::from(request);

        let response = self.transport.send(request.build(None)).await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(response);
        }

        let challenge: PaymentRequired = serde_json::from_slice(response.body())
            .map_err(|e| X402ClientError::InvalidChallenge(e.to_string()))?;
        tracing::debug!(
            uri = %request.uri,
            offered = challenge.accepts.len(),
            "Payment required"
        );

        let requirements = self
            .select(&challenge.accepts)
            .ok_or(X402ClientError::NoAcceptablePaymentOption {
                offered: challenge.accepts.len(),
            })?;

        let payload = match tokio::time::timeout(self.signing_timeout, self.signer.sign(requirements)).await {
            Ok(result) => result.map_err(X402ClientError::SigningFailed)?,
            Err(_) => return Err(X402ClientError::SigningTimeout(self.signing_timeout)),
        };
        let header = payload.to_header_value()?;

        tracing::info!(
            uri = %request.uri,
            amount = %requirements.amount,
            network = %requirements.network,
            pay_to = %requirements.pay_to,
            "Retrying with payment"
        );
        let response = self.transport.send(request.build(Some(header))).await?;
        if response.status() == StatusCode::PAYMENT_REQUIRED {
            let reason = rejection_reason(response.body());
            tracing::warn!(uri = %request.uri, reason = %reason, "Payment rejected");
            return Err(X402ClientError::PaymentRejected {
                reason,
                response: Box::new(response),
            });
        }
        Ok(response)
    }
}

fn rejection_reason(body: &[u8]) -> String {
    serde_json::from_slice::<PaymentRequired>(body)
        .ok()
        .map(|rejection| rejection.error)
        .filter(|error| !error.is_empty())
        .unwrap_or_else(|| "payment_rejected".to_string())
}

/// A buffered request that can be sent twice.
struct Replayable {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl<B: Into<Bytes>> From<http::Request<B>> for Replayable {
    fn from(request: http::Request<B>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body: body.into(),
        }
    }
}

impl Replayable {
    fn build(&self, payment: Option<HeaderValue>) -> http::Request<Bytes> {
        let mut request = http::Request::new(self.body.clone());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        if let Some(payment) = payment {
            request.headers_mut().insert(PAYMENT_HEADER, payment);
        }
        request
    }
}
