//! The payment gate: challenge, verify, settle.
//!
//! For a protected route a request goes through at most one `verify` and at
//! most one `settle` call, in that order, and the protected handler runs only
//! after settlement succeeded. Dropping the future returned by
//! [`PaymentGate::check`] cancels the facilitator call in flight.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, Method, StatusCode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::facilitator::{Facilitator, FacilitatorClient, FacilitatorError};
use crate::proto::{
    CodecError, ErrorBody, ExactScheme, PaymentPayload, PaymentRequired, PaymentRequirements, SettleResponse,
    VerifyRequest, X402_VERSION,
};
use crate::server::config::{ConfigError, PaywallConfig, RouteTable};

/// Error text of the initial challenge.
pub const PAYMENT_REQUIRED_ERROR: &str = "X-PAYMENT header is required";

/// What the gate decided for a request that may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// The route is not protected.
    Pass,
    /// Payment verified and settled; the receipt goes back to the client.
    Paid(SettleResponse),
}

/// Why a request must not reach the protected handler.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No payment attached. Carries the challenge.
    #[error("X-PAYMENT header is required")]
    PaymentRequired { accepts: Vec<PaymentRequirements> },

    /// The payment header could not be decoded.
    #[error("Malformed payment payload: {0}")]
    MalformedPayload(#[source] CodecError),

    /// The payment was refused by a local check, `verify`, or `settle`.
    #[error("Payment rejected: {reason}")]
    PaymentRejected {
        reason: String,
        accepts: Vec<PaymentRequirements>,
    },

    /// The facilitator gave no answer.
    #[error("Facilitator unavailable: {0}")]
    FacilitatorUnavailable(#[source] FacilitatorError),
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::PaymentRequired { .. } | GateError::PaymentRejected { .. } => StatusCode::PAYMENT_REQUIRED,
            GateError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            GateError::FacilitatorUnavailable(e) if e.is_timeout() => StatusCode::SERVICE_UNAVAILABLE,
            GateError::FacilitatorUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            GateError::PaymentRequired { accepts } => {
                let body = PaymentRequired {
                    x402_version: X402_VERSION,
                    error: PAYMENT_REQUIRED_ERROR.to_string(),
                    accepts,
                };
                (status, Json(body)).into_response()
            }
            GateError::PaymentRejected { reason, accepts } => {
                let body = PaymentRequired {
                    x402_version: X402_VERSION,
                    error: reason,
                    accepts,
                };
                (status, Json(body)).into_response()
            }
            GateError::MalformedPayload(_) => {
                (status, Json(ErrorBody::new("malformed_payment_payload"))).into_response()
            }
            GateError::FacilitatorUnavailable(_) => {
                (status, Json(ErrorBody::new("facilitator_unavailable"))).into_response()
            }
        }
    }
}

/// Payment gate over a fixed route table.
///
/// Cheap to clone; holds no per-request state.
#[derive(Clone)]
pub struct PaymentGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    routes: RouteTable,
    facilitator: Arc<dyn Facilitator>,
    timeout: Duration,
    resource_base_url: Option<String>,
}

impl std::fmt::Debug for PaymentGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGate")
            .field("routes", &self.inner.routes)
            .field("timeout", &self.inner.timeout)
            .field("resource_base_url", &self.inner.resource_base_url)
            .finish_non_exhaustive()
    }
}

impl PaymentGate {
    /// Builds a gate that talks to `facilitator`.
    ///
    /// The facilitator URL in `config` is ignored here; only its timeout is used.
    pub fn new<F>(config: PaywallConfig, facilitator: F) -> Result<Self, ConfigError>
    where
        F: Facilitator + 'static,
    {
        let routes = RouteTable::compile(&config)?;
        let timeout = config.facilitator.timeout();
        if timeout.is_zero() {
            return Err(ConfigError::ZeroFacilitatorTimeout);
        }
        tracing::info!(
            routes = routes.len(),
            pay_to = %config.pay_to,
            "Payment gate configured"
        );
        Ok(Self {
            inner: Arc::new(GateInner {
                routes,
                facilitator: Arc::new(facilitator),
                timeout,
                resource_base_url: config
                    .resource_base_url
                    .map(|url| url.trim_end_matches('/').to_string()),
            }),
        })
    }

    /// Builds a gate that talks to the remote facilitator named in `config`.
    pub fn from_config(config: PaywallConfig) -> Result<Self, ConfigError> {
        let facilitator = FacilitatorClient::try_from_config(&config.facilitator)
            .map_err(|e| ConfigError::InvalidFacilitatorUrl(e.to_string()))?;
        Self::new(config, facilitator)
    }

    /// Requirements a request to `method path` would be challenged with.
    pub fn requirements_for(&self, method: &Method, path: &str) -> Option<PaymentRequirements> {
        self.inner
            .routes
            .find(method, path)
            .map(|route| route.requirements(&self.resource_for(path)))
    }

    fn resource_for(&self, path: &str) -> String {
        match &self.inner.resource_base_url {
            Some(base) => format!("{base}{path}"),
            None => path.to_string(),
        }
    }

    /// Decides whether a request may reach its handler.
    ///
    /// `payment` is the raw `X-PAYMENT` header, if any. An empty value counts
    /// as absent.
    pub async fn check(
        &self,
        method: &Method,
        path: &str,
        payment: Option<&HeaderValue>,
    ) -> Result<GateOutcome, GateError> {
        let Some(requirements) = self.requirements_for(method, path) else {
            return Ok(GateOutcome::Pass);
        };

        let Some(header) = payment.filter(|value| !value.as_bytes().trim_ascii().is_empty()) else {
            tracing::debug!(%method, path, "Payment required");
            return Err(GateError::PaymentRequired {
                accepts: vec![requirements],
            });
        };

        let payload = PaymentPayload::from_header_value(header).map_err(|e| {
            tracing::debug!(%method, path, error = %e, "Malformed payment header");
            GateError::MalformedPayload(e)
        })?;

        if let Some(reason) = binding_mismatch(&payload, &requirements) {
            tracing::debug!(%method, path, reason = %reason, "Payment does not match requirements");
            return Err(rejected(reason, requirements));
        }

        let request = VerifyRequest::new(payload, requirements);
        let verdict = self.call(self.inner.facilitator.verify(&request)).await?;
        if !verdict.is_valid {
            let reason = verdict.invalid_reason.unwrap_or_else(|| "payment_rejected".to_string());
            tracing::info!(%method, path, reason = %reason, payer = ?verdict.payer, "Payment rejected by facilitator");
            return Err(rejected(reason, request.payment_requirements));
        }

        let receipt = self.call(self.inner.facilitator.settle(&request)).await?;
        if !receipt.success {
            let reason = receipt
                .error_reason
                .unwrap_or_else(|| "settlement_failed".to_string());
            tracing::warn!(%method, path, reason = %reason, "Settlement failed");
            return Err(rejected(reason, request.payment_requirements));
        }

        tracing::info!(
            %method,
            path,
            transaction = %receipt.transaction,
            network = %receipt.network,
            "Payment settled"
        );
        Ok(GateOutcome::Paid(receipt))
    }

    async fn call<T, Fut>(&self, fut: Fut) -> Result<T, GateError>
    where
        Fut: Future<Output = Result<T, FacilitatorError>>,
    {
        let timeout = self.inner.timeout;
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(FacilitatorError::Timeout(timeout)),
        };
        result.map_err(|e| {
            tracing::warn!(error = %e, "Facilitator call failed");
            GateError::FacilitatorUnavailable(e)
        })
    }
}

fn rejected(reason: impl Into<String>, requirements: PaymentRequirements) -> GateError {
    GateError::PaymentRejected {
        reason: reason.into(),
        accepts: vec![requirements],
    }
}

/// Checks that do not need the facilitator.
fn binding_mismatch(payload: &PaymentPayload, requirements: &PaymentRequirements) -> Option<&'static str> {
    if payload.x402_version != X402_VERSION {
        return Some("invalid_x402_version");
    }
    if ExactScheme != payload.scheme || payload.scheme != requirements.scheme {
        return Some("invalid_scheme");
    }
    if payload.network != requirements.network {
        return Some("invalid_network");
    }
    if payload.resource.as_deref() != Some(requirements.resource.as_str()) {
        return Some("resource_mismatch");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Network;
    use crate::chain::TokenAmount;
    use crate::proto::{ExactEvmAuthorization, SupportedResponse, UnixTimestamp, VerifyResponse};
    use crate::server::config::RouteConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";
    const PAYER: &str = "0x857b06519E91e3A54538791bDbb0E22373e36b66";

    #[derive(Default)]
    struct CountingFacilitator {
        verified: AtomicUsize,
        settled: AtomicUsize,
    }

    #[async_trait]
    impl Facilitator for CountingFacilitator {
        async fn verify(&self, _request: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError> {
            self.verified.fetch_add(1, Ordering::SeqCst);
            Ok(VerifyResponse::valid(PAYER))
        }

        async fn settle(&self, request: &VerifyRequest) -> Result<SettleResponse, FacilitatorError> {
            self.settled.fetch_add(1, Ordering::SeqCst);
            Ok(SettleResponse::settled(
                "0xfeed",
                request.payment_requirements.network.clone(),
                PAYER,
            ))
        }

        async fn supported(&self) -> Result<SupportedResponse, FacilitatorError> {
            Ok(SupportedResponse::default())
        }
    }

    fn gate(facilitator: Arc<CountingFacilitator>) -> PaymentGate {
        let config = PaywallConfig::new(PAY_TO).route("GET /protected", RouteConfig::new("$0.001", "base-sepolia"));
        PaymentGate::new(config, facilitator).unwrap()
    }

    fn payment_for(requirements: &PaymentRequirements) -> PaymentPayload {
        let authorization = ExactEvmAuthorization {
            from: PAYER.to_string(),
            to: requirements.pay_to.clone(),
            value: requirements.amount,
            valid_after: UnixTimestamp(0),
            valid_before: UnixTimestamp(u64::MAX),
            nonce: format!("0x{}", "11".repeat(32)),
        };
        PaymentPayload::exact(requirements, format!("0x{}", "ab".repeat(65)), authorization)
    }

    #[tokio::test]
    async fn test_unprotected_route_passes() {
        let facilitator = Arc::new(CountingFacilitator::default());
        let gate = gate(facilitator.clone());
        let outcome = gate.check(&Method::GET, "/", None).await.unwrap();
        assert_eq!(outcome, GateOutcome::Pass);
        assert_eq!(facilitator.verified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_header_is_challenged() {
        let gate = gate(Arc::default());
        let empty = HeaderValue::from_static("  ");
        for header in [None, Some(&empty)] {
            let err = gate.check(&Method::GET, "/protected", header).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
            match err {
                GateError::PaymentRequired { accepts } => {
                    assert_eq!(accepts.len(), 1);
                    assert_eq!(accepts[0].resource, "/protected");
                    assert_eq!(accepts[0].amount, TokenAmount::from(1_000u64));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_paid_request_verifies_and_settles_once() {
        let facilitator = Arc::new(CountingFacilitator::default());
        let gate = gate(facilitator.clone());
        let requirements = gate.requirements_for(&Method::GET, "/protected").unwrap();
        let header = payment_for(&requirements).to_header_value().unwrap();

        let outcome = gate.check(&Method::GET, "/protected", Some(&header)).await.unwrap();
        match outcome {
            GateOutcome::Paid(receipt) => assert_eq!(receipt.transaction, "0xfeed"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(facilitator.verified.load(Ordering::SeqCst), 1);
        assert_eq!(facilitator.settled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_mismatches_skip_facilitator() {
        let facilitator = Arc::new(CountingFacilitator::default());
        let gate = gate(facilitator.clone());
        let requirements = gate.requirements_for(&Method::GET, "/protected").unwrap();

        let mut wrong_network = payment_for(&requirements);
        wrong_network.network = Network::new("base");
        let mut wrong_scheme = payment_for(&requirements);
        wrong_scheme.scheme = "upto".to_string();
        let mut wrong_resource = payment_for(&requirements);
        wrong_resource.resource = Some("/other".to_string());
        let mut unbound = payment_for(&requirements);
        unbound.resource = None;
        let mut wrong_version = payment_for(&requirements);
        wrong_version.x402_version = 2;

        for (payload, expected) in [
            (wrong_network, "invalid_network"),
            (wrong_scheme, "invalid_scheme"),
            (wrong_resource, "resource_mismatch"),
            (unbound, "resource_mismatch"),
            (wrong_version, "invalid_x402_version"),
        ] {
            let header = payload.to_header_value().unwrap();
            let err = gate.check(&Method::GET, "/protected", Some(&header)).await.unwrap_err();
            match err {
                GateError::PaymentRejected { reason, .. } => assert_eq!(reason, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(facilitator.verified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_header_is_bad_request() {
        let gate = gate(Arc::default());
        let header = HeaderValue::from_static("%%%");
        let err = gate.check(&Method::GET, "/protected", Some(&header)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_facilitator_error_status() {
        let timeout = GateError::FacilitatorUnavailable(FacilitatorError::Timeout(Duration::from_secs(1)));
        assert_eq!(timeout.status(), StatusCode::SERVICE_UNAVAILABLE);
        let down = GateError::FacilitatorUnavailable(FacilitatorError::Transport("refused".into()));
        assert_eq!(down.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_resource_base_url() {
        let config = PaywallConfig::new(PAY_TO)
            .route("/protected", RouteConfig::new("$1", "base"))
            .resource_base_url("https://api.example.com/");
        let gate = PaymentGate::new(config, CountingFacilitator::default()).unwrap();
        let requirements = gate.requirements_for(&Method::GET, "/protected").unwrap();
        assert_eq!(requirements.resource, "https://api.example.com/protected");
    }

    #[test]
    fn test_zero_facilitator_timeout() {
        let config = PaywallConfig::new(PAY_TO)
            .route("/protected", RouteConfig::new("$1", "base"))
            .facilitator(crate::facilitator::FacilitatorConfig::new("http://127.0.0.1:4020").with_timeout(Duration::ZERO));
        assert!(matches!(
            PaymentGate::new(config, CountingFacilitator::default()),
            Err(ConfigError::ZeroFacilitatorTimeout)
        ));
    }

    #[test]
    fn test_invalid_facilitator_url() {
        let config = PaywallConfig::new(PAY_TO).facilitator(crate::facilitator::FacilitatorConfig::new("ftp://nope"));
        assert!(matches!(
            PaymentGate::from_config(config),
            Err(ConfigError::InvalidFacilitatorUrl(_))
        ));
    }
}
