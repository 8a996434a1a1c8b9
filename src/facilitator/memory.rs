//! Chain-less facilitator with a single-use nonce ledger.
//!
//! [`InMemoryFacilitator`] performs every structural check a real `exact`
//! facilitator performs (binding, recipient, amount, validity window, nonce
//! reuse) but does not recover signatures or move funds. It backs the
//! development facilitator binary and the test suites.
//!
//! 1. **Verify**: checks the payload against the requirements and the ledger
//! 2. **Settle**: re-verifies and consumes the nonce atomically

use alloy_primitives::{Address, keccak256};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Facilitator, FacilitatorError};
use crate::chain::Network;
use crate::proto::{
    ExactScheme, PaymentPayload, PaymentRequirements, SettleRequest, SettleResponse,
    SupportedPaymentKind, SupportedResponse, UnixTimestamp, VerifyRequest, VerifyResponse,
    X402_VERSION,
};

/// Length of an ECDSA signature (r, s, v).
const SIGNATURE_BYTE_LEN: usize = 65;

/// Why the in-memory facilitator refused a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentRejection {
    #[error("Unsupported x402 version {0}")]
    InvalidVersion(u8),

    #[error("Scheme mismatch: expected {expected}, got {got}")]
    SchemeMismatch { expected: String, got: String },

    #[error("Network {0} is not supported or does not match")]
    NetworkMismatch(Network),

    #[error("Payload was minted for a different resource")]
    ResourceMismatch,

    #[error("Recipient mismatch: expected {expected}, got {got}")]
    RecipientMismatch { expected: String, got: String },

    #[error("Insufficient payment: required {required}, got {got}")]
    InsufficientAmount { required: String, got: String },

    #[error("Authorization expired at {0}")]
    Expired(u64),

    #[error("Authorization not valid before {0}")]
    NotYetValid(u64),

    #[error("Malformed signature")]
    InvalidSignature,

    #[error("Nonce already used")]
    NonceAlreadyUsed,
}

impl PaymentRejection {
    /// Machine-readable reason, as sent on the wire.
    pub fn reason(&self) -> &'static str {
        match self {
            PaymentRejection::InvalidVersion(_) => "invalid_x402_version",
            PaymentRejection::SchemeMismatch { .. } => "invalid_scheme",
            PaymentRejection::NetworkMismatch(_) => "invalid_network",
            PaymentRejection::ResourceMismatch => "resource_mismatch",
            PaymentRejection::RecipientMismatch { .. } => {
                "invalid_exact_evm_payload_recipient_mismatch"
            }
            PaymentRejection::InsufficientAmount { .. } => "insufficient_funds",
            PaymentRejection::Expired(_) => "invalid_exact_evm_payload_authorization_valid_before",
            PaymentRejection::NotYetValid(_) => {
                "invalid_exact_evm_payload_authorization_valid_after"
            }
            PaymentRejection::InvalidSignature => "invalid_exact_evm_payload_signature",
            PaymentRejection::NonceAlreadyUsed => "nonce_already_used",
        }
    }
}

type Clock = Arc<dyn Fn() -> UnixTimestamp + Send + Sync>;

/// Facilitator that keeps consumed nonces in memory.
///
/// # Example
///
/// ```
/// use x402_paywall::KnownNetwork;
/// use x402_paywall::chain::Network;
/// use x402_paywall::facilitator::InMemoryFacilitator;
///
/// let facilitator = InMemoryFacilitator::new([Network::base_sepolia()]);
/// ```
pub struct InMemoryFacilitator {
    networks: Vec<Network>,
    consumed: Mutex<HashSet<(String, String)>>,
    clock: Clock,
}

impl std::fmt::Debug for InMemoryFacilitator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryFacilitator")
            .field("networks", &self.networks)
            .finish()
    }
}

impl InMemoryFacilitator {
    /// Creates a facilitator accepting the `exact` scheme on `networks`.
    pub fn new(networks: impl IntoIterator<Item = Network>) -> Self {
        Self {
            networks: networks.into_iter().collect(),
            consumed: Mutex::new(HashSet::new()),
            clock: Arc::new(UnixTimestamp::now),
        }
    }

    /// Replaces the wall clock used for validity windows.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> UnixTimestamp + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Number of nonces consumed by successful settlements.
    pub async fn settled_count(&self) -> usize {
        self.consumed.lock().await.len()
    }

    fn check_payload(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        consumed: &HashSet<(String, String)>,
    ) -> Result<(), PaymentRejection> {
        check_requirements_match(payload, requirements)?;
        if !self.networks.contains(&requirements.network) {
            return Err(PaymentRejection::NetworkMismatch(requirements.network.clone()));
        }

        let authorization = &payload.payload.authorization;
        if !same_address(&authorization.to, &requirements.pay_to) {
            return Err(PaymentRejection::RecipientMismatch {
                expected: requirements.pay_to.clone(),
                got: authorization.to.clone(),
            });
        }
        if authorization.value < requirements.amount {
            return Err(PaymentRejection::InsufficientAmount {
                required: requirements.amount.to_string(),
                got: authorization.value.to_string(),
            });
        }

        let now = (self.clock)();
        if authorization.valid_before <= now {
            return Err(PaymentRejection::Expired(authorization.valid_before.0));
        }
        if authorization.valid_after > now {
            return Err(PaymentRejection::NotYetValid(authorization.valid_after.0));
        }

        let signature = payload.payload.signature.trim_start_matches("0x");
        match hex::decode(signature) {
            Ok(bytes) if bytes.len() == SIGNATURE_BYTE_LEN => {}
            _ => return Err(PaymentRejection::InvalidSignature),
        }

        if consumed.contains(&nonce_key(payload)) {
            return Err(PaymentRejection::NonceAlreadyUsed);
        }
        Ok(())
    }
}

/// Checks that the payload is bound to exactly these requirements.
fn check_requirements_match(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<(), PaymentRejection> {
    if payload.x402_version != X402_VERSION {
        return Err(PaymentRejection::InvalidVersion(payload.x402_version));
    }
    if payload.scheme != requirements.scheme || ExactScheme != requirements.scheme {
        return Err(PaymentRejection::SchemeMismatch {
            expected: requirements.scheme.clone(),
            got: payload.scheme.clone(),
        });
    }
    if payload.network != requirements.network {
        return Err(PaymentRejection::NetworkMismatch(payload.network.clone()));
    }
    if payload.resource.as_deref() != Some(requirements.resource.as_str()) {
        return Err(PaymentRejection::ResourceMismatch);
    }
    Ok(())
}

fn same_address(a: &str, b: &str) -> bool {
    match (a.parse::<Address>(), b.parse::<Address>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

/// ERC-3009 nonces are scoped to the authorizer.
fn nonce_key(payload: &PaymentPayload) -> (String, String) {
    let authorization = &payload.payload.authorization;
    (
        authorization.from.to_ascii_lowercase(),
        authorization.nonce.to_ascii_lowercase(),
    )
}

#[async_trait]
impl Facilitator for InMemoryFacilitator {
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError> {
        let payer = request.payment_payload.payload.authorization.from.clone();
        let consumed = self.consumed.lock().await;
        let verdict = self.check_payload(
            &request.payment_payload,
            &request.payment_requirements,
            &consumed,
        );
        Ok(match verdict {
            Ok(()) => VerifyResponse::valid(payer),
            Err(rejection) => {
                tracing::debug!(%payer, error = %rejection, "Payment payload rejected");
                VerifyResponse::invalid(rejection.reason(), Some(payer))
            }
        })
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, FacilitatorError> {
        let payload = &request.payment_payload;
        let payer = payload.payload.authorization.from.clone();
        let network = request.payment_requirements.network.clone();

        let mut consumed = self.consumed.lock().await;
        if let Err(rejection) = self.check_payload(payload, &request.payment_requirements, &consumed) {
            tracing::debug!(%payer, error = %rejection, "Settlement refused");
            return Ok(SettleResponse::failed(rejection.reason(), network, Some(payer)));
        }
        let key = nonce_key(payload);
        let transaction = keccak256(format!("{}:{}", key.0, key.1).as_bytes()).to_string();
        consumed.insert(key);

        tracing::info!(%payer, %network, %transaction, "Payment settled");
        Ok(SettleResponse::settled(transaction, network, payer))
    }

    async fn supported(&self) -> Result<SupportedResponse, FacilitatorError> {
        let kinds = self
            .networks
            .iter()
            .map(|network| SupportedPaymentKind {
                x402_version: X402_VERSION,
                scheme: ExactScheme.to_string(),
                network: network.clone(),
            })
            .collect();
        Ok(SupportedResponse { kinds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TokenAmount;
    use crate::proto::ExactEvmAuthorization;

    const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";
    const PAYER: &str = "0x857b06519E91e3A54538791bDbb0E22373e36b66";
    const NOW: u64 = 1_700_000_000;

    fn facilitator() -> InMemoryFacilitator {
        InMemoryFacilitator::new([Network::new("base-sepolia")]).with_clock(|| UnixTimestamp(NOW))
    }

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: Network::new("base-sepolia"),
            amount: TokenAmount::from(1_000u64),
            resource: "/protected".to_string(),
            description: String::new(),
            mime_type: "application/json".to_string(),
            pay_to: PAY_TO.to_string(),
            max_timeout_seconds: 60,
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            extra: None,
        }
    }

    fn payload(requirements: &PaymentRequirements, nonce: u8) -> PaymentPayload {
        PaymentPayload::exact(
            requirements,
            format!("0x{}", "11".repeat(SIGNATURE_BYTE_LEN)),
            ExactEvmAuthorization {
                from: PAYER.to_string(),
                to: requirements.pay_to.to_lowercase(),
                value: requirements.amount,
                valid_after: UnixTimestamp(NOW - 10),
                valid_before: UnixTimestamp(NOW + 60),
                nonce: format!("0x{}", hex::encode([nonce; 32])),
            },
        )
    }

    async fn verify_reason(payload: PaymentPayload) -> Option<String> {
        let request = VerifyRequest::new(payload, requirements());
        facilitator().verify(&request).await.unwrap().invalid_reason
    }

    #[tokio::test]
    async fn test_valid_payload_verifies() {
        let response = facilitator()
            .verify(&VerifyRequest::new(payload(&requirements(), 1), requirements()))
            .await
            .unwrap();
        assert!(response.is_valid);
        assert_eq!(response.payer.as_deref(), Some(PAYER));
    }

    #[tokio::test]
    async fn test_nonce_is_single_use() {
        let facilitator = facilitator();
        let request = VerifyRequest::new(payload(&requirements(), 7), requirements());

        let first = facilitator.settle(&request).await.unwrap();
        assert!(first.success);
        assert!(first.transaction.starts_with("0x"));

        let verify_again = facilitator.verify(&request).await.unwrap();
        assert_eq!(verify_again.invalid_reason.as_deref(), Some("nonce_already_used"));

        let settle_again = facilitator.settle(&request).await.unwrap();
        assert!(!settle_again.success);
        assert_eq!(settle_again.error_reason.as_deref(), Some("nonce_already_used"));
        assert_eq!(facilitator.settled_count().await, 1);
    }

    #[tokio::test]
    async fn test_scheme_and_network_mismatch_rejected() {
        let mut wrong_scheme = payload(&requirements(), 1);
        wrong_scheme.scheme = "upto".to_string();
        assert_eq!(verify_reason(wrong_scheme).await.as_deref(), Some("invalid_scheme"));

        let mut wrong_network = payload(&requirements(), 1);
        wrong_network.network = Network::new("base");
        assert_eq!(verify_reason(wrong_network).await.as_deref(), Some("invalid_network"));
    }

    #[tokio::test]
    async fn test_resource_binding() {
        let mut other_route = requirements();
        other_route.resource = "/other".to_string();
        let reason = verify_reason(payload(&other_route, 1)).await;
        assert_eq!(reason.as_deref(), Some("resource_mismatch"));
    }

    #[tokio::test]
    async fn test_amount_recipient_and_window() {
        let mut cheap = payload(&requirements(), 1);
        cheap.payload.authorization.value = TokenAmount::from(999u64);
        assert_eq!(verify_reason(cheap).await.as_deref(), Some("insufficient_funds"));

        let mut elsewhere = payload(&requirements(), 1);
        elsewhere.payload.authorization.to = PAYER.to_string();
        assert_eq!(
            verify_reason(elsewhere).await.as_deref(),
            Some("invalid_exact_evm_payload_recipient_mismatch")
        );

        let mut expired = payload(&requirements(), 1);
        expired.payload.authorization.valid_before = UnixTimestamp(NOW);
        assert_eq!(
            verify_reason(expired).await.as_deref(),
            Some("invalid_exact_evm_payload_authorization_valid_before")
        );

        let mut early = payload(&requirements(), 1);
        early.payload.authorization.valid_after = UnixTimestamp(NOW + 1);
        assert_eq!(
            verify_reason(early).await.as_deref(),
            Some("invalid_exact_evm_payload_authorization_valid_after")
        );
    }

    #[tokio::test]
    async fn test_malformed_signature_rejected() {
        let mut short = payload(&requirements(), 1);
        short.payload.signature = "0xdeadbeef".to_string();
        assert_eq!(
            verify_reason(short).await.as_deref(),
            Some("invalid_exact_evm_payload_signature")
        );
    }

    #[tokio::test]
    async fn test_supported_lists_networks() {
        let supported = facilitator().supported().await.unwrap();
        assert_eq!(supported.kinds.len(), 1);
        assert_eq!(supported.kinds[0].scheme, "exact");
        assert_eq!(supported.kinds[0].network, Network::new("base-sepolia"));
    }
}
