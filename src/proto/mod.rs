//! x402 wire format.
//!
//! These types are what crosses the network between the three parties:
//!
//! - the gate sends [`PaymentRequired`] (status 402) listing [`PaymentRequirements`];
//! - the client retries with a [`PaymentPayload`] in the [`PAYMENT_HEADER`] header;
//! - the gate asks the facilitator to check it with a [`VerifyRequest`] and to
//!   execute it with a [`SettleRequest`], and forwards the [`SettleResponse`]
//!   to the client in the [`PAYMENT_RESPONSE_HEADER`] header.
//!
//! All JSON uses camelCase field names.

pub mod codec;
pub use codec::*;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

use crate::chain::{Network, TokenAmount};

/// Protocol version spoken by this crate.
pub const X402_VERSION: u8 = 1;

/// Request header carrying the base64-encoded [`PaymentPayload`] (client → server).
pub const PAYMENT_HEADER: &str = "x-payment";

/// Response header carrying the base64-encoded [`SettleResponse`] (server → client).
pub const PAYMENT_RESPONSE_HEADER: &str = "x-payment-response";

/// String literal for the "exact" scheme name.
#[derive(Debug, Clone, Copy)]
pub struct ExactScheme;

impl AsRef<str> for ExactScheme {
    fn as_ref(&self) -> &str {
        "exact"
    }
}

impl Display for ExactScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "exact")
    }
}

impl PartialEq<str> for ExactScheme {
    fn eq(&self, other: &str) -> bool {
        self.as_ref() == other
    }
}

impl PartialEq<String> for ExactScheme {
    fn eq(&self, other: &String) -> bool {
        self.as_ref() == other
    }
}

/// What a protected resource costs and how to pay for it.
///
/// Built fresh by the gate for every denied request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme, e.g. `exact`.
    pub scheme: String,
    /// Settlement network, e.g. `base-sepolia`.
    pub network: Network,
    /// Price in the asset's smallest unit.
    #[serde(alias = "maxAmountRequired")]
    pub amount: TokenAmount,
    /// Identifier of the guarded resource; binds a payload to one route.
    pub resource: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
    /// Recipient address.
    pub pay_to: String,
    /// Validity window the client's authorization must respect.
    pub max_timeout_seconds: u64,
    /// Token contract address.
    pub asset: String,
    /// Scheme-specific data, e.g. the token's EIP-712 domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// A Unix timestamp in seconds, carried as a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self(secs)
    }

    pub fn seconds_since_epoch(&self) -> u64 {
        self.0
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>()
            .map(UnixTimestamp)
            .map_err(|_| serde::de::Error::custom(format!("invalid timestamp '{s}'")))
    }
}

/// ERC-3009 `transferWithAuthorization` parameters signed by the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmAuthorization {
    /// Payer address.
    pub from: String,
    /// Recipient address; must equal the requirement's `payTo`.
    pub to: String,
    /// Authorized amount in the asset's smallest unit.
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    /// 32-byte hex nonce; single-use at the facilitator.
    pub nonce: String,
}

/// Scheme-specific part of an `exact` payment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    /// Hex-encoded signature over the authorization.
    pub signature: String,
    pub authorization: ExactEvmAuthorization,
}

/// A signed, single-use payment authorization attached to a retried request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u8,
    pub scheme: String,
    pub network: Network,
    /// Resource the payment was minted for. Gates reject payloads without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub payload: ExactEvmPayload,
}

impl PaymentPayload {
    /// Builds an `exact` payload bound to `requirements`.
    ///
    /// `scheme`, `network`, and `resource` are copied from the requirement so
    /// a signer cannot produce a payload that disagrees with what it was
    /// asked to pay for.
    pub fn exact(
        requirements: &PaymentRequirements,
        signature: impl Into<String>,
        authorization: ExactEvmAuthorization,
    ) -> Self {
        Self {
            x402_version: X402_VERSION,
            scheme: requirements.scheme.clone(),
            network: requirements.network.clone(),
            resource: Some(requirements.resource.clone()),
            payload: ExactEvmPayload {
                signature: signature.into(),
                authorization,
            },
        }
    }
}

/// Body of a 402 response: the challenge, or a rejected payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: u8,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub accepts: Vec<PaymentRequirements>,
}

/// Body of non-402 error responses produced by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub x402_version: u8,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            x402_version: X402_VERSION,
            error: error.into(),
        }
    }
}

/// Request body for the facilitator's `/verify` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub x402_version: u8,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

impl VerifyRequest {
    pub fn new(payload: PaymentPayload, requirements: PaymentRequirements) -> Self {
        Self {
            x402_version: X402_VERSION,
            payment_payload: payload,
            payment_requirements: requirements,
        }
    }
}

/// Settle requests have the same structure as verify requests.
pub type SettleRequest = VerifyRequest;

/// Facilitator answer to `/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl VerifyResponse {
    pub fn valid(payer: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            payer: Some(payer.into()),
        }
    }

    pub fn invalid(reason: impl Into<String>, payer: Option<String>) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason.into()),
            payer,
        }
    }
}

/// Facilitator answer to `/settle`; doubles as the settlement receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub transaction: String,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl SettleResponse {
    pub fn settled(transaction: impl Into<String>, network: Network, payer: impl Into<String>) -> Self {
        Self {
            success: true,
            error_reason: None,
            transaction: transaction.into(),
            network,
            payer: Some(payer.into()),
        }
    }

    pub fn failed(reason: impl Into<String>, network: Network, payer: Option<String>) -> Self {
        Self {
            success: false,
            error_reason: Some(reason.into()),
            transaction: String::new(),
            network,
            payer,
        }
    }
}

/// One scheme/network pair a facilitator can handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: u8,
    pub scheme: String,
    pub network: Network,
}

/// Facilitator answer to `/supported`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: ExactScheme.to_string(),
            network: Network::new("base-sepolia"),
            amount: TokenAmount::from(1_000u64),
            resource: "/protected".to_string(),
            description: String::new(),
            mime_type: "application/json".to_string(),
            pay_to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".to_string(),
            max_timeout_seconds: 60,
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            extra: None,
        }
    }

    #[test]
    fn test_exact_scheme_display() {
        assert_eq!(ExactScheme.to_string(), "exact");
        assert!(ExactScheme == *"exact");
    }

    #[test]
    fn test_requirements_wire_shape() {
        let json = serde_json::to_value(requirements()).unwrap();
        assert_eq!(json["amount"], "1000");
        assert_eq!(json["payTo"], "0x209693Bc6afc0C5328bA36FaF03C514EF312287C");
        assert_eq!(json["maxTimeoutSeconds"], 60);
        assert_eq!(json["mimeType"], "application/json");
        assert!(json.get("extra").is_none());
    }

    #[test]
    fn test_requirements_accept_max_amount_required_alias() {
        let json = r#"{
            "scheme": "exact",
            "network": "base-sepolia",
            "maxAmountRequired": "1000",
            "resource": "http://localhost:5678/protected",
            "payTo": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            "maxTimeoutSeconds": 60,
            "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "extra": { "name": "USDC", "version": "2" }
        }"#;
        let parsed: PaymentRequirements = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.amount, TokenAmount::from(1_000u64));
        assert_eq!(parsed.description, "");
        assert!(parsed.extra.is_some());
    }

    #[test]
    fn test_payload_is_bound_to_requirements() {
        let req = requirements();
        let payload = PaymentPayload::exact(
            &req,
            "0xdead",
            ExactEvmAuthorization {
                from: "0x857b06519E91e3A54538791bDbb0E22373e36b66".to_string(),
                to: req.pay_to.clone(),
                value: req.amount,
                valid_after: UnixTimestamp(0),
                valid_before: UnixTimestamp(1_745_323_985),
                nonce: format!("0x{}", "ab".repeat(32)),
            },
        );
        assert_eq!(payload.scheme, req.scheme);
        assert_eq!(payload.network, req.network);
        assert_eq!(payload.resource.as_deref(), Some("/protected"));

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["payload"]["authorization"]["validBefore"], "1745323985");
        assert_eq!(json["payload"]["authorization"]["value"], "1000");
    }

    #[test]
    fn test_settle_response_defaults() {
        let json = r#"{ "success": false, "errorReason": "insufficient_funds", "network": "base" }"#;
        let parsed: SettleResponse = serde_json::from_str(json).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.transaction, "");
        assert_eq!(parsed.error_reason.as_deref(), Some("insufficient_funds"));
    }

    #[test]
    fn test_verify_response_wire_shape() {
        let json = serde_json::to_value(VerifyResponse::invalid("insufficient amount", None)).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["invalidReason"], "insufficient amount");
        assert!(json.get("payer").is_none());
    }
}
