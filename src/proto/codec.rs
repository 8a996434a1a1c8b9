//! Header codec: base64-wrapped JSON.
//!
//! Both x402 headers carry a JSON document encoded with the standard base64
//! alphabet (padded). Decoding is strict: anything that is not valid base64
//! of valid JSON of the expected type is an error, never "no payment".

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{PAYMENT_RESPONSE_HEADER, PaymentPayload, SettleResponse};

/// Error returned when encoding or decoding an x402 header.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The header value contains non-visible-ASCII bytes.
    #[error("Header is not valid ASCII")]
    NotAscii,
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
}

/// Encodes a value as base64 JSON.
pub fn encode_base64_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let json = serde_json::to_vec(value)?;
    Ok(STANDARD.encode(json))
}

/// Decodes base64 JSON into a value.
pub fn decode_base64_json<T: DeserializeOwned>(encoded: &str) -> Result<T, CodecError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

impl PaymentPayload {
    /// Encodes this payload as an `X-PAYMENT` header value.
    pub fn to_header_value(&self) -> Result<HeaderValue, CodecError> {
        Ok(HeaderValue::from_str(&encode_base64_json(self)?)?)
    }

    /// Decodes an `X-PAYMENT` header value.
    pub fn from_header_value(value: &HeaderValue) -> Result<Self, CodecError> {
        let s = value.to_str().map_err(|_| CodecError::NotAscii)?;
        decode_base64_json(s)
    }
}

impl SettleResponse {
    /// Encodes this receipt as an `X-PAYMENT-RESPONSE` header value.
    pub fn to_header_value(&self) -> Result<HeaderValue, CodecError> {
        Ok(HeaderValue::from_str(&encode_base64_json(self)?)?)
    }
}

/// Extracts the settlement receipt a gate attached to a successful response.
///
/// Returns `None` if the header is absent or cannot be decoded.
pub fn decode_payment_response(headers: &HeaderMap) -> Option<SettleResponse> {
    let value = headers.get(PAYMENT_RESPONSE_HEADER)?.to_str().ok()?;
    decode_base64_json(value).ok()
}
