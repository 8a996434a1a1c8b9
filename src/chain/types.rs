//! Wire format types for EVM networks, tokens, and amounts.
//!
//! This module provides types that handle serialization and deserialization
//! of network identifiers and token amounts in the x402 protocol wire format.
//! Amounts are always carried as exact integers in the token's smallest unit;
//! human-readable prices are converted with decimal arithmetic, never floats.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

// ============================================================================
// TokenAmount
// ============================================================================

/// An exact token amount in the token's smallest unit (e.g. micro-USDC).
///
/// Serializes as a base-10 string so it round-trips through JSON without
/// precision loss.
///
/// # Example
///
/// ```
/// use x402_paywall::chain::TokenAmount;
///
/// let amount: TokenAmount = "1000".parse().unwrap();
/// assert_eq!(amount.to_string(), "1000");
/// assert!("0.5".parse::<TokenAmount>().is_err());
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    /// Returns the inner integer value.
    pub fn value(&self) -> U256 {
        self.0
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl FromStr for TokenAmount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::InvalidFormat(s.to_string()));
        }
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|_| AmountParseError::Overflow)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error returned when parsing a token amount or a money price.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    /// The input string is not a valid number.
    #[error("Invalid amount format: {0}")]
    InvalidFormat(String),
    /// Too many decimal places for the token.
    #[error("Too many decimal places: got {got}, max {max}")]
    TooManyDecimals { got: u32, max: u8 },
    /// The resulting amount does not fit in 256 bits.
    #[error("Amount overflow")]
    Overflow,
}

// ============================================================================
// Network
// ============================================================================

/// A settlement network identifier such as `base-sepolia` or `base`.
///
/// The gate only ever compares and forwards this label; routing between
/// networks is the facilitator's concern.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Network(String);

impl Network {
    /// Creates a network identifier from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the inner network label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Network {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Network {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// TokenDeployment
// ============================================================================

/// EIP-712 domain parameters of a token, echoed to clients in `extra`
/// so they can build the typed-data signature.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Eip712Domain {
    pub name: String,
    pub version: String,
}

/// Information about a token contract deployed on a network.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TokenDeployment {
    /// The network this token lives on.
    pub network: Network,
    /// The token contract address (`0x`-prefixed hex).
    pub address: String,
    /// Number of decimal places (6 for USDC).
    pub decimals: u8,
    /// EIP-712 domain, when the token supports `transferWithAuthorization`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip712: Option<Eip712Domain>,
}

/// A token amount paired with its deployment information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedTokenAmount {
    /// The amount in the token's smallest unit.
    pub amount: TokenAmount,
    /// The token deployment this amount refers to.
    pub token: TokenDeployment,
}

impl TokenDeployment {
    /// Creates a token amount from a raw value already in the smallest unit.
    pub fn amount(&self, v: impl Into<TokenAmount>) -> DeployedTokenAmount {
        DeployedTokenAmount {
            amount: v.into(),
            token: self.clone(),
        }
    }

    /// Parses a human-readable money string into token units.
    ///
    /// Accepts `"$0.001"`, `"0.001"`, `"10"`, and thousands separators
    /// like `"$1,000.50"`. The value is scaled by the token's decimals.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a plain non-negative decimal
    /// or has more fractional digits than the token supports.
    pub fn parse(&self, v: &str) -> Result<DeployedTokenAmount, AmountParseError> {
        let trimmed = v.trim();
        let digits: String = trimmed
            .strip_prefix('$')
            .unwrap_or(trimmed)
            .chars()
            .filter(|c| *c != ',')
            .collect();

        let (whole, frac) = match digits.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (digits.as_str(), ""),
        };
        let well_formed = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !well_formed(whole) || !well_formed(frac) {
            return Err(AmountParseError::InvalidFormat(v.to_string()));
        }

        let frac_len = frac.len() as u32;
        if frac_len > self.decimals as u32 {
            return Err(AmountParseError::TooManyDecimals {
                got: frac_len,
                max: self.decimals,
            });
        }

        let parse_part = |s: &str| -> Result<U256, AmountParseError> {
            if s.is_empty() {
                Ok(U256::ZERO)
            } else {
                U256::from_str_radix(s, 10).map_err(|_| AmountParseError::Overflow)
            }
        };
        let whole_val = parse_part(whole)?;
        let frac_val = parse_part(frac)?;

        let scale = U256::from(10u64).pow(U256::from(self.decimals));
        let frac_scale = U256::from(10u64).pow(U256::from(self.decimals as u32 - frac_len));

        let total = whole_val
            .checked_mul(scale)
            .and_then(|w| w.checked_add(frac_val.checked_mul(frac_scale)?))
            .ok_or(AmountParseError::Overflow)?;

        Ok(DeployedTokenAmount {
            amount: TokenAmount(total),
            token: self.clone(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> TokenDeployment {
        TokenDeployment {
            network: Network::new("base-sepolia"),
            address: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            decimals: 6,
            eip712: None,
        }
    }

    #[test]
    fn test_token_amount_serde_is_decimal_string() {
        let amount = TokenAmount::from(1_000u64);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"1000\"");
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_token_amount_rejects_non_integers() {
        assert!("".parse::<TokenAmount>().is_err());
        assert!("1.5".parse::<TokenAmount>().is_err());
        assert!("-1".parse::<TokenAmount>().is_err());
        assert!("0x10".parse::<TokenAmount>().is_err());
        assert!(serde_json::from_str::<TokenAmount>("1000").is_err());
    }

    #[test]
    fn test_token_amount_large_values_are_exact() {
        let big = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        let amount: TokenAmount = big.parse().unwrap();
        assert_eq!(amount.to_string(), big);
        let overflow = format!("{big}0");
        assert_eq!(overflow.parse::<TokenAmount>(), Err(AmountParseError::Overflow));
    }

    #[test]
    fn test_parse_money_with_dollar_sign() {
        let amount = usdc().parse("$0.001").unwrap();
        assert_eq!(amount.amount, TokenAmount::from(1_000u64));
    }

    #[test]
    fn test_parse_whole() {
        let amount = usdc().parse("100").unwrap();
        assert_eq!(amount.amount, TokenAmount::from(100_000_000u64));
    }

    #[test]
    fn test_parse_with_separators_and_decimals() {
        let amount = usdc().parse("$1,000.50").unwrap();
        assert_eq!(amount.amount, TokenAmount::from(1_000_500_000u64));
    }

    #[test]
    fn test_parse_smallest_unit() {
        let amount = usdc().parse("0.000001").unwrap();
        assert_eq!(amount.amount, TokenAmount::from(1u64));
    }

    #[test]
    fn test_parse_leading_dot() {
        let amount = usdc().parse(".5").unwrap();
        assert_eq!(amount.amount, TokenAmount::from(500_000u64));
    }

    #[test]
    fn test_parse_too_many_decimals() {
        let result = usdc().parse("0.0000001");
        assert_eq!(
            result,
            Err(AmountParseError::TooManyDecimals { got: 7, max: 6 })
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(usdc().parse("abc").is_err());
        assert!(usdc().parse("-1").is_err());
        assert!(usdc().parse("1.2.3").is_err());
        assert!(usdc().parse("$").is_err());
        assert!(usdc().parse("1e-3").is_err());
    }
}
