//! Gate configuration and the compiled route table.
//!
//! [`PaywallConfig`] is what a host application hands to
//! [`PaymentGate::new`](super::PaymentGate::new). It is validated once, at
//! construction; every error here is fatal and the gate refuses to start.

use alloy_primitives::Address;
use http::Method;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::chain::{AmountParseError, Eip712Domain, Network, TokenAmount, TokenDeployment};
use crate::facilitator::FacilitatorConfig;
use crate::networks::USDC;
use crate::proto::{ExactScheme, PaymentRequirements};

/// Default validity window handed to clients.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 60;

const DEFAULT_MIME_TYPE: &str = "application/json";

/// Everything the gate needs, supplied by the host application.
///
/// # Example
///
/// ```
/// use x402_paywall::server::{PaywallConfig, RouteConfig};
///
/// let config = PaywallConfig::new("0x209693Bc6afc0C5328bA36FaF03C514EF312287C")
///     .route("GET /protected", RouteConfig::new("$0.001", "base-sepolia"));
/// assert_eq!(config.routes.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaywallConfig {
    /// Recipient address for every route.
    pub pay_to: String,
    /// `"METHOD PATH"` → price and network, in match order.
    #[serde(default)]
    pub routes: RouteMap,
    #[serde(default)]
    pub facilitator: FacilitatorConfig,
    /// Prefix for resource identifiers, e.g. `https://api.example.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_base_url: Option<String>,
}

impl PaywallConfig {
    pub fn new(pay_to: impl Into<String>) -> Self {
        Self {
            pay_to: pay_to.into(),
            routes: RouteMap::default(),
            facilitator: FacilitatorConfig::default(),
            resource_base_url: None,
        }
    }

    /// Appends a protected route. Earlier routes win on overlap.
    pub fn route(mut self, key: impl Into<String>, route: RouteConfig) -> Self {
        self.routes.0.push((key.into(), route));
        self
    }

    pub fn facilitator(mut self, facilitator: FacilitatorConfig) -> Self {
        self.facilitator = facilitator;
        self
    }

    pub fn resource_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.resource_base_url = Some(base_url.into());
        self
    }
}

/// Price and network of one protected route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub price: Price,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timeout_seconds: Option<u64>,
}

impl RouteConfig {
    pub fn new(price: impl Into<Price>, network: impl Into<Network>) -> Self {
        Self {
            price: price.into(),
            network: network.into(),
            description: None,
            mime_type: None,
            max_timeout_seconds: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = Some(seconds);
        self
    }
}

/// A route price: dollars in the network's USDC, or an exact token amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Price {
    /// `"$0.001"`, converted with the network's USDC decimals.
    Money(String),
    /// Raw amount of an explicit token.
    Token { amount: TokenAmount, asset: AssetConfig },
}

impl From<&str> for Price {
    fn from(value: &str) -> Self {
        Price::Money(value.to_string())
    }
}

impl From<String> for Price {
    fn from(value: String) -> Self {
        Price::Money(value)
    }
}

/// Token contract used by a [`Price::Token`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub address: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip712: Option<Eip712Domain>,
}

/// Route keys with their configuration, kept in declaration order.
///
/// Serializes as a JSON object, like `{"GET /protected": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMap(pub Vec<(String, RouteConfig)>);

impl RouteMap {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for RouteMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, route) in &self.0 {
            map.serialize_entry(key, route)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RouteMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RouteMapVisitor;

        impl<'de> Visitor<'de> for RouteMapVisitor {
            type Value = RouteMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of \"METHOD PATH\" to route configuration")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut routes = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, route)) = access.next_entry::<String, RouteConfig>()? {
                    routes.push((key, route));
                }
                Ok(RouteMap(routes))
            }
        }

        deserializer.deserialize_map(RouteMapVisitor)
    }
}

/// Startup configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid recipient address '{0}': expected 0x-prefixed 20-byte hex")]
    InvalidRecipient(String),

    #[error("Invalid route '{route}': {reason}")]
    InvalidRoute { route: String, reason: String },

    #[error("Invalid price for route '{route}': {source}")]
    InvalidPrice {
        route: String,
        #[source]
        source: AmountParseError,
    },

    #[error("Price for route '{route}' must be greater than zero")]
    ZeroPrice { route: String },

    #[error("Invalid asset address '{address}' for route '{route}'")]
    InvalidAsset { route: String, address: String },

    #[error("Route '{route}' prices in dollars but network '{network}' has no known USDC deployment")]
    UnsupportedNetwork { route: String, network: Network },

    #[error("Invalid facilitator URL: {0}")]
    InvalidFacilitatorUrl(String),

    #[error("Facilitator timeout must be greater than zero")]
    ZeroFacilitatorTimeout,
}

fn parse_evm_address(value: &str) -> Option<Address> {
    if !value.starts_with("0x") {
        return None;
    }
    value.parse().ok()
}

/// Validates a recipient address.
pub fn validate_recipient(pay_to: &str) -> Result<(), ConfigError> {
    parse_evm_address(pay_to)
        .map(|_| ())
        .ok_or_else(|| ConfigError::InvalidRecipient(pay_to.to_string()))
}

/// A path pattern where `*` spans any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    parts: Vec<String>,
}

impl PathPattern {
    fn parse(path: &str) -> Self {
        Self {
            parts: normalize_path(path).split('*').map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let (first, rest) = match self.parts.split_first() {
            Some(split) => split,
            None => return false,
        };
        if rest.is_empty() {
            return path == *first;
        }
        let Some(mut remaining) = path.strip_prefix(first.as_str()) else {
            return false;
        };
        let (last, middle) = match rest.split_last() {
            Some(split) => split,
            None => return false,
        };
        for part in middle {
            match remaining.find(part.as_str()) {
                Some(index) => remaining = &remaining[index + part.len()..],
                None => return false,
            }
        }
        remaining.ends_with(last.as_str())
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// One validated route with its pre-built payment requirements.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub key: String,
    method: Option<Method>,
    pattern: PathPattern,
    template: PaymentRequirements,
}

impl CompiledRoute {
    /// Requirements for this route, bound to `resource`.
    pub fn requirements(&self, resource: &str) -> PaymentRequirements {
        PaymentRequirements {
            resource: resource.to_string(),
            ..self.template.clone()
        }
    }

    // HEAD is served by GET handlers, so it is priced like GET.
    fn matches(&self, method: &Method, path: &str) -> bool {
        let method_matches = |m: &Method| m == method || (*m == Method::GET && *method == Method::HEAD);
        self.method.as_ref().is_none_or(method_matches) && self.pattern.matches(path)
    }
}

/// Routes in match order; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Validates and compiles every route of `config`.
    pub fn compile(config: &PaywallConfig) -> Result<Self, ConfigError> {
        validate_recipient(&config.pay_to)?;
        let routes = config
            .routes
            .0
            .iter()
            .map(|(key, route)| compile_route(key, route, &config.pay_to))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { routes })
    }

    pub fn find(&self, method: &Method, path: &str) -> Option<&CompiledRoute> {
        self.routes.iter().find(|route| route.matches(method, path))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn parse_route_key(key: &str) -> Result<(Option<Method>, PathPattern), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidRoute {
        route: key.to_string(),
        reason: reason.to_string(),
    };
    let tokens: Vec<&str> = key.split_whitespace().collect();
    let (method, path) = match tokens.as_slice() {
        [path] => (None, *path),
        [method, path] => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| invalid("unknown HTTP method"))?;
            (Some(method), *path)
        }
        _ => return Err(invalid("expected \"METHOD /path\" or \"/path\"")),
    };
    if !path.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }
    Ok((method, PathPattern::parse(path)))
}

fn resolve_price(key: &str, route: &RouteConfig) -> Result<(TokenAmount, TokenDeployment), ConfigError> {
    let (amount, token) = match &route.price {
        Price::Money(money) => {
            let usdc = USDC::on(&route.network).ok_or_else(|| ConfigError::UnsupportedNetwork {
                route: key.to_string(),
                network: route.network.clone(),
            })?;
            let deployed = usdc.parse(money).map_err(|source| ConfigError::InvalidPrice {
                route: key.to_string(),
                source,
            })?;
            (deployed.amount, deployed.token)
        }
        Price::Token { amount, asset } => {
            if parse_evm_address(&asset.address).is_none() {
                return Err(ConfigError::InvalidAsset {
                    route: key.to_string(),
                    address: asset.address.clone(),
                });
            }
            let token = TokenDeployment {
                network: route.network.clone(),
                address: asset.address.clone(),
                decimals: asset.decimals,
                eip712: asset.eip712.clone(),
            };
            (*amount, token)
        }
    };
    if amount == TokenAmount::default() {
        return Err(ConfigError::ZeroPrice {
            route: key.to_string(),
        });
    }
    Ok((amount, token))
}

fn compile_route(key: &str, route: &RouteConfig, pay_to: &str) -> Result<CompiledRoute, ConfigError> {
    let (method, pattern) = parse_route_key(key)?;
    let (amount, token) = resolve_price(key, route)?;
    let extra = token
        .eip712
        .as_ref()
        .and_then(|domain| serde_json::to_value(domain).ok());
    let template = PaymentRequirements {
        scheme: ExactScheme.to_string(),
        network: route.network.clone(),
        amount,
        resource: String::new(),
        description: route.description.clone().unwrap_or_default(),
        mime_type: route
            .mime_type
            .clone()
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        pay_to: pay_to.to_string(),
        max_timeout_seconds: route
            .max_timeout_seconds
            .unwrap_or(DEFAULT_MAX_TIMEOUT_SECONDS),
        asset: token.address,
        extra,
    };
    Ok(CompiledRoute {
        key: key.to_string(),
        method,
        pattern,
        template,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";

    fn compile(config: PaywallConfig) -> Result<RouteTable, ConfigError> {
        RouteTable::compile(&config)
    }

    #[test]
    fn test_money_price_on_base_sepolia() {
        let table = compile(
            PaywallConfig::new(PAY_TO).route("GET /protected", RouteConfig::new("$0.001", "base-sepolia")),
        )
        .unwrap();
        let route = table.find(&Method::GET, "/protected").unwrap();
        let requirements = route.requirements("/protected");
        assert_eq!(requirements.amount, TokenAmount::from(1_000u64));
        assert_eq!(requirements.network.as_str(), "base-sepolia");
        assert_eq!(requirements.asset, "0x036CbD53842c5426634e7929541eC2318f3dCF7e");
        assert_eq!(requirements.max_timeout_seconds, DEFAULT_MAX_TIMEOUT_SECONDS);
        assert_eq!(requirements.extra.unwrap()["name"], "USDC");
    }

    #[test]
    fn test_method_must_match() {
        let table = compile(
            PaywallConfig::new(PAY_TO).route("get /protected", RouteConfig::new("$0.001", "base-sepolia")),
        )
        .unwrap();
        assert!(table.find(&Method::GET, "/protected").is_some());
        assert!(table.find(&Method::POST, "/protected").is_none());
        assert!(table.find(&Method::GET, "/").is_none());
    }

    #[test]
    fn test_head_is_priced_like_get() {
        let table = compile(
            PaywallConfig::new(PAY_TO)
                .route("GET /protected", RouteConfig::new("$0.001", "base-sepolia"))
                .route("POST /upload", RouteConfig::new("$0.01", "base-sepolia")),
        )
        .unwrap();
        assert!(table.find(&Method::HEAD, "/protected").is_some());
        assert!(table.find(&Method::HEAD, "/upload").is_none());
    }

    #[test]
    fn test_bare_path_matches_any_method() {
        let table = compile(PaywallConfig::new(PAY_TO).route("/paid", RouteConfig::new("1", "base"))).unwrap();
        assert!(table.find(&Method::GET, "/paid").is_some());
        assert!(table.find(&Method::DELETE, "/paid/").is_some());
    }

    #[test]
    fn test_wildcard_patterns() {
        let pattern = PathPattern::parse("/api/*/report");
        assert!(pattern.matches("/api/v1/report"));
        assert!(pattern.matches("/api/v1/v2/report?format=csv"));
        assert!(!pattern.matches("/api/v1/summary"));

        let prefix = PathPattern::parse("/premium/*");
        assert!(prefix.matches("/premium/a"));
        assert!(!prefix.matches("/free/a"));
    }

    #[test]
    fn test_first_route_wins() {
        let table = compile(
            PaywallConfig::new(PAY_TO)
                .route("GET /api/special", RouteConfig::new("$1", "base"))
                .route("GET /api/*", RouteConfig::new("$0.01", "base")),
        )
        .unwrap();
        let route = table.find(&Method::GET, "/api/special").unwrap();
        assert_eq!(route.key, "GET /api/special");
        let route = table.find(&Method::GET, "/api/other").unwrap();
        assert_eq!(route.key, "GET /api/*");
    }

    #[test]
    fn test_invalid_recipient() {
        for pay_to in ["", "209693Bc6afc0C5328bA36FaF03C514EF312287C", "0x1234", "0xzz9693Bc6afc0C5328bA36FaF03C514EF312287C"] {
            assert!(
                matches!(compile(PaywallConfig::new(pay_to)), Err(ConfigError::InvalidRecipient(_))),
                "{pay_to}"
            );
        }
    }

    #[test]
    fn test_invalid_route_keys() {
        for key in ["protected", "GET", "GET /a /b", "G@T /a"] {
            let result = compile(PaywallConfig::new(PAY_TO).route(key, RouteConfig::new("$1", "base")));
            assert!(matches!(result, Err(ConfigError::InvalidRoute { .. })), "{key}");
        }
    }

    #[test]
    fn test_invalid_prices() {
        let result = compile(PaywallConfig::new(PAY_TO).route("/a", RouteConfig::new("cheap", "base")));
        assert!(matches!(result, Err(ConfigError::InvalidPrice { .. })));

        let result = compile(PaywallConfig::new(PAY_TO).route("/a", RouteConfig::new("$0.0000001", "base")));
        assert!(matches!(result, Err(ConfigError::InvalidPrice { .. })));

        let result = compile(PaywallConfig::new(PAY_TO).route("/a", RouteConfig::new("$0", "base")));
        assert!(matches!(result, Err(ConfigError::ZeroPrice { .. })));

        let result = compile(PaywallConfig::new(PAY_TO).route("/a", RouteConfig::new("$1", "solana")));
        assert!(matches!(result, Err(ConfigError::UnsupportedNetwork { .. })));
    }

    #[test]
    fn test_token_price_on_any_network() {
        let price = Price::Token {
            amount: TokenAmount::from(42u64),
            asset: AssetConfig {
                address: "0x5425890298aed601595a70AB815c96711a31Bc65".to_string(),
                decimals: 6,
                eip712: None,
            },
        };
        let table = compile(PaywallConfig::new(PAY_TO).route("/a", RouteConfig::new(price, "my-chain"))).unwrap();
        let requirements = table.find(&Method::GET, "/a").unwrap().requirements("/a");
        assert_eq!(requirements.amount, TokenAmount::from(42u64));
        assert!(requirements.extra.is_none());
    }

    #[test]
    fn test_config_from_json_keeps_route_order() {
        let json = r#"{
            "payTo": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
            "routes": {
                "GET /z": { "price": "$0.001", "network": "base-sepolia" },
                "GET /a": { "price": { "amount": "5", "asset": { "address": "0x036CbD53842c5426634e7929541eC2318f3dCF7e", "decimals": 6 } }, "network": "base-sepolia", "maxTimeoutSeconds": 120 }
            },
            "facilitator": { "url": "http://localhost:4020", "timeoutMs": 500 }
        }"#;
        let config: PaywallConfig = serde_json::from_str(json).unwrap();
        let keys: Vec<&str> = config.routes.0.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["GET /z", "GET /a"]);
        assert_eq!(config.facilitator.timeout_ms, 500);
        assert!(matches!(config.routes.0[1].1.price, Price::Token { .. }));

        let table = compile(config).unwrap();
        assert_eq!(table.len(), 2);
    }
}
