//! Known networks and USDC deployments.
//!
//! This module provides convenient methods to get token deployment information
//! for well-known EVM networks, and the lookup used to turn a money price on a
//! network label into an exact token amount.

use crate::chain::{Eip712Domain, Network, TokenDeployment};

/// Trait providing convenient methods for well-known networks.
///
/// This trait can be implemented for any type to provide static methods that create
/// instances for well-known networks.
///
/// # Example
///
/// ```
/// use x402_paywall::KnownNetwork;
/// use x402_paywall::chain::Network;
///
/// let testnet = Network::base_sepolia();
/// assert_eq!(testnet.to_string(), "base-sepolia");
/// ```
pub trait KnownNetwork<A> {
    /// Returns the instance for Base mainnet (`base`).
    fn base() -> A;
    /// Returns the instance for Base Sepolia testnet (`base-sepolia`).
    fn base_sepolia() -> A;
    /// Returns the instance for Avalanche C-Chain (`avalanche`).
    fn avalanche() -> A;
    /// Returns the instance for Avalanche Fuji testnet (`avalanche-fuji`).
    fn avalanche_fuji() -> A;
}

impl KnownNetwork<Network> for Network {
    fn base() -> Network {
        Network::new("base")
    }

    fn base_sepolia() -> Network {
        Network::new("base-sepolia")
    }

    fn avalanche() -> Network {
        Network::new("avalanche")
    }

    fn avalanche_fuji() -> Network {
        Network::new("avalanche-fuji")
    }
}

/// Marker type for USDC deployments.
pub struct USDC;

fn usdc(network: Network, address: &str, eip712_name: &str) -> TokenDeployment {
    TokenDeployment {
        network,
        address: address.to_string(),
        decimals: 6,
        eip712: Some(Eip712Domain {
            name: eip712_name.to_string(),
            version: "2".to_string(),
        }),
    }
}

impl KnownNetwork<TokenDeployment> for USDC {
    fn base() -> TokenDeployment {
        usdc(
            Network::base(),
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "USD Coin",
        )
    }

    fn base_sepolia() -> TokenDeployment {
        usdc(
            Network::base_sepolia(),
            "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "USDC",
        )
    }

    fn avalanche() -> TokenDeployment {
        usdc(
            Network::avalanche(),
            "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E",
            "USD Coin",
        )
    }

    fn avalanche_fuji() -> TokenDeployment {
        usdc(
            Network::avalanche_fuji(),
            "0x5425890298aed601595a70AB815c96711a31Bc65",
            "USD Coin",
        )
    }
}

impl USDC {
    /// Returns the USDC deployment for a network label, if one is known.
    pub fn on(network: &Network) -> Option<TokenDeployment> {
        match network.as_str() {
            "base" => Some(USDC::base()),
            "base-sepolia" => Some(USDC::base_sepolia()),
            "avalanche" => Some(USDC::avalanche()),
            "avalanche-fuji" => Some(USDC::avalanche_fuji()),
            _ => None,
        }
    }
}
