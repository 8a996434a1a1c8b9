//! HTTP 402 payments for axum servers and Rust HTTP clients.
//!
//! This crate implements the x402 "exact" payment flow over EVM stablecoins.
//! It has two halves that share one wire format:
//!
//! 1. **Payment gate** (server side). An axum middleware that answers requests to
//!    priced routes with `402 Payment Required` and the payment requirements,
//!    then verifies and settles a retried request's `X-PAYMENT` header through a
//!    facilitator before the route handler runs.
//! 2. **Payment retry client** (client side). A fetch wrapper that, on a 402,
//!    has a wallet sign a payment for one of the offered requirements and resends
//!    the request once with the payment attached.
//!
//! On-chain work (signature checks, transfers, replay protection) belongs to the
//! facilitator, reached through the [`facilitator::Facilitator`] trait.
//!
//! # Feature Flags
//!
//! - `server` - [`server::PaymentGate`], axum middleware, and the remote facilitator client
//! - `client` - [`client::X402Client`] and its [`reqwest`] transport
//! - `facilitator` - [`facilitator::InMemoryFacilitator`], a chain-less facilitator
//! - `full` - all of the above (default)
//!
//! # Usage
//!
//! ## Server: Gating a Route
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use x402_paywall::server::{PaymentGate, PaywallConfig, RouteConfig, payment_middleware};
//!
//! let config = PaywallConfig::new(recipient)
//!     .route("GET /protected", RouteConfig::new("$0.001", "base-sepolia"));
//! let gate = PaymentGate::from_config(config)?;
//! let app = Router::new()
//!     .route("/protected", get(protected))
//!     .layer(middleware::from_fn_with_state(gate, payment_middleware));
//! ```
//!
//! ## Client: Paying for a Request
//!
//! ```ignore
//! use x402_paywall::client::X402Client;
//!
//! let client = X402Client::new(reqwest::Client::new(), wallet);
//! let response = client.fetch(http::Request::get(url).body(bytes::Bytes::new())?).await?;
//! ```

pub mod chain;
pub mod facilitator;
pub mod proto;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

mod networks;
pub use networks::*;

pub use proto::ExactScheme;

#[cfg(feature = "server")]
pub use server::{PaymentGate, PaywallConfig, RouteConfig, payment_middleware};

#[cfg(feature = "client")]
pub use client::{Signer, X402Client};
