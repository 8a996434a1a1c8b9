//! Core network, token, and amount types.
//!
//! This module provides the fundamental value types shared by the gate
//! and the client:
//!
//! - [`TokenAmount`] - exact integer amount in a token's smallest unit
//! - [`Network`] - settlement network label (`base-sepolia`, `base`, ...)
//! - [`TokenDeployment`] - token contract info, used to convert money prices

pub mod types;
pub use types::*;
