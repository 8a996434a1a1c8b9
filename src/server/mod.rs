//! Server side: the payment gate and its axum middleware.
//!
//! Requires the `server` feature.

pub mod config;
pub mod gate;
pub mod middleware;

pub use config::*;
pub use gate::*;
pub use middleware::*;
