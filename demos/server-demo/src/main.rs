//! Demo server with one paid route.
//!
//! `GET /protected` costs $0.001 in USDC on Base Sepolia. Everything else is free.
//!
//! # Running
//!
//! ```bash
//! RECIPIENT_ADDRESS=0x... cargo run -p x402-paywall-server-demo
//!
//! # Against the local development facilitator:
//! cargo run -p x402-paywall-facilitator &
//! RECIPIENT_ADDRESS=0x... FACILITATOR_URL=http://localhost:4020 cargo run -p x402-paywall-server-demo
//! ```
//!
//! # Configuration
//!
//! - `RECIPIENT_ADDRESS` - Payment recipient, required
//! - `FACILITATOR_URL`   - Facilitator base URL (default: https://x402.org/facilitator)
//! - `PORT`              - Server port (default: 5678)
//! - `HOST`              - Bind address (default: 0.0.0.0)

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router, middleware};
use chrono::{SecondsFormat, Utc};
use std::env;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use x402_paywall::facilitator::{DEFAULT_FACILITATOR_URL, FacilitatorConfig};
use x402_paywall::server::{PaymentGate, PaywallConfig, RouteConfig, payment_middleware};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let recipient = env::var("RECIPIENT_ADDRESS").map_err(|_| "RECIPIENT_ADDRESS must be set")?;
    let facilitator_url = env::var("FACILITATOR_URL").unwrap_or_else(|_| DEFAULT_FACILITATOR_URL.to_string());

    let config = PaywallConfig::new(recipient)
        .route(
            "GET /protected",
            RouteConfig::new("$0.001", "base-sepolia").description("Secret content"),
        )
        .facilitator(FacilitatorConfig::new(facilitator_url));
    let gate = PaymentGate::from_config(config)?;

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/protected", get(protected_handler))
        .layer(middleware::from_fn_with_state(gate, payment_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5678);
    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let bind = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Server listening on {bind}");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn root_handler() -> &'static str {
    "x402 server is running!"
}

async fn protected_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "data": "This is the secret content you paid for!",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "message": "Payment verification successful",
    }))
}
