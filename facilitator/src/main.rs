//! Development x402 facilitator.
//!
//! Serves the facilitator HTTP protocol over an [`InMemoryFacilitator`]: payloads
//! are checked for shape, amount, recipient, validity window, and nonce reuse,
//! and "settled" into an in-process ledger. No chain is involved, so the
//! returned transaction hashes are synthetic. Point a gate's facilitator URL
//! here to exercise the full payment flow locally.
//!
//! # Endpoints
//!
//! - `POST /verify`    - Verify a payment payload
//! - `POST /settle`    - Settle a payment into the ledger
//! - `GET  /supported` - List supported payment kinds
//! - `GET  /health`    - Health check
//! - `GET  /metrics`   - Prometheus-format counters
//!
//! # Configuration
//!
//! Environment variables (a `.env` file is read if present):
//!
//! - `PORT`                 - Server port (default: 4020)
//! - `HOST`                 - Bind address (default: 0.0.0.0)
//! - `BIND_ADDR`            - Full `host:port`, overrides the two above
//! - `FACILITATOR_NETWORKS` - Comma-separated networks (default: base-sepolia)
//! - `LOG_LEVEL`            - Log filter when `RUST_LOG` is unset (default: info)

use axum::error_handling::HandleErrorLayer;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tower::ServiceBuilder;
use tower::buffer::BufferLayer;
use tower::limit::RateLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use x402_paywall::chain::Network;
use x402_paywall::facilitator::{Facilitator, FacilitatorError, InMemoryFacilitator};
use x402_paywall::proto::{SettleRequest, VerifyRequest};

#[derive(Default)]
struct Counters {
    verify_requests: AtomicU64,
    verify_rejected: AtomicU64,
    settle_requests: AtomicU64,
    settle_failed: AtomicU64,
}

struct AppState {
    facilitator: InMemoryFacilitator,
    counters: Counters,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    let networks: Vec<Network> = env::var("FACILITATOR_NETWORKS")
        .unwrap_or_else(|_| "base-sepolia".to_string())
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(Network::from)
        .collect();
    if networks.is_empty() {
        return Err("FACILITATOR_NETWORKS must name at least one network".into());
    }

    tracing::info!(
        networks = ?networks.iter().map(Network::as_str).collect::<Vec<_>>(),
        "Development facilitator starting"
    );

    let state = Arc::new(AppState {
        facilitator: InMemoryFacilitator::new(networks),
        counters: Counters::default(),
    });

    // 100 requests per minute across /verify and /settle. The buffer makes the
    // non-Clone RateLimit service usable as an axum route.
    let rate_limited_routes = Router::new()
        .route("/verify", post(verify_handler))
        .route("/settle", post(settle_handler))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: tower::BoxError| async move {
                    tracing::warn!(error = %err, "Rate limit or buffer error");
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        Json(serde_json::json!({ "error": "rate_limited" })),
                    )
                }))
                .layer(BufferLayer::new(256))
                .layer(RateLimitLayer::new(100, Duration::from_secs(60))),
        );

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/supported", get(supported_handler))
        .route("/metrics", get(metrics_handler))
        .merge(rate_limited_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let bind_address = env::var("BIND_ADDR").unwrap_or_else(|_| {
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(4020);
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        format!("{host}:{port}")
    });
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Listening on {bind_address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

fn json_or_error<T: Serialize>(result: Result<T, FacilitatorError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Facilitator error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn invalid_request(e: serde_json::Error) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "invalid_request",
            "message": e.to_string(),
        })),
    )
        .into_response()
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "x402-paywall-facilitator",
        "version": env!("CARGO_PKG_VERSION"),
        "scheme": "exact",
        "mode": "in-memory",
    }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "settled": state.facilitator.settled_count().await,
    }))
}

async fn supported_handler(State(state): State<Arc<AppState>>) -> Response {
    json_or_error(state.facilitator.supported().await)
}

async fn verify_handler(State(state): State<Arc<AppState>>, Json(body): Json<serde_json::Value>) -> Response {
    state.counters.verify_requests.fetch_add(1, Ordering::Relaxed);
    let request = match serde_json::from_value::<VerifyRequest>(body) {
        Ok(request) => request,
        Err(e) => return invalid_request(e),
    };
    let result = state.facilitator.verify(&request).await;
    if matches!(&result, Ok(verdict) if !verdict.is_valid) {
        state.counters.verify_rejected.fetch_add(1, Ordering::Relaxed);
    }
    json_or_error(result)
}

async fn settle_handler(State(state): State<Arc<AppState>>, Json(body): Json<serde_json::Value>) -> Response {
    state.counters.settle_requests.fetch_add(1, Ordering::Relaxed);
    let request = match serde_json::from_value::<SettleRequest>(body) {
        Ok(request) => request,
        Err(e) => return invalid_request(e),
    };
    let result = state.facilitator.settle(&request).await;
    if matches!(&result, Ok(receipt) if !receipt.success) {
        state.counters.settle_failed.fetch_add(1, Ordering::Relaxed);
    }
    json_or_error(result)
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counters = &state.counters;
    let verify_total = counters.verify_requests.load(Ordering::Relaxed);
    let verify_rejected = counters.verify_rejected.load(Ordering::Relaxed);
    let settle_total = counters.settle_requests.load(Ordering::Relaxed);
    let settle_failed = counters.settle_failed.load(Ordering::Relaxed);

    let body = format!(
        "# HELP verify_requests_total Total number of verify requests received.\n\
         # TYPE verify_requests_total counter\n\
         verify_requests_total {verify_total}\n\
         # HELP verify_rejected_total Verify requests answered with isValid=false.\n\
         # TYPE verify_rejected_total counter\n\
         verify_rejected_total {verify_rejected}\n\
         # HELP settle_requests_total Total number of settle requests received.\n\
         # TYPE settle_requests_total counter\n\
         settle_requests_total {settle_total}\n\
         # HELP settle_failed_total Settle requests answered with success=false.\n\
         # TYPE settle_failed_total counter\n\
         settle_failed_total {settle_failed}\n"
    );

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
