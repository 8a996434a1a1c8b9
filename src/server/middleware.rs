//! Axum integration.
//!
//! ```no_run
//! use axum::{Router, middleware, routing::get};
//! use x402_paywall::server::{PaymentGate, PaywallConfig, RouteConfig, payment_middleware};
//!
//! # fn build() -> Result<Router, x402_paywall::server::ConfigError> {
//! let config = PaywallConfig::new("0x209693Bc6afc0C5328bA36FaF03C514EF312287C")
//!     .route("GET /protected", RouteConfig::new("$0.001", "base-sepolia"));
//! let gate = PaymentGate::from_config(config)?;
//! let app = Router::new()
//!     .route("/protected", get(|| async { "paid content" }))
//!     .layer(middleware::from_fn_with_state(gate, payment_middleware));
//! # Ok(app)
//! # }
//! ```

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::HeaderValue;
use http::header::ACCESS_CONTROL_EXPOSE_HEADERS;

use crate::proto::{PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER, SettleResponse};
use crate::server::gate::{GateOutcome, PaymentGate};

/// Runs every request through the [`PaymentGate`].
///
/// Use with [`axum::middleware::from_fn_with_state`].
pub async fn payment_middleware(State(gate): State<PaymentGate>, request: Request, next: Next) -> Response {
    let payment = request.headers().get(PAYMENT_HEADER).cloned();
    let outcome = gate
        .check(request.method(), request.uri().path(), payment.as_ref())
        .await;
    match outcome {
        Ok(GateOutcome::Pass) => next.run(request).await,
        Ok(GateOutcome::Paid(receipt)) => {
            let mut response = next.run(request).await;
            attach_receipt(&mut response, &receipt);
            response
        }
        Err(e) => e.into_response(),
    }
}

fn attach_receipt(response: &mut Response, receipt: &SettleResponse) {
    match receipt.to_header_value() {
        Ok(value) => {
            let headers = response.headers_mut();
            headers.insert(PAYMENT_RESPONSE_HEADER, value);
            headers.append(
                ACCESS_CONTROL_EXPOSE_HEADERS,
                HeaderValue::from_static(PAYMENT_RESPONSE_HEADER),
            );
        }
        Err(e) => tracing::warn!(error = %e, "Could not encode payment receipt"),
    }
}
