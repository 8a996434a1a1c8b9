//! Demo client that pays for `/protected` on the demo server.
//!
//! The wallet here is a stand-in: it fills in a real EIP-3009 authorization
//! (payer, recipient, value, validity window, fresh nonce) but signs it with
//! random bytes. The development facilitator accepts that; a real facilitator
//! will not.
//!
//! # Running
//!
//! ```bash
//! cargo run -p x402-paywall-facilitator &
//! RECIPIENT_ADDRESS=0x... FACILITATOR_URL=http://localhost:4020 cargo run -p x402-paywall-server-demo &
//! cargo run -p x402-paywall-client-demo
//! ```
//!
//! # Configuration
//!
//! - `BACKEND_URL`   - Demo server base URL (default: http://localhost:5678)
//! - `PAYER_ADDRESS` - Address placed in the authorization's `from`

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::env;
use x402_paywall::client::{Signer, SignerError, X402Client, X402ClientError};
use x402_paywall::proto::{
    ExactEvmAuthorization, ExactScheme, PaymentPayload, PaymentRequirements, UnixTimestamp, decode_payment_response,
};

const DEFAULT_PAYER: &str = "0x857b06519E91e3A54538791bDbb0E22373e36b66";

/// Backdating of `validAfter`, covering clock skew between client and facilitator.
const CLOCK_SKEW_SECONDS: u64 = 600;

#[derive(Debug, Clone)]
struct DemoSigner {
    payer: String,
}

#[async_trait]
impl Signer for DemoSigner {
    fn can_sign(&self, requirements: &PaymentRequirements) -> bool {
        ExactScheme == requirements.scheme
    }

    async fn sign(&self, requirements: &PaymentRequirements) -> Result<PaymentPayload, SignerError> {
        let mut nonce = [0u8; 32];
        let mut signature = [0u8; 65];
        {
            let mut rng = rand::rng();
            rng.fill(&mut nonce[..]);
            rng.fill(&mut signature[..]);
        }

        let now = UnixTimestamp::now().seconds_since_epoch();
        let authorization = ExactEvmAuthorization {
            from: self.payer.clone(),
            to: requirements.pay_to.clone(),
            value: requirements.amount,
            valid_after: UnixTimestamp(now.saturating_sub(CLOCK_SKEW_SECONDS)),
            valid_before: UnixTimestamp(now + requirements.max_timeout_seconds),
            nonce: format!("0x{}", hex::encode(nonce)),
        };

        tracing::info!(
            amount = %requirements.amount,
            network = %requirements.network,
            pay_to = %requirements.pay_to,
            "Signing payment"
        );
        Ok(PaymentPayload::exact(
            requirements,
            format!("0x{}", hex::encode(signature)),
            authorization,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let backend = env::var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:5678".to_string());
    let backend = backend.trim_end_matches('/');
    let signer = DemoSigner {
        payer: env::var("PAYER_ADDRESS").unwrap_or_else(|_| DEFAULT_PAYER.to_string()),
    };
    let client = X402Client::new(reqwest::Client::new(), signer);

    // Free endpoint: goes through untouched.
    let request = http::Request::get(format!("{backend}/")).body(Bytes::new())?;
    let response = client.fetch(request).await?;
    tracing::info!(status = %response.status(), "GET /");
    println!("{}", String::from_utf8_lossy(response.body()));

    // Paid endpoint: 402, sign, retry.
    let request = http::Request::get(format!("{backend}/protected")).body(Bytes::new())?;
    match client.fetch(request).await {
        Ok(response) => {
            tracing::info!(status = %response.status(), "GET /protected");
            if let Some(receipt) = decode_payment_response(response.headers()) {
                tracing::info!(
                    transaction = %receipt.transaction,
                    network = %receipt.network,
                    payer = ?receipt.payer,
                    "Payment settled"
                );
            }
            println!("{}", String::from_utf8_lossy(response.body()));
        }
        Err(X402ClientError::PaymentRejected { reason, .. }) => {
            tracing::error!(reason = %reason, "Payment rejected by server");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
