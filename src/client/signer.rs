use async_trait::async_trait;
use std::sync::Arc;

use crate::proto::{PaymentPayload, PaymentRequirements};

/// Produces signed payment payloads. The wallet lives behind this trait.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Whether this signer can pay the given requirement at all.
    ///
    /// Used to pick among the options a 402 response offers.
    fn can_sign(&self, requirements: &PaymentRequirements) -> bool;

    /// Signs a payload for `requirements`.
    async fn sign(&self, requirements: &PaymentRequirements) -> Result<PaymentPayload, SignerError>;
}

#[async_trait]
impl<T> Signer for Arc<T>
where
    T: Signer + ?Sized,
{
    fn can_sign(&self, requirements: &PaymentRequirements) -> bool {
        self.as_ref().can_sign(requirements)
    }

    async fn sign(&self, requirements: &PaymentRequirements) -> Result<PaymentPayload, SignerError> {
        self.as_ref().sign(requirements).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// The requirement names a scheme, network, or asset the wallet cannot use.
    #[error("Unsupported payment requirement: {0}")]
    Unsupported(String),

    /// The user or wallet declined to sign.
    #[error("Signing declined: {0}")]
    Declined(String),

    #[error("Signing failed: {0}")]
    Failed(String),
}
