//! External payment verification
//!
//! Settlement can optionally re-fetch the capture from the payment
//! provider instead of trusting the webhook payload. The provider client
//! lives behind [`PaymentVerifier`]; the engine only bounds it with a
//! timeout and maps failures into [`CheckoutError::VerificationFailed`].

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::checkout::traits::CheckoutError;
use shared::checkout::PaymentCapture;

/// A client for the external payment provider
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    /// Fetch the authoritative capture for a payment id
    async fn fetch_capture(
        &self,
        order_id: &str,
        external_payment_id: &str,
    ) -> Result<PaymentCapture, CheckoutError>;
}

/// Fetch a capture with a timeout. Timeouts and verifier failures both
/// surface as `VerificationFailed`; the caller decides whether to retry.
pub async fn verify_with_timeout(
    verifier: &dyn PaymentVerifier,
    order_id: &str,
    external_payment_id: &str,
    timeout: Duration,
) -> Result<PaymentCapture, CheckoutError> {
    match tokio::time::timeout(timeout, verifier.fetch_capture(order_id, external_payment_id))
        .await
    {
        Ok(result) => result,
        Err(_) => {
            warn!(order_id, external_payment_id, ?timeout, "payment verification timed out");
            Err(CheckoutError::VerificationFailed(format!(
                "verification timed out after {timeout:?}"
            )))
        }
    }
}
