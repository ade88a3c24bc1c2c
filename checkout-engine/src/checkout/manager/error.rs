//! Manager errors

use crate::checkout::storage::StorageError;
use crate::checkout::traits::CheckoutError;

/// Errors surfaced by [`CheckoutManager`](super::CheckoutManager)
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Business-rule rejection; the transaction was rolled back
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Settlement side effects were computed but the commit failed;
    /// nothing was published
    #[error("settlement failed: {0}")]
    SettlementFailed(String),

    /// Reversal side effects were computed but the commit failed;
    /// nothing was published
    #[error("reversal failed: {0}")]
    ReversalFailed(String),
}
