//! Command handling traits and the checkout error taxonomy

use async_trait::async_trait;
use chrono::NaiveDate;
use redb::WriteTransaction;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::checkout::storage::{CheckoutStorage, StorageError};
use shared::checkout::{OrderSnapshot, OrderStatus};

/// Checkout errors
///
/// Every rejection leaves persisted state exactly as before the call;
/// mutations only survive a committed transaction.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    /// Bad input shape, rejected before any mutation
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// The order belongs to a different user than the caller claims
    #[error("order {order_id} does not belong to user {user_id}")]
    UserMismatch { order_id: String, user_id: i64 },

    /// Redemption request exceeds the current balance
    #[error("insufficient points: requested {requested}, balance {balance}")]
    InsufficientPoints { requested: u32, balance: u32 },

    /// Captured amount differs from the order total
    #[error("amount mismatch: expected {expected}, captured {captured}")]
    AmountMismatch { expected: Decimal, captured: Decimal },

    #[error("currency mismatch: expected {expected}, captured {captured}")]
    CurrencyMismatch { expected: String, captured: String },

    /// Operation not legal in the order's current state
    #[error("illegal state transition for order {order_id} in status {status:?}")]
    IllegalStateTransition {
        order_id: String,
        status: OrderStatus,
    },

    /// External payment verification did not produce a usable capture
    #[error("payment verification failed: {0}")]
    VerificationFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Metadata attached to every command
#[derive(Debug, Clone)]
pub struct CommandMetadata {
    /// Unique command id, used for idempotency
    pub command_id: String,
    /// Server timestamp (ms)
    pub timestamp: i64,
    /// Business date for promotion windows
    pub today: NaiveDate,
}

/// Execution context handed to actions.
///
/// Wraps the write transaction and the storage handle, and caches order
/// snapshots an action modified so the manager can persist them before
/// commit. Non-order tables (ledger, inventory, promotions, carts) are
/// written directly through [`CommandContext::storage`] within the same
/// transaction.
pub struct CommandContext<'a> {
    txn: &'a WriteTransaction,
    storage: &'a CheckoutStorage,
    modified: HashMap<String, OrderSnapshot>,
}

impl<'a> CommandContext<'a> {
    pub fn new(txn: &'a WriteTransaction, storage: &'a CheckoutStorage) -> Self {
        Self {
            txn,
            storage,
            modified: HashMap::new(),
        }
    }

    pub fn txn(&self) -> &'a WriteTransaction {
        self.txn
    }

    pub fn storage(&self) -> &'a CheckoutStorage {
        self.storage
    }

    /// Load an order snapshot, preferring a version already modified in
    /// this command
    pub fn load_order(&self, order_id: &str) -> Result<OrderSnapshot, CheckoutError> {
        if let Some(snapshot) = self.modified.get(order_id) {
            return Ok(snapshot.clone());
        }
        self.storage
            .get_order_txn(self.txn, order_id)?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))
    }

    /// Stage a modified snapshot for persistence at commit time
    pub fn save_order(&mut self, snapshot: OrderSnapshot) {
        self.modified.insert(snapshot.order_id.clone(), snapshot);
    }

    /// All snapshots modified by the action
    pub fn modified_orders(&self) -> impl Iterator<Item = &OrderSnapshot> {
        self.modified.values()
    }
}

/// A checkout command handler. One implementation per operation.
#[async_trait]
pub trait CommandHandler {
    type Output;

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Self::Output, CheckoutError>;
}
