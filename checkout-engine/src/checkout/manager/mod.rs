//! Checkout Manager
//!
//! Orchestrates command execution: one write transaction per command,
//! idempotency checks for payment captures, snapshot persistence and
//! commit. Actions never commit; an error anywhere before `commit()`
//! drops the transaction and rolls everything back.

mod error;

pub use error::ManagerError;

use chrono::Utc;
use redb::WriteTransaction;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::checkout::actions::{
    ApproveCancellationAction, CancelOrderAction, SettleOrderAction, SyncDraftAction,
};
use crate::checkout::cart;
use crate::checkout::config::CheckoutConfig;
use crate::checkout::storage::{CheckoutStorage, StorageError};
use crate::checkout::traits::{CheckoutError, CommandContext, CommandHandler, CommandMetadata};
use crate::checkout::verify::{verify_with_timeout, PaymentVerifier};
use shared::checkout::{
    CartLine, DeliveryStatus, DraftRequest, OrderSnapshot, OrderStatus, PaymentCapture,
    RewardAccount, RewardLedgerEntry, StockMovement,
};
use shared::util::now_millis;

/// Draft synchronization result
#[derive(Debug)]
pub struct DraftOutcome {
    /// The synced draft
    pub order: OrderSnapshot,
    /// An explicitly chosen targeted promotion was not eligible; the
    /// draft was priced without it and the cart page should say so
    pub targeted_ineligible: bool,
}

/// Settlement result
#[derive(Debug)]
pub enum SettleOutcome {
    /// The order was settled by this call
    Settled(Box<OrderSnapshot>),
    /// The capture (or order) was already settled; duplicate delivery
    AlreadyPaid { order_id: String },
}

/// Cancellation result
#[derive(Debug)]
pub enum CancelOutcome {
    /// The order was canceled and reversed by this call
    Canceled(Box<OrderSnapshot>),
    /// A Packing-state request was recorded and awaits approval
    ApprovalPending { order_id: String },
}

/// Checkout command orchestrator
pub struct CheckoutManager {
    storage: CheckoutStorage,
    config: CheckoutConfig,
}

impl CheckoutManager {
    pub fn new(storage: CheckoutStorage, config: CheckoutConfig) -> Self {
        Self { storage, config }
    }

    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>, config: CheckoutConfig) -> Result<Self, ManagerError> {
        Ok(Self::new(CheckoutStorage::open(path)?, config))
    }

    /// In-memory engine (tests and benchmarks)
    pub fn open_in_memory(config: CheckoutConfig) -> Result<Self, ManagerError> {
        Ok(Self::new(CheckoutStorage::open_in_memory()?, config))
    }

    pub fn storage(&self) -> &CheckoutStorage {
        &self.storage
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            command_id: Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            today: Utc::now().date_naive(),
        }
    }

    fn persist_modified(
        &self,
        txn: &WriteTransaction,
        ctx: &CommandContext<'_>,
    ) -> Result<(), StorageError> {
        for order in ctx.modified_orders() {
            self.storage.store_order_txn(txn, order)?;
        }
        Ok(())
    }

    // ========== Draft ==========

    /// Sync the session's pending draft from a cart state. Returns `None`
    /// when the cart was empty and the draft was deleted.
    pub async fn sync_draft(
        &self,
        request: DraftRequest,
    ) -> Result<Option<DraftOutcome>, ManagerError> {
        let action = SyncDraftAction {
            request,
            tiers: self.config.tiers.clone(),
        };
        let metadata = self.metadata();
        let txn = self.storage.begin_write()?;
        let draft = {
            let mut ctx = CommandContext::new(&txn, &self.storage);
            let draft = action.execute(&mut ctx, &metadata).await?;
            self.persist_modified(&txn, &ctx)?;
            draft
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(draft)
    }

    // ========== Settlement ==========

    /// Settle an order against a payment capture. Redelivering the same
    /// capture is a no-op that reports success.
    pub async fn settle(&self, capture: PaymentCapture) -> Result<SettleOutcome, ManagerError> {
        // cheap pre-check outside the write lock
        if let Some(order_id) = self
            .storage
            .capture_processed(&capture.external_payment_id)?
        {
            info!(
                order_id = %order_id,
                external_payment_id = %capture.external_payment_id,
                "duplicate capture delivery, no-op"
            );
            return Ok(SettleOutcome::AlreadyPaid { order_id });
        }

        let action = SettleOrderAction {
            capture: capture.clone(),
            expected_currency: self.config.currency.clone(),
        };
        let metadata = self.metadata();
        let txn = self.storage.begin_write()?;
        let outcome = {
            // re-check under the write lock; a concurrent settle may have
            // committed between the pre-check and here
            if let Some(order_id) = self
                .storage
                .capture_processed_txn(&txn, &capture.external_payment_id)?
            {
                return Ok(SettleOutcome::AlreadyPaid { order_id });
            }
            let mut ctx = CommandContext::new(&txn, &self.storage);
            let outcome = action.execute(&mut ctx, &metadata).await?;
            if matches!(outcome, SettleOutcome::Settled(_)) {
                self.storage.mark_capture_processed_txn(
                    &txn,
                    &capture.external_payment_id,
                    &capture.order_id,
                )?;
            }
            self.persist_modified(&txn, &ctx)?;
            outcome
        };
        txn.commit()
            .map_err(|e| ManagerError::SettlementFailed(e.to_string()))?;
        Ok(outcome)
    }

    /// Settle after re-fetching the capture from the payment provider
    /// instead of trusting the webhook payload
    pub async fn settle_verified(
        &self,
        verifier: &dyn PaymentVerifier,
        order_id: &str,
        external_payment_id: &str,
    ) -> Result<SettleOutcome, ManagerError> {
        let capture = verify_with_timeout(
            verifier,
            order_id,
            external_payment_id,
            self.config.verify_timeout,
        )
        .await?;
        if capture.order_id != order_id {
            return Err(CheckoutError::VerificationFailed(format!(
                "provider returned capture for order {}, expected {}",
                capture.order_id, order_id
            ))
            .into());
        }
        self.settle(capture).await
    }

    // ========== Cancellation ==========

    /// Cancel an order. Pending cancels and reverses immediately; Packing
    /// records a request that [`CheckoutManager::approve_cancellation`]
    /// completes.
    pub async fn cancel(
        &self,
        order_id: &str,
        reason: Option<String>,
    ) -> Result<CancelOutcome, ManagerError> {
        let action = CancelOrderAction {
            order_id: order_id.to_string(),
            reason,
        };
        let metadata = self.metadata();
        let txn = self.storage.begin_write()?;
        let outcome = {
            let mut ctx = CommandContext::new(&txn, &self.storage);
            let outcome = action.execute(&mut ctx, &metadata).await?;
            self.persist_modified(&txn, &ctx)?;
            outcome
        };
        txn.commit()
            .map_err(|e| ManagerError::ReversalFailed(e.to_string()))?;
        Ok(outcome)
    }

    /// Approve a recorded Packing-state cancellation request
    pub async fn approve_cancellation(
        &self,
        order_id: &str,
    ) -> Result<OrderSnapshot, ManagerError> {
        let action = ApproveCancellationAction {
            order_id: order_id.to_string(),
        };
        let metadata = self.metadata();
        let txn = self.storage.begin_write()?;
        let order = {
            let mut ctx = CommandContext::new(&txn, &self.storage);
            let order = action.execute(&mut ctx, &metadata).await?;
            self.persist_modified(&txn, &ctx)?;
            order
        };
        txn.commit()
            .map_err(|e| ManagerError::ReversalFailed(e.to_string()))?;
        Ok(order)
    }

    // ========== Fulfilment ==========

    /// Advance a paid order one fulfilment step:
    /// Pending → Packing → Shipped → Delivered
    pub fn advance_fulfillment(
        &self,
        order_id: &str,
        to: OrderStatus,
    ) -> Result<OrderSnapshot, ManagerError> {
        let txn = self.storage.begin_write()?;
        let mut order = self
            .storage
            .get_order_txn(&txn, order_id)?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))?;

        let legal = order.is_paid()
            && matches!(
                (order.status, to),
                (OrderStatus::Pending, OrderStatus::Packing)
                    | (OrderStatus::Packing, OrderStatus::Shipped)
                    | (OrderStatus::Shipped, OrderStatus::Delivered)
            );
        // an order awaiting cancellation approval does not ship
        if !legal || (order.cancel_requested && to == OrderStatus::Shipped) {
            return Err(CheckoutError::IllegalStateTransition {
                order_id: order_id.to_string(),
                status: order.status,
            }
            .into());
        }

        order.status = to;
        order.updated_at = now_millis();
        self.storage.store_order_txn(&txn, &order)?;

        if let Some(mut delivery) = self.storage.get_delivery(order_id)? {
            delivery.status = match to {
                OrderStatus::Shipped => DeliveryStatus::InTransit,
                OrderStatus::Delivered => DeliveryStatus::Delivered,
                _ => delivery.status,
            };
            self.storage.store_delivery_txn(&txn, &delivery)?;
        }

        txn.commit().map_err(StorageError::from)?;
        Ok(order)
    }

    // ========== Cart ==========

    /// Add a line to the user's cart, clamped to stock. Returns the
    /// quantity actually stored.
    pub fn add_to_cart(&self, user_id: i64, line: CartLine) -> Result<i32, ManagerError> {
        let txn = self.storage.begin_write()?;
        let stored = cart::add_line(&self.storage, &txn, user_id, line)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(stored)
    }

    /// Set the quantity of a cart line; zero removes it
    pub fn set_cart_quantity(
        &self,
        user_id: i64,
        target: &CartLine,
        quantity: i32,
    ) -> Result<i32, ManagerError> {
        let txn = self.storage.begin_write()?;
        let stored = cart::set_quantity(&self.storage, &txn, user_id, target, quantity)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(stored)
    }

    pub fn remove_from_cart(&self, user_id: i64, target: &CartLine) -> Result<(), ManagerError> {
        let txn = self.storage.begin_write()?;
        cart::remove_line(&self.storage, &txn, user_id, target)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    pub fn clear_cart(&self, user_id: i64) -> Result<(), ManagerError> {
        let txn = self.storage.begin_write()?;
        self.storage.clear_cart_txn(&txn, user_id)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    pub fn cart(&self, user_id: i64) -> Result<Vec<CartLine>, ManagerError> {
        Ok(self.storage.get_cart(user_id)?)
    }

    // ========== Catalog seeding and queries ==========

    pub fn upsert_promotion(
        &self,
        promotion: &shared::checkout::Promotion,
    ) -> Result<(), ManagerError> {
        let txn = self.storage.begin_write()?;
        self.storage.store_promotion_txn(&txn, promotion)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    pub fn upsert_inventory(
        &self,
        unit: &shared::checkout::InventoryUnit,
    ) -> Result<(), ManagerError> {
        let txn = self.storage.begin_write()?;
        self.storage.store_unit_txn(&txn, unit)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    pub fn order(&self, order_id: &str) -> Result<Option<OrderSnapshot>, ManagerError> {
        Ok(self.storage.get_order(order_id)?)
    }

    pub fn reward_account(&self, user_id: i64) -> Result<Option<RewardAccount>, ManagerError> {
        Ok(self.storage.get_account(user_id)?)
    }

    pub fn reward_ledger(&self, user_id: i64) -> Result<Vec<RewardLedgerEntry>, ManagerError> {
        Ok(self.storage.ledger_for_user(user_id)?)
    }

    pub fn movements_for_order(&self, order_id: &str) -> Result<Vec<StockMovement>, ManagerError> {
        Ok(self.storage.movements_for_order(order_id)?)
    }
}
