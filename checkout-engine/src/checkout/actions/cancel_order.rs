//! Cancellation and reversal
//!
//! A Pending order cancels immediately; a Packing order only records the
//! request and waits for approval; Shipped and beyond cannot cancel. The
//! reversal restores exactly what settlement took: stock comes back via
//! the recorded Sale movements, points via compensating ledger entries,
//! promotion counters step back down.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::checkout::ledger;
use crate::checkout::manager::CancelOutcome;
use crate::checkout::traits::{CheckoutError, CommandContext, CommandHandler, CommandMetadata};
use shared::checkout::{
    LedgerEntryType, OrderSnapshot, OrderStatus, StockMovement, StockReference,
};

/// Request cancellation of an order
pub struct CancelOrderAction {
    pub order_id: String,
    pub reason: Option<String>,
}

/// Approve a recorded Packing-state cancellation request
pub struct ApproveCancellationAction {
    pub order_id: String,
}

/// Return the stock that settlement's Sale movements took out. Restores
/// from the movement log, not the order lines, so a clamped deduction is
/// returned exactly as it happened.
fn restore_stock(
    ctx: &CommandContext<'_>,
    order_id: &str,
    now: i64,
) -> Result<(), CheckoutError> {
    let movements = ctx.storage().movements_for_order_txn(ctx.txn(), order_id)?;
    for movement in movements {
        if movement.reference != StockReference::Sale {
            continue;
        }
        let returned = (-movement.qty_change).max(0) as u32;
        if returned == 0 {
            continue;
        }
        let Some(mut unit) = ctx.storage().get_unit_txn(
            ctx.txn(),
            movement.product_id,
            &movement.color_name,
            &movement.size,
        )?
        else {
            warn!(
                order_id,
                product_id = movement.product_id,
                color = %movement.color_name,
                size = %movement.size,
                "inventory unit gone, stock not returned"
            );
            continue;
        };

        let old_stock = unit.stock;
        unit.stock += returned;
        ctx.storage().store_unit_txn(ctx.txn(), &unit)?;
        ctx.storage().append_movement_txn(
            ctx.txn(),
            &StockMovement {
                product_id: unit.product_id,
                color_name: unit.color_name.clone(),
                size: unit.size.clone(),
                qty_change: returned as i32,
                old_stock,
                new_stock: unit.stock,
                reference: StockReference::CancelReturn,
                ref_order_id: order_id.to_string(),
                created_at: now,
            },
        )?;
    }
    Ok(())
}

/// Append compensating entries for every EARN and REDEEM the order caused
fn reverse_ledger(
    ctx: &CommandContext<'_>,
    order: &OrderSnapshot,
    now: i64,
) -> Result<(), CheckoutError> {
    let entries = ctx
        .storage()
        .ledger_for_user_txn(ctx.txn(), order.user_id)?;
    for entry in entries {
        if entry.ref_order_id.as_deref() != Some(order.order_id.as_str()) {
            continue;
        }
        match entry.entry_type {
            LedgerEntryType::Earn => ledger::reverse_earn(
                ctx.storage(),
                ctx.txn(),
                order.user_id,
                entry.points,
                &order.order_id,
                now,
            )?,
            LedgerEntryType::Redeem => ledger::reverse_redeem(
                ctx.storage(),
                ctx.txn(),
                order.user_id,
                entry.points,
                &order.order_id,
                now,
            )?,
            // reversals are terminal, never reversed again
            LedgerEntryType::AutoReversalEarn | LedgerEntryType::AutoReversalRedeem => {}
        }
    }
    Ok(())
}

/// Step promotion counters back down, flooring at zero
fn reverse_promotions(
    ctx: &CommandContext<'_>,
    order: &OrderSnapshot,
) -> Result<(), CheckoutError> {
    if let Some(promo_id) = order.applied_promotion_id {
        if ctx
            .storage()
            .has_promo_redemption_txn(ctx.txn(), promo_id, order.user_id)?
        {
            ctx.storage()
                .clear_promo_redemption_txn(ctx.txn(), promo_id, order.user_id)?;
            if let Some(mut promo) = ctx.storage().get_promotion_txn(ctx.txn(), promo_id)? {
                promo.redemption_count = promo.redemption_count.saturating_sub(1);
                ctx.storage().store_promotion_txn(ctx.txn(), &promo)?;
            }
        }
    }
    for promo_id in &order.settled_campaign_promotions {
        if let Some(mut promo) = ctx.storage().get_promotion_txn(ctx.txn(), *promo_id)? {
            promo.redemption_count = promo.redemption_count.saturating_sub(1);
            ctx.storage().store_promotion_txn(ctx.txn(), &promo)?;
        }
    }
    Ok(())
}

/// Cancel the order, reversing settlement side effects when it was paid
fn cancel(
    ctx: &mut CommandContext<'_>,
    mut order: OrderSnapshot,
    metadata: &CommandMetadata,
) -> Result<OrderSnapshot, CheckoutError> {
    if order.is_paid() {
        restore_stock(ctx, &order.order_id, metadata.timestamp)?;
        reverse_ledger(ctx, &order, metadata.timestamp)?;
        reverse_promotions(ctx, &order)?;
    }

    ctx.storage()
        .clear_session_draft_txn(ctx.txn(), &order.session_id)?;

    order.status = OrderStatus::Canceled;
    order.cancel_requested = false;
    order.updated_at = metadata.timestamp;
    ctx.save_order(order.clone());
    Ok(order)
}

#[async_trait]
impl CommandHandler for CancelOrderAction {
    type Output = CancelOutcome;

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Self::Output, CheckoutError> {
        let order = ctx.load_order(&self.order_id)?;

        match order.status {
            OrderStatus::Pending => {
                let canceled = cancel(ctx, order, metadata)?;
                info!(
                    order_id = %self.order_id,
                    reason = self.reason.as_deref().unwrap_or("-"),
                    "order canceled"
                );
                Ok(CancelOutcome::Canceled(Box::new(canceled)))
            }
            OrderStatus::Packing => {
                let mut order = order;
                order.cancel_requested = true;
                order.updated_at = metadata.timestamp;
                ctx.save_order(order);
                info!(
                    order_id = %self.order_id,
                    reason = self.reason.as_deref().unwrap_or("-"),
                    "cancellation requested, awaiting approval"
                );
                Ok(CancelOutcome::ApprovalPending {
                    order_id: self.order_id.clone(),
                })
            }
            status => Err(CheckoutError::IllegalStateTransition {
                order_id: self.order_id.clone(),
                status,
            }),
        }
    }
}

#[async_trait]
impl CommandHandler for ApproveCancellationAction {
    type Output = OrderSnapshot;

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Self::Output, CheckoutError> {
        let order = ctx.load_order(&self.order_id)?;

        if order.status != OrderStatus::Packing || !order.cancel_requested {
            return Err(CheckoutError::IllegalStateTransition {
                order_id: self.order_id.clone(),
                status: order.status,
            });
        }

        let canceled = cancel(ctx, order, metadata)?;
        info!(order_id = %self.order_id, "cancellation approved");
        Ok(canceled)
    }
}
