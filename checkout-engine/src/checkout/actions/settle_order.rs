//! Settlement
//!
//! Turns a verified payment capture into the order's side effects: stock
//! OUT movements, reward earn and redeem ledger entries, promotion
//! redemption counters, the delivery record and the Paid flag. All of it
//! lands in one write transaction; a rejected capture leaves no trace.

use async_trait::async_trait;
use rust_decimal::prelude::*;
use tracing::{info, warn};

use crate::checkout::ledger;
use crate::checkout::manager::SettleOutcome;
use crate::checkout::money::{round_money, validate_capture};
use crate::checkout::traits::{CheckoutError, CommandContext, CommandHandler, CommandMetadata};
use shared::checkout::{
    DeliveryRecord, DeliveryStatus, OrderLine, OrderStatus, PaymentCapture, PaymentStatus,
    PromotionKind, StockMovement, StockReference,
};

/// Settle an order against a payment capture
pub struct SettleOrderAction {
    pub capture: PaymentCapture,
    pub expected_currency: String,
}

impl SettleOrderAction {
    /// Deduct stock for every line, clamping to what is actually there.
    /// Lines whose variant cannot be resolved are skipped with a warning;
    /// settlement is lossy on inventory, never on money.
    fn deduct_stock(
        &self,
        ctx: &CommandContext<'_>,
        order_id: &str,
        lines: &[OrderLine],
        now: i64,
    ) -> Result<(), CheckoutError> {
        for line in lines {
            let size = line.size.as_deref().unwrap_or("");
            let Some(mut unit) = ctx.storage().resolve_unit_txn(
                ctx.txn(),
                line.product_id,
                line.color_name.as_deref(),
                size,
            )?
            else {
                warn!(
                    order_id,
                    product_id = line.product_id,
                    color = ?line.color_name,
                    size = ?line.size,
                    "no inventory unit for settled line, stock not deducted"
                );
                continue;
            };

            let requested = line.quantity.max(0) as u32;
            let deducted = requested.min(unit.stock);
            if deducted < requested {
                warn!(
                    order_id,
                    product_id = line.product_id,
                    requested,
                    available = unit.stock,
                    "stock deduction clamped to available"
                );
            }
            if deducted == 0 {
                continue;
            }

            let old_stock = unit.stock;
            unit.stock -= deducted;
            ctx.storage().store_unit_txn(ctx.txn(), &unit)?;
            ctx.storage().append_movement_txn(
                ctx.txn(),
                &StockMovement {
                    product_id: unit.product_id,
                    color_name: unit.color_name.clone(),
                    size: unit.size.clone(),
                    qty_change: -(deducted as i32),
                    old_stock,
                    new_stock: unit.stock,
                    reference: StockReference::Sale,
                    ref_order_id: order_id.to_string(),
                    created_at: now,
                },
            )?;
        }
        Ok(())
    }

    /// Bump redemption counters: the applied targeted promotion once per
    /// user, every active campaign promotion covering a settled product
    /// once per order. Returns the campaign ids counted, for reversal.
    fn count_promotions(
        &self,
        ctx: &CommandContext<'_>,
        user_id: i64,
        applied_promotion_id: Option<i64>,
        lines: &[OrderLine],
        metadata: &CommandMetadata,
    ) -> Result<Vec<i64>, CheckoutError> {
        if let Some(promo_id) = applied_promotion_id
            && let Some(mut promo) = ctx.storage().get_promotion_txn(ctx.txn(), promo_id)?
            && !ctx
                .storage()
                .has_promo_redemption_txn(ctx.txn(), promo_id, user_id)?
        {
            ctx.storage()
                .mark_promo_redemption_txn(ctx.txn(), promo_id, user_id)?;
            promo.redemption_count += 1;
            ctx.storage().store_promotion_txn(ctx.txn(), &promo)?;
        }

        let mut counted = Vec::new();
        for mut promo in ctx.storage().list_promotions_txn(ctx.txn())? {
            if promo.kind != PromotionKind::Campaign
                || !promo.is_active(metadata.today)
                || !lines.iter().any(|l| promo.covers_product(l.product_id))
            {
                continue;
            }
            promo.redemption_count += 1;
            ctx.storage().store_promotion_txn(ctx.txn(), &promo)?;
            counted.push(promo.id);
        }
        Ok(counted)
    }
}

#[async_trait]
impl CommandHandler for SettleOrderAction {
    type Output = SettleOutcome;

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Self::Output, CheckoutError> {
        validate_capture(&self.capture)?;

        let mut order = ctx.load_order(&self.capture.order_id)?;

        // duplicate webhook delivery, settlement already committed
        if order.is_paid() {
            info!(order_id = %order.order_id, "capture for already-paid order, no-op");
            return Ok(SettleOutcome::AlreadyPaid {
                order_id: order.order_id,
            });
        }
        if order.status != OrderStatus::Pending {
            return Err(CheckoutError::IllegalStateTransition {
                order_id: order.order_id,
                status: order.status,
            });
        }

        if self.capture.currency != self.expected_currency {
            return Err(CheckoutError::CurrencyMismatch {
                expected: self.expected_currency.clone(),
                captured: self.capture.currency.clone(),
            });
        }

        // the stored total must still re-derive from the persisted lines
        let derived = round_money(order.derived_total());
        if derived != order.total_amount {
            return Err(CheckoutError::Validation(format!(
                "order {} total diverged: stored {}, derived {}",
                order.order_id, order.total_amount, derived
            )));
        }
        if self.capture.amount != order.total_amount {
            return Err(CheckoutError::AmountMismatch {
                expected: order.total_amount,
                captured: self.capture.amount,
            });
        }

        self.deduct_stock(ctx, &order.order_id, &order.lines, metadata.timestamp)?;

        // redeem from the pre-settlement balance; the earn never funds it
        ledger::redeem(
            ctx.storage(),
            ctx.txn(),
            order.user_id,
            order.redeem_points,
            &order.order_id,
            metadata.timestamp,
        )?;
        let earned = match order.goods_subtotal().floor().to_u32() {
            Some(points) => points,
            None => {
                warn!(
                    order_id = %order.order_id,
                    subtotal = %order.goods_subtotal(),
                    "earned points saturated at u32::MAX"
                );
                u32::MAX
            }
        };
        ledger::earn(
            ctx.storage(),
            ctx.txn(),
            order.user_id,
            earned,
            &order.order_id,
            metadata.timestamp,
        )?;

        order.settled_campaign_promotions = self.count_promotions(
            ctx,
            order.user_id,
            order.applied_promotion_id,
            &order.lines,
            metadata,
        )?;

        if !ctx.storage().has_delivery_txn(ctx.txn(), &order.order_id)? {
            ctx.storage().store_delivery_txn(
                ctx.txn(),
                &DeliveryRecord {
                    order_id: order.order_id.clone(),
                    status: DeliveryStatus::Pending,
                    address_id: order.address_id,
                    created_at: metadata.timestamp,
                },
            )?;
        }

        ctx.storage().clear_cart_txn(ctx.txn(), order.user_id)?;
        ctx.storage()
            .clear_session_draft_txn(ctx.txn(), &order.session_id)?;

        order.payment_status = PaymentStatus::Paid;
        order.external_payment_ref = Some(self.capture.external_payment_id.clone());
        order.earned_points = Some(earned);
        order.updated_at = metadata.timestamp;

        info!(
            order_id = %order.order_id,
            amount = %self.capture.amount,
            earned,
            redeemed = order.redeem_points,
            "order settled"
        );

        ctx.save_order(order.clone());
        Ok(SettleOutcome::Settled(Box::new(order)))
    }
}
