//! Draft synchronization
//!
//! Keeps the single pending draft of a checkout session in lock-step with
//! the cart. Re-prices the whole cart on every call; an existing unpaid
//! draft is updated in place, a paid or missing one gets a fresh order id.
//! Syncing an empty cart deletes the draft.

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use crate::checkout::ledger;
use crate::checkout::manager::DraftOutcome;
use crate::checkout::money::{validate_cart_line, validate_distance};
use crate::checkout::pricing;
use crate::checkout::traits::{CheckoutError, CommandContext, CommandHandler, CommandMetadata};
use shared::checkout::{
    DraftRequest, OrderSnapshot, Promotion, PromotionKind, RewardTier,
};

/// Sync the session's pending draft from a cart state
pub struct SyncDraftAction {
    pub request: DraftRequest,
    pub tiers: Vec<RewardTier>,
}

impl SyncDraftAction {
    /// Promotions visible to this user: all campaigns plus targeted
    /// promotions not yet redeemed by the user
    fn visible_promotions(
        &self,
        ctx: &CommandContext<'_>,
    ) -> Result<Vec<Promotion>, CheckoutError> {
        let mut promotions = Vec::new();
        for promo in ctx.storage().list_promotions_txn(ctx.txn())? {
            if promo.kind == PromotionKind::Targeted
                && ctx
                    .storage()
                    .has_promo_redemption_txn(ctx.txn(), promo.id, self.request.user_id)?
            {
                continue;
            }
            promotions.push(promo);
        }
        Ok(promotions)
    }

    /// The draft to update, when the session already has an unpaid one
    fn existing_draft(
        &self,
        ctx: &CommandContext<'_>,
    ) -> Result<Option<OrderSnapshot>, CheckoutError> {
        let Some(order_id) = ctx
            .storage()
            .get_session_draft_txn(ctx.txn(), &self.request.session_id)?
        else {
            return Ok(None);
        };
        let order = ctx.load_order(&order_id)?;
        if order.user_id != self.request.user_id {
            return Err(CheckoutError::UserMismatch {
                order_id,
                user_id: self.request.user_id,
            });
        }
        // a paid draft is a settled order; the session starts over
        if order.is_paid() {
            return Ok(None);
        }
        Ok(Some(order))
    }
}

#[async_trait]
impl CommandHandler for SyncDraftAction {
    /// `None` when the cart was empty and the draft was deleted
    type Output = Option<DraftOutcome>;

    async fn execute(
        &self,
        ctx: &mut CommandContext<'_>,
        metadata: &CommandMetadata,
    ) -> Result<Self::Output, CheckoutError> {
        validate_distance(self.request.distance_km)?;
        for line in &self.request.lines {
            validate_cart_line(line)?;
        }

        let existing = self.existing_draft(ctx)?;

        if self.request.lines.is_empty() {
            if let Some(draft) = existing {
                ctx.storage().delete_order_txn(ctx.txn(), &draft.order_id)?;
                ctx.storage()
                    .clear_session_draft_txn(ctx.txn(), &self.request.session_id)?;
                info!(
                    order_id = %draft.order_id,
                    session_id = %self.request.session_id,
                    "empty cart, draft deleted"
                );
            }
            ctx.storage()
                .clear_cart_txn(ctx.txn(), self.request.user_id)?;
            return Ok(None);
        }

        let promotions = self.visible_promotions(ctx)?;
        let account = ctx
            .storage()
            .get_account_txn(ctx.txn(), self.request.user_id)?;
        let (balance, accumulated) = account
            .map(|a| (a.balance, a.accumulated))
            .unwrap_or((0, 0));
        let rate = ledger::tier_conversion_rate(&self.tiers, accumulated);

        let quote = pricing::quote(&self.request, &promotions, balance, rate, metadata.today);
        let targeted_ineligible = quote.targeted_ineligible;
        if targeted_ineligible {
            debug!(
                user_id = self.request.user_id,
                "chosen targeted promotion not eligible, priced without it"
            );
        }

        let mut draft = match existing {
            Some(draft) => draft,
            None => OrderSnapshot::new(
                Uuid::new_v4().to_string(),
                self.request.session_id.clone(),
                self.request.user_id,
                metadata.timestamp,
            ),
        };

        draft.lines = quote.lines;
        draft.subtotal = quote.subtotal;
        draft.campaign_savings = quote.campaign_savings;
        draft.targeted_discount = quote.targeted_discount;
        draft.points_discount = quote.points_discount;
        draft.shipping_fee = quote.shipping_fee;
        draft.total_amount = quote.total;
        draft.redeem_points = quote.redeem_points;
        draft.applied_promotion_id = quote.applied_promotion_id;
        draft.distance_km = self.request.distance_km;
        draft.address_id = self.request.address_id;
        draft.updated_at = metadata.timestamp;

        ctx.storage().set_session_draft_txn(
            ctx.txn(),
            &self.request.session_id,
            &draft.order_id,
        )?;
        ctx.storage()
            .store_cart_txn(ctx.txn(), self.request.user_id, &self.request.lines)?;

        info!(
            order_id = %draft.order_id,
            session_id = %self.request.session_id,
            total = %draft.total_amount,
            redeem_points = draft.redeem_points,
            "draft synced"
        );

        ctx.save_order(draft.clone());
        Ok(Some(DraftOutcome {
            order: draft,
            targeted_ineligible,
        }))
    }
}
