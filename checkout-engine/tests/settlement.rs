//! End-to-end checkout scenarios: draft sync, settlement, cancellation
//! and reversal against a real (in-memory) database.

use checkout_engine::checkout::ledger;
use checkout_engine::checkout::manager::{CancelOutcome, SettleOutcome};
use checkout_engine::checkout::traits::CheckoutError;
use checkout_engine::checkout::verify::PaymentVerifier;
use checkout_engine::checkout::ManagerError;
use checkout_engine::{CheckoutConfig, CheckoutManager};

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::checkout::{
    CartLine, DiscountKind, DraftRequest, InventoryUnit, LedgerEntryType, OrderStatus,
    PaymentCapture, Promotion, PromotionKind, RedemptionChoice, StockReference,
};

fn dec(value: i64, scale: u32) -> Decimal {
    Decimal::new(value, scale)
}

fn manager() -> CheckoutManager {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    CheckoutManager::open_in_memory(CheckoutConfig::default()).unwrap()
}

fn seed_unit(manager: &CheckoutManager, product_id: i64, stock: u32) {
    manager
        .upsert_inventory(&InventoryUnit {
            product_id,
            color_name: "Default".to_string(),
            size: "".to_string(),
            stock,
            is_default_color: true,
        })
        .unwrap();
}

fn seed_campaign(manager: &CheckoutManager, id: i64, percent: i64, product_ids: Vec<i64>) {
    manager
        .upsert_promotion(&Promotion {
            id,
            kind: PromotionKind::Campaign,
            discount_kind: DiscountKind::Percentage,
            discount_value: dec(percent, 0),
            min_spend: Decimal::ZERO,
            start_date: None,
            end_date: None,
            max_redemptions: None,
            redemption_count: 0,
            product_ids,
            user_ids: vec![],
        })
        .unwrap();
}

fn seed_targeted(manager: &CheckoutManager, id: i64, flat: i64, min_spend: i64, user_id: i64) {
    manager
        .upsert_promotion(&Promotion {
            id,
            kind: PromotionKind::Targeted,
            discount_kind: DiscountKind::FlatAmount,
            discount_value: dec(flat, 0),
            min_spend: dec(min_spend, 0),
            start_date: None,
            end_date: None,
            max_redemptions: None,
            redemption_count: 0,
            product_ids: vec![],
            user_ids: vec![user_id],
        })
        .unwrap();
}

fn seed_points(manager: &CheckoutManager, user_id: i64, points: u32) {
    let storage = manager.storage();
    let txn = storage.begin_write().unwrap();
    ledger::earn(storage, &txn, user_id, points, "seed", 0).unwrap();
    txn.commit().unwrap();
}

fn line(product_id: i64, quantity: i32, price: Decimal) -> CartLine {
    CartLine {
        product_id,
        quantity,
        unit_price_original: price,
        color_name: None,
        size: None,
    }
}

fn request(user_id: i64, lines: Vec<CartLine>, redeem_points: u32) -> DraftRequest {
    DraftRequest {
        session_id: format!("sess-{user_id}"),
        user_id,
        lines,
        distance_km: dec(15, 0),
        address_id: Some(1),
        choice: RedemptionChoice::Auto,
        redeem_points,
    }
}

fn capture(order_id: &str, payment_id: &str, amount: Decimal) -> PaymentCapture {
    PaymentCapture {
        order_id: order_id.to_string(),
        external_payment_id: payment_id.to_string(),
        amount,
        currency: "MYR".to_string(),
        payer_ref: None,
    }
}

/// Two RM100 products, one with a 10% campaign; user 9 holds 1999 points
/// and a RM20-off-RM150 targeted promotion. Standard fixture for the
/// settlement tests.
async fn settled_fixture(manager: &CheckoutManager) -> String {
    seed_unit(manager, 7, 10);
    seed_unit(manager, 8, 10);
    seed_campaign(manager, 1, 10, vec![7]);
    seed_targeted(manager, 2, 20, 150, 9);
    seed_points(manager, 9, 1999); // stays in the 0.010 tier

    let draft = manager
        .sync_draft(request(
            9,
            vec![line(7, 1, dec(10000, 2)), line(8, 1, dec(10000, 2))],
            500,
        ))
        .await
        .unwrap()
        .unwrap()
        .order;
    assert_eq!(draft.total_amount, dec(17090, 2));

    let outcome = manager
        .settle(capture(&draft.order_id, "cap-1", dec(17090, 2)))
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::Settled(_)));
    draft.order_id
}

#[tokio::test]
async fn full_checkout_settles_with_all_side_effects() {
    let manager = manager();
    let order_id = settled_fixture(&manager).await;

    let order = manager.order(&order_id).unwrap().unwrap();
    assert!(order.is_paid());
    assert_eq!(order.subtotal, dec(19000, 2)); // 90 + 100
    assert_eq!(order.targeted_discount, dec(2000, 2));
    assert_eq!(order.points_discount, dec(500, 2));
    assert_eq!(order.shipping_fee, dec(590, 2));
    assert_eq!(order.total_amount, dec(17090, 2)); // 190 - 25 + 5.90
    assert_eq!(order.earned_points, Some(190));
    assert_eq!(order.external_payment_ref.as_deref(), Some("cap-1"));
    assert_eq!(order.settled_campaign_promotions, vec![1]);

    // stock moved out once per line
    assert_eq!(manager.storage().get_unit(7, "Default", "").unwrap().unwrap().stock, 9);
    assert_eq!(manager.storage().get_unit(8, "Default", "").unwrap().unwrap().stock, 9);
    let movements = manager.movements_for_order(&order_id).unwrap();
    assert_eq!(movements.len(), 2);
    assert!(movements.iter().all(|m| m.reference == StockReference::Sale));

    // 1999 seed - 500 redeemed + 190 earned
    let account = manager.reward_account(9).unwrap().unwrap();
    assert_eq!(account.balance, 1689);
    assert_eq!(account.accumulated, 2189);

    // promotion counters bumped
    assert_eq!(manager.storage().get_promotion(1).unwrap().unwrap().redemption_count, 1);
    assert_eq!(manager.storage().get_promotion(2).unwrap().unwrap().redemption_count, 1);

    // cart gone, delivery created
    assert!(manager.cart(9).unwrap().is_empty());
    assert!(manager.storage().get_delivery(&order_id).unwrap().is_some());
}

#[tokio::test]
async fn duplicate_capture_delivery_is_a_noop() {
    let manager = manager();
    let order_id = settled_fixture(&manager).await;

    let ledger_before = manager.reward_ledger(9).unwrap().len();
    let movements_before = manager.movements_for_order(&order_id).unwrap().len();

    let outcome = manager
        .settle(capture(&order_id, "cap-1", dec(17090, 2)))
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::AlreadyPaid { .. }));

    assert_eq!(manager.reward_ledger(9).unwrap().len(), ledger_before);
    assert_eq!(
        manager.movements_for_order(&order_id).unwrap().len(),
        movements_before
    );
    assert_eq!(manager.storage().get_unit(7, "Default", "").unwrap().unwrap().stock, 9);
}

#[tokio::test]
async fn amount_mismatch_rolls_back_everything() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    let draft = manager
        .sync_draft(request(9, vec![line(7, 2, dec(5000, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;

    let err = manager
        .settle(capture(&draft.order_id, "cap-1", dec(9999, 2)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Checkout(CheckoutError::AmountMismatch { .. })
    ));

    let order = manager.order(&draft.order_id).unwrap().unwrap();
    assert!(!order.is_paid());
    assert!(manager.movements_for_order(&draft.order_id).unwrap().is_empty());
    assert!(manager.reward_ledger(9).unwrap().is_empty());
    assert_eq!(manager.storage().get_unit(7, "Default", "").unwrap().unwrap().stock, 10);
}

#[tokio::test]
async fn wrong_currency_is_rejected() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    let draft = manager
        .sync_draft(request(9, vec![line(7, 1, dec(5000, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;

    let mut cap = capture(&draft.order_id, "cap-1", draft.total_amount);
    cap.currency = "USD".to_string();
    let err = manager.settle(cap).await.unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Checkout(CheckoutError::CurrencyMismatch { .. })
    ));
}

#[tokio::test]
async fn settlement_clamps_stock_deduction_to_available() {
    let manager = manager();
    seed_unit(&manager, 7, 3);
    // the draft was priced when stock looked sufficient
    let draft = manager
        .sync_draft(request(9, vec![line(7, 5, dec(1000, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;

    manager
        .settle(capture(&draft.order_id, "cap-1", draft.total_amount))
        .await
        .unwrap();

    assert_eq!(manager.storage().get_unit(7, "Default", "").unwrap().unwrap().stock, 0);
    let movements = manager.movements_for_order(&draft.order_id).unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].qty_change, -3);
    assert_eq!(movements[0].old_stock, 3);
    assert_eq!(movements[0].new_stock, 0);
}

#[tokio::test]
async fn settle_then_cancel_restores_everything() {
    let manager = manager();
    let order_id = settled_fixture(&manager).await;

    let outcome = manager.cancel(&order_id, Some("changed my mind".to_string())).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Canceled(_)));

    let order = manager.order(&order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);

    // stock returned via CancelReturn movements
    assert_eq!(manager.storage().get_unit(7, "Default", "").unwrap().unwrap().stock, 10);
    assert_eq!(manager.storage().get_unit(8, "Default", "").unwrap().unwrap().stock, 10);
    let returns: Vec<_> = manager
        .movements_for_order(&order_id)
        .unwrap()
        .into_iter()
        .filter(|m| m.reference == StockReference::CancelReturn)
        .collect();
    assert_eq!(returns.len(), 2);

    // points back where they started: 1999 - 500 + 190 - 190 + 500
    let account = manager.reward_account(9).unwrap().unwrap();
    assert_eq!(account.balance, 1999);
    assert_eq!(account.accumulated, 1999);

    // counters stepped back down, targeted promotion usable again
    assert_eq!(manager.storage().get_promotion(1).unwrap().unwrap().redemption_count, 0);
    assert_eq!(manager.storage().get_promotion(2).unwrap().unwrap().redemption_count, 0);

    // the cached aggregate still re-derives from the full history
    let entries = manager.reward_ledger(9).unwrap();
    assert_eq!(ledger::recompute_account(9, &entries), account);
}

#[tokio::test]
async fn unpaid_pending_draft_cancels_without_side_effects() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    let draft = manager
        .sync_draft(request(9, vec![line(7, 1, dec(5000, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;

    let outcome = manager.cancel(&draft.order_id, None).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::Canceled(_)));

    let order = manager.order(&draft.order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);
    // nothing was settled, so nothing gets reversed
    assert!(manager.movements_for_order(&draft.order_id).unwrap().is_empty());
    assert!(manager.reward_ledger(9).unwrap().is_empty());
}

#[tokio::test]
async fn packing_cancellation_waits_for_approval() {
    let manager = manager();
    let order_id = settled_fixture(&manager).await;
    manager.advance_fulfillment(&order_id, OrderStatus::Packing).unwrap();

    let outcome = manager.cancel(&order_id, None).await.unwrap();
    assert!(matches!(outcome, CancelOutcome::ApprovalPending { .. }));

    // nothing reversed yet
    let order = manager.order(&order_id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Packing);
    assert!(order.cancel_requested);
    assert_eq!(manager.storage().get_unit(7, "Default", "").unwrap().unwrap().stock, 9);

    // a pending cancellation blocks shipping
    let err = manager.advance_fulfillment(&order_id, OrderStatus::Shipped).unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Checkout(CheckoutError::IllegalStateTransition { .. })
    ));

    let canceled = manager.approve_cancellation(&order_id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(manager.storage().get_unit(7, "Default", "").unwrap().unwrap().stock, 10);
    assert_eq!(manager.reward_account(9).unwrap().unwrap().balance, 1999);
}

#[tokio::test]
async fn shipped_orders_cannot_cancel() {
    let manager = manager();
    let order_id = settled_fixture(&manager).await;
    manager.advance_fulfillment(&order_id, OrderStatus::Packing).unwrap();
    manager.advance_fulfillment(&order_id, OrderStatus::Shipped).unwrap();

    let err = manager.cancel(&order_id, None).await.unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Checkout(CheckoutError::IllegalStateTransition { .. })
    ));
}

#[tokio::test]
async fn insufficient_points_at_settlement_rejects_atomically() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    seed_points(&manager, 9, 600);

    let draft = manager
        .sync_draft(request(9, vec![line(7, 2, dec(10000, 2))], 500))
        .await
        .unwrap()
        .unwrap()
        .order;
    assert_eq!(draft.redeem_points, 500);

    // the user spends points between draft and capture
    {
        let storage = manager.storage();
        let txn = storage.begin_write().unwrap();
        ledger::redeem(storage, &txn, 9, 400, "elsewhere", 1).unwrap();
        txn.commit().unwrap();
    }

    let err = manager
        .settle(capture(&draft.order_id, "cap-1", draft.total_amount))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Checkout(CheckoutError::InsufficientPoints { .. })
    ));

    // stock deduction ran before the ledger inside the transaction and
    // must be gone with it
    assert_eq!(manager.storage().get_unit(7, "Default", "").unwrap().unwrap().stock, 10);
    assert!(manager.movements_for_order(&draft.order_id).unwrap().is_empty());
    assert!(!manager.order(&draft.order_id).unwrap().unwrap().is_paid());
}

#[tokio::test]
async fn reversal_clamps_after_interleaved_redemption() {
    let manager = manager();
    seed_unit(&manager, 7, 10);

    // no starting points; the order itself earns 200
    let draft = manager
        .sync_draft(request(9, vec![line(7, 2, dec(10000, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;
    manager
        .settle(capture(&draft.order_id, "cap-1", draft.total_amount))
        .await
        .unwrap();
    assert_eq!(manager.reward_account(9).unwrap().unwrap().balance, 200);

    // spend 150 of the earned points on something else
    {
        let storage = manager.storage();
        let txn = storage.begin_write().unwrap();
        ledger::redeem(storage, &txn, 9, 150, "elsewhere", 1).unwrap();
        txn.commit().unwrap();
    }

    manager.cancel(&draft.order_id, None).await.unwrap();

    // the reversal entry records the full 200 even though only 50 remained
    let entries = manager.reward_ledger(9).unwrap();
    let reversal = entries
        .iter()
        .find(|e| e.entry_type == LedgerEntryType::AutoReversalEarn)
        .unwrap();
    assert_eq!(reversal.points, 200);

    let account = manager.reward_account(9).unwrap().unwrap();
    assert_eq!(account.balance, 0); // clamped, the user keeps nothing
    assert_eq!(ledger::recompute_account(9, &entries), account);
}

#[tokio::test]
async fn totals_rederive_from_persisted_lines() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    seed_campaign(&manager, 1, 33, vec![7]);

    // 33% off 9.99 rounds per unit before multiplying
    let draft = manager
        .sync_draft(request(9, vec![line(7, 3, dec(999, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;

    let rederived: Decimal = draft.lines.iter().map(|l| l.line_total()).sum();
    assert_eq!(rederived, draft.subtotal);
    assert_eq!(draft.derived_total(), draft.total_amount);

    // and settlement accepts exactly that amount
    manager
        .settle(capture(&draft.order_id, "cap-1", draft.total_amount))
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_cart_sync_deletes_the_draft() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    let draft = manager
        .sync_draft(request(9, vec![line(7, 1, dec(5000, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;

    let result = manager.sync_draft(request(9, vec![], 0)).await.unwrap();
    assert!(result.is_none());
    assert!(manager.order(&draft.order_id).unwrap().is_none());
}

#[tokio::test]
async fn resyncing_keeps_the_order_id() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    seed_unit(&manager, 8, 10);

    let first = manager
        .sync_draft(request(9, vec![line(7, 1, dec(5000, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;
    let second = manager
        .sync_draft(request(
            9,
            vec![line(7, 1, dec(5000, 2)), line(8, 2, dec(2500, 2))],
            0,
        ))
        .await
        .unwrap()
        .unwrap()
        .order;

    assert_eq!(first.order_id, second.order_id);
    assert_eq!(second.subtotal, dec(10000, 2));
}

#[tokio::test]
async fn settled_targeted_promotion_is_not_offered_again() {
    let manager = manager();
    let _ = settled_fixture(&manager).await;

    // a fresh checkout for the same user must not see promotion 2 again
    let draft = manager
        .sync_draft(DraftRequest {
            session_id: "sess-next".to_string(),
            user_id: 9,
            lines: vec![line(8, 2, dec(10000, 2))],
            distance_km: dec(10, 0),
            address_id: None,
            choice: RedemptionChoice::Auto,
            redeem_points: 0,
        })
        .await
        .unwrap()
        .unwrap()
        .order;

    assert_eq!(draft.targeted_discount, Decimal::ZERO);
    assert_eq!(draft.applied_promotion_id, None);
}

#[tokio::test]
async fn session_draft_is_scoped_to_its_user() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    manager
        .sync_draft(request(9, vec![line(7, 1, dec(5000, 2))], 0))
        .await
        .unwrap();

    // a different user presenting the same session id is rejected
    let mut hijack = request(9, vec![line(7, 1, dec(5000, 2))], 0);
    hijack.user_id = 10;
    let err = manager.sync_draft(hijack).await.unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Checkout(CheckoutError::UserMismatch { .. })
    ));
}

#[tokio::test]
async fn cart_operations_through_the_manager() {
    let manager = manager();
    seed_unit(&manager, 7, 3);

    let target = CartLine {
        product_id: 7,
        quantity: 2,
        unit_price_original: dec(1000, 2),
        color_name: None,
        size: None,
    };
    assert_eq!(manager.add_to_cart(9, target.clone()).unwrap(), 2);
    // merging past the stock limit clamps
    assert_eq!(manager.add_to_cart(9, target.clone()).unwrap(), 3);
    assert_eq!(manager.set_cart_quantity(9, &target, 1).unwrap(), 1);
    assert_eq!(manager.cart(9).unwrap().len(), 1);

    manager.clear_cart(9).unwrap();
    assert!(manager.cart(9).unwrap().is_empty());
}

#[tokio::test]
async fn settled_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkout.redb");

    let order_id = {
        let manager = CheckoutManager::open(&path, CheckoutConfig::default()).unwrap();
        settled_fixture(&manager).await
    };

    let reopened = CheckoutManager::open(&path, CheckoutConfig::default()).unwrap();
    let order = reopened.order(&order_id).unwrap().unwrap();
    assert!(order.is_paid());
    assert_eq!(order.total_amount, dec(17090, 2));
    assert_eq!(reopened.reward_account(9).unwrap().unwrap().balance, 1689);
    assert_eq!(reopened.movements_for_order(&order_id).unwrap().len(), 2);

    // idempotency markers survive too
    let outcome = reopened
        .settle(capture(&order_id, "cap-1", dec(17090, 2)))
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::AlreadyPaid { .. }));
}

struct FixedVerifier(PaymentCapture);

#[async_trait]
impl PaymentVerifier for FixedVerifier {
    async fn fetch_capture(
        &self,
        _order_id: &str,
        _external_payment_id: &str,
    ) -> Result<PaymentCapture, CheckoutError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn verified_settlement_uses_the_provider_capture() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    let draft = manager
        .sync_draft(request(9, vec![line(7, 1, dec(5000, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;

    let verifier = FixedVerifier(capture(&draft.order_id, "cap-1", draft.total_amount));
    let outcome = manager
        .settle_verified(&verifier, &draft.order_id, "cap-1")
        .await
        .unwrap();
    assert!(matches!(outcome, SettleOutcome::Settled(_)));

    // provider returning a capture for a different order is rejected
    let wrong = FixedVerifier(capture("someone-else", "cap-2", dec(100, 0)));
    let err = manager
        .settle_verified(&wrong, &draft.order_id, "cap-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Checkout(CheckoutError::VerificationFailed(_))
    ));
}

#[tokio::test]
async fn ineligible_chosen_promotion_is_reported_on_the_draft() {
    let manager = manager();
    seed_unit(&manager, 7, 10);
    seed_targeted(&manager, 2, 20, 150, 9);

    // RM100 cart, below the RM150 minimum spend of promotion 2
    let mut req = request(9, vec![line(7, 1, dec(10000, 2))], 0);
    req.choice = RedemptionChoice::Promotion(2);
    let outcome = manager.sync_draft(req).await.unwrap().unwrap();

    assert!(outcome.targeted_ineligible);
    assert_eq!(outcome.order.targeted_discount, Decimal::ZERO);
    assert_eq!(outcome.order.applied_promotion_id, None);

    // growing the cart past the minimum clears the flag
    let mut req = request(9, vec![line(7, 2, dec(10000, 2))], 0);
    req.choice = RedemptionChoice::Promotion(2);
    let outcome = manager.sync_draft(req).await.unwrap().unwrap();
    assert!(!outcome.targeted_ineligible);
    assert_eq!(outcome.order.applied_promotion_id, Some(2));
    assert_eq!(outcome.order.targeted_discount, dec(20, 0));
}

#[tokio::test]
async fn earned_points_saturate_on_very_large_orders() {
    let manager = manager();
    seed_unit(&manager, 7, 9999);

    // 9999 units at RM1,000,000 each puts the goods subtotal past u32::MAX
    let draft = manager
        .sync_draft(request(9, vec![line(7, 9999, dec(100_000_000, 2))], 0))
        .await
        .unwrap()
        .unwrap()
        .order;

    manager
        .settle(capture(&draft.order_id, "cap-1", draft.total_amount))
        .await
        .unwrap();

    let order = manager.order(&draft.order_id).unwrap().unwrap();
    assert_eq!(order.earned_points, Some(u32::MAX));
    let account = manager.reward_account(9).unwrap().unwrap();
    assert_eq!(account.balance, u32::MAX);
}
