//! Order snapshot - the pending draft and its settled form
//!
//! One mutable draft exists per checkout session. The draft manager keeps
//! it in sync with the cart; the settlement coordinator re-validates its
//! totals from the persisted lines rather than trusting the stored value.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fulfilment status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Packing,
    Shipped,
    Delivered,
    Canceled,
}

/// Payment status, independent of fulfilment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
}

/// A persisted order line.
///
/// `unit_price_charged` is the already-discounted unit price baked in at
/// draft time. Settlement must never re-discount it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderLine {
    pub product_id: i64,
    pub quantity: i32,
    /// Unit price before campaign discounts (kept for display)
    pub unit_price_original: Decimal,
    /// Discounted unit price, rounded to 2 dp at draft time
    pub unit_price_charged: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl OrderLine {
    /// Line total at the charged price
    pub fn line_total(&self) -> Decimal {
        self.unit_price_charged * Decimal::from(self.quantity)
    }
}

/// Order snapshot - draft and settled state in one document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSnapshot {
    /// Order ID (assigned by the engine)
    pub order_id: String,
    /// Checkout session that owns the draft
    pub session_id: String,
    /// Owning user
    pub user_id: i64,
    /// Fulfilment status
    pub status: OrderStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Lines with charged prices baked in
    pub lines: Vec<OrderLine>,
    /// Sum of charged line totals
    pub subtotal: Decimal,
    /// What campaign promotions saved against original prices (display)
    pub campaign_savings: Decimal,
    /// Targeted-promotion discount applied to the subtotal
    pub targeted_discount: Decimal,
    /// Reward-point discount applied to the subtotal
    pub points_discount: Decimal,
    /// Distance-tiered shipping fee (never discounted)
    pub shipping_fee: Decimal,
    /// Grand total the external processor must capture
    pub total_amount: Decimal,
    /// Points the pricing engine actually committed to redeem
    pub redeem_points: u32,
    /// Targeted promotion applied to this order, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_promotion_id: Option<i64>,
    /// Campaign promotions whose redemption counters were bumped at
    /// settlement; reversal decrements exactly these
    #[serde(default)]
    pub settled_campaign_promotions: Vec<i64>,
    /// Shipping distance in km
    pub distance_km: Decimal,
    /// Selected address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_id: Option<i64>,
    /// External payment reference stored at settlement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_payment_ref: Option<String>,
    /// Points earned at settlement (floor of the goods subtotal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earned_points: Option<u32>,
    /// A Packing-state cancellation was requested and awaits approval
    #[serde(default)]
    pub cancel_requested: bool,
    /// Creation timestamp (ms)
    pub created_at: i64,
    /// Last update timestamp (ms)
    pub updated_at: i64,
}

impl OrderSnapshot {
    /// Create an empty Pending draft
    pub fn new(order_id: String, session_id: String, user_id: i64, now: i64) -> Self {
        Self {
            order_id,
            session_id,
            user_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            lines: Vec::new(),
            subtotal: Decimal::ZERO,
            campaign_savings: Decimal::ZERO,
            targeted_discount: Decimal::ZERO,
            points_discount: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            redeem_points: 0,
            applied_promotion_id: None,
            settled_campaign_promotions: Vec::new(),
            distance_km: Decimal::ZERO,
            address_id: None,
            external_payment_ref: None,
            earned_points: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sum of charged line totals (goods only, no shipping)
    pub fn goods_subtotal(&self) -> Decimal {
        self.lines.iter().map(OrderLine::line_total).sum()
    }

    /// Re-derive the grand total from persisted lines and stored discounts.
    ///
    /// The settlement coordinator compares this against both the stored
    /// `total_amount` and the captured amount.
    pub fn derived_total(&self) -> Decimal {
        let subtotal = self.goods_subtotal();
        let discount = (self.points_discount + self.targeted_discount).min(subtotal);
        (subtotal - discount + self.shipping_fee).max(Decimal::ZERO)
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }
}

/// Delivery status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    InTransit,
    Delivered,
}

/// Delivery record created at settlement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryRecord {
    pub order_id: String,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_id: Option<i64>,
    pub created_at: i64,
}
