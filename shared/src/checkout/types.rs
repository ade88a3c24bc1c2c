//! Shared input types for the checkout pipeline

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A line in the active cart. Ephemeral: deleted on checkout success
/// or explicit clear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartLine {
    /// Product ID
    pub product_id: i64,
    /// Quantity (must be positive)
    pub quantity: i32,
    /// Unit price before any discount
    pub unit_price_original: Decimal,
    /// Selected color, if the product has variants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_name: Option<String>,
    /// Selected size, if the product has variants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// The user's targeted-promotion selection for this checkout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionChoice {
    /// Pick the best eligible targeted promotion automatically
    #[default]
    Auto,
    /// Apply no targeted promotion
    Decline,
    /// Apply a specific promotion by id
    Promotion(i64),
}

/// Everything the cart page supplies when the draft order is (re)computed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRequest {
    /// Checkout session key; one draft per session
    pub session_id: String,
    /// Owning user
    pub user_id: i64,
    /// Current cart lines
    pub lines: Vec<CartLine>,
    /// Distance to the selected address, in km
    pub distance_km: Decimal,
    /// Selected address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_id: Option<i64>,
    /// Targeted-promotion selection
    pub choice: RedemptionChoice,
    /// Points the user asked to redeem (capped during pricing)
    pub redeem_points: u32,
}

/// A verified payment capture from the external processor.
///
/// The HTTP verification call is out of scope here; by the time this
/// record reaches the settlement coordinator it is treated as ground truth
/// and validated only against the pending order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentCapture {
    pub order_id: String,
    pub external_payment_id: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer_ref: Option<String>,
}
