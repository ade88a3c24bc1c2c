//! Promotion types
//!
//! Active status is derived at read time from the date window; it is never
//! persisted.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Promotion scope
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionKind {
    /// Product-scoped, auto-applied to matching cart lines
    Campaign,
    /// User-scoped, at most one per order, chosen or declined
    Targeted,
}

/// How the discount value is interpreted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    /// `discount_value` is a percentage of the price (0-100)
    Percentage,
    /// `discount_value` is an absolute amount
    FlatAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Promotion {
    pub id: i64,
    pub kind: PromotionKind,
    pub discount_kind: DiscountKind,
    pub discount_value: Decimal,
    /// Minimum subtotal for targeted promotions (zero for campaigns)
    pub min_spend: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Redemption cap across all users, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_redemptions: Option<u32>,
    /// Times redeemed; bumped at settlement, decremented (floor 0) on reversal
    #[serde(default)]
    pub redemption_count: u32,
    /// Products a campaign promotion covers
    #[serde(default)]
    pub product_ids: Vec<i64>,
    /// Users a targeted promotion is issued to
    #[serde(default)]
    pub user_ids: Vec<i64>,
}

impl Promotion {
    /// Whether the promotion is active on `today`.
    ///
    /// Missing bounds are open-ended.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        if let Some(start) = self.start_date
            && today < start
        {
            return false;
        }
        if let Some(end) = self.end_date
            && today > end
        {
            return false;
        }
        true
    }

    /// Whether the redemption cap still allows another redemption
    pub fn has_capacity(&self) -> bool {
        self.max_redemptions
            .is_none_or(|max| self.redemption_count < max)
    }

    pub fn covers_product(&self, product_id: i64) -> bool {
        self.product_ids.contains(&product_id)
    }

    pub fn issued_to(&self, user_id: i64) -> bool {
        self.user_ids.contains(&user_id)
    }
}
