//! Reward ledger types
//!
//! The ledger is the source of truth; `RewardAccount` is a cached aggregate
//! that must always be re-derivable from the full entry history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Point movement type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    /// Points earned on a settled order
    Earn,
    /// Points spent as a checkout discount
    Redeem,
    /// Cancellation reversing a prior EARN
    AutoReversalEarn,
    /// Cancellation reversing a prior REDEEM
    AutoReversalRedeem,
}

/// One append-only ledger entry. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardLedgerEntry {
    pub user_id: i64,
    pub entry_type: LedgerEntryType,
    /// Always positive; the entry type carries the sign
    pub points: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_order_id: Option<String>,
    pub created_at: i64,
}

/// Cached aggregate per user.
///
/// balance = EARN − REDEEM + AUTO_REVERSAL_REDEEM − AUTO_REVERSAL_EARN,
/// floored at 0 on write. accumulated = EARN − AUTO_REVERSAL_EARN, floored
/// at 0; redemption never reduces lifetime tier standing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardAccount {
    pub user_id: i64,
    pub balance: u32,
    pub accumulated: u32,
}

impl RewardAccount {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            balance: 0,
            accumulated: 0,
        }
    }
}

/// One row of the tier table mapping lifetime points to a conversion rate
/// (currency per point)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardTier {
    pub min_points: u32,
    pub max_points: u32,
    pub rate: Decimal,
}
