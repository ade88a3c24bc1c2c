//! Inventory types
//!
//! Stock is mutated only through signed movements; every movement records
//! the stock it observed so drift is detectable after the fact.

use serde::{Deserialize, Serialize};

/// A sellable variant (product + color + size) and its stock
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryUnit {
    pub product_id: i64,
    pub color_name: String,
    pub size: String,
    pub stock: u32,
    /// Lines without an explicit color resolve to the default-color unit
    #[serde(default)]
    pub is_default_color: bool,
}

/// What caused a stock movement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockReference {
    /// OUT movement at settlement
    Sale,
    /// IN movement on cancellation reversal
    CancelReturn,
}

/// Signed stock movement log row.
///
/// Invariant: `new_stock = old_stock + qty_change` with `old_stock` read
/// under the same write transaction that performs the update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockMovement {
    pub product_id: i64,
    pub color_name: String,
    pub size: String,
    pub qty_change: i32,
    pub old_stock: u32,
    pub new_stock: u32,
    pub reference: StockReference,
    pub ref_order_id: String,
    pub created_at: i64,
}
