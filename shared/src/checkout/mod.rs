//! Checkout Domain Module
//!
//! Types for the checkout settlement pipeline:
//! - Cart: ephemeral lines owned by the active cart
//! - Order: a Pending draft kept in sync with the cart, settled on payment
//! - Promotion: campaign (product-scoped) and targeted (user-scoped) discounts
//! - Reward: append-only point ledger plus its cached aggregate
//! - Inventory: per-variant stock mutated only through signed movements

pub mod inventory;
pub mod order;
pub mod promotion;
pub mod reward;
pub mod types;

// Re-exports
pub use inventory::{InventoryUnit, StockMovement, StockReference};
pub use order::{DeliveryRecord, DeliveryStatus, OrderLine, OrderSnapshot, OrderStatus, PaymentStatus};
pub use promotion::{DiscountKind, Promotion, PromotionKind};
pub use reward::{LedgerEntryType, RewardAccount, RewardLedgerEntry, RewardTier};
pub use types::{CartLine, DraftRequest, PaymentCapture, RedemptionChoice};
