//! Checkout Settlement Module
//!
//! This module implements the storefront's checkout pipeline:
//!
//! - **pricing**: pure price computation (campaign discounts, shipping
//!   tiers, targeted promotions, reward-point redemption)
//! - **ledger**: append-only reward-point ledger plus its cached aggregate
//! - **storage**: redb-based persistence layer for orders, carts,
//!   inventory, promotions and the ledger
//! - **actions**: one command handler per operation (draft sync,
//!   settlement, cancellation)
//! - **manager**: CheckoutManager for command orchestration
//!
//! # Command Flow
//!
//! ```text
//! command → CheckoutManager → CommandContext (write txn) → action
//!                 ↓                                           ↓
//!           idempotency check                      mutate tables + snapshots
//!                 ↓
//!           commit (or drop = full rollback)
//! ```
//!
//! Everything an action writes lands in a single redb write transaction.
//! Settlement and cancellation for the same order serialize on that
//! transaction, so at most one of them commits side effects.

pub mod actions;
pub mod cart;
pub mod config;
pub mod ledger;
pub mod manager;
pub mod money;
pub mod pricing;
pub mod storage;
pub mod traits;
pub mod verify;

// Re-exports
pub use config::CheckoutConfig;
pub use manager::{CancelOutcome, CheckoutManager, DraftOutcome, ManagerError, SettleOutcome};
pub use pricing::PriceQuote;
pub use storage::CheckoutStorage;
pub use traits::{CheckoutError, CommandContext, CommandHandler, CommandMetadata};
pub use verify::PaymentVerifier;

// Re-export shared types for convenience
pub use shared::checkout::{
    CartLine, DraftRequest, OrderSnapshot, OrderStatus, PaymentCapture, PaymentStatus,
    RedemptionChoice,
};
