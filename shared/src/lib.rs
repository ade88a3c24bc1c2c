//! Shared types for the storefront checkout core
//!
//! Domain models used by the checkout engine: cart lines, orders,
//! promotions, the reward ledger, inventory units and payment captures.

pub mod checkout;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};
