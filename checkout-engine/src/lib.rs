//! Checkout settlement engine for the storefront.
//!
//! The engine owns the checkout pricing pipeline, the draft order kept in
//! sync with the cart, payment settlement, and cancellation reversal. See
//! the [`checkout`] module for the architecture overview.

pub mod checkout;

pub use checkout::{CheckoutConfig, CheckoutManager};
