//! Money helpers and input validation
//!
//! All monetary values are `Decimal` rounded to 2 decimal places, half-up,
//! at every discount step. Rounding per step (not only at the end) is what
//! lets totals re-derived from persisted line prices reproduce the stored
//! grand total exactly.

use crate::checkout::traits::CheckoutError;
use rust_decimal::prelude::*;
use shared::checkout::{CartLine, PaymentCapture};

/// Rounding for monetary values (2 decimal places, half-up)
const DECIMAL_PLACES: u32 = 2;

/// Maximum allowed unit price
const MAX_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
/// Maximum allowed quantity per line
const MAX_QUANTITY: i32 = 9999;

/// Round to 2 decimal places, half-up
#[inline]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate a cart line before pricing or persisting
pub fn validate_cart_line(line: &CartLine) -> Result<(), CheckoutError> {
    if line.quantity <= 0 {
        return Err(CheckoutError::Validation(format!(
            "quantity must be positive, got {}",
            line.quantity
        )));
    }
    if line.quantity > MAX_QUANTITY {
        return Err(CheckoutError::Validation(format!(
            "quantity exceeds maximum allowed ({}), got {}",
            MAX_QUANTITY, line.quantity
        )));
    }
    if line.unit_price_original < Decimal::ZERO {
        return Err(CheckoutError::Validation(format!(
            "unit price must be non-negative, got {}",
            line.unit_price_original
        )));
    }
    if line.unit_price_original > MAX_PRICE {
        return Err(CheckoutError::Validation(format!(
            "unit price exceeds maximum allowed ({}), got {}",
            MAX_PRICE, line.unit_price_original
        )));
    }
    Ok(())
}

/// Validate a payment capture before settlement
pub fn validate_capture(capture: &PaymentCapture) -> Result<(), CheckoutError> {
    if capture.amount <= Decimal::ZERO {
        return Err(CheckoutError::Validation(format!(
            "captured amount must be positive, got {}",
            capture.amount
        )));
    }
    if capture.currency.is_empty() {
        return Err(CheckoutError::Validation(
            "captured currency is empty".to_string(),
        ));
    }
    if capture.external_payment_id.is_empty() {
        return Err(CheckoutError::Validation(
            "external payment id is empty".to_string(),
        ));
    }
    Ok(())
}

/// Validate a shipping distance
pub fn validate_distance(distance_km: Decimal) -> Result<(), CheckoutError> {
    if distance_km < Decimal::ZERO {
        return Err(CheckoutError::Validation(format!(
            "distance must be non-negative, got {} km",
            distance_km
        )));
    }
    Ok(())
}
