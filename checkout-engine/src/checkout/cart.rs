//! Shopping cart operations
//!
//! The cart is the mutable pre-checkout container. Quantities are clamped
//! to the available stock at write time; settlement clamps again against
//! the stock it observes in its own transaction, so an optimistic cart
//! never oversells.
//!
//! Variants are identified by (product, color, size). A line without an
//! explicit color resolves to the product's default-color unit; one-size
//! products use an empty size string.

use redb::WriteTransaction;
use tracing::debug;

use crate::checkout::money::validate_cart_line;
use crate::checkout::storage::CheckoutStorage;
use crate::checkout::traits::CheckoutError;
use shared::checkout::{CartLine, InventoryUnit};

fn same_variant(a: &CartLine, b: &CartLine) -> bool {
    a.product_id == b.product_id && a.color_name == b.color_name && a.size == b.size
}

fn resolve_unit(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    line: &CartLine,
) -> Result<InventoryUnit, CheckoutError> {
    let size = line.size.as_deref().unwrap_or("");
    storage
        .resolve_unit_txn(txn, line.product_id, line.color_name.as_deref(), size)?
        .ok_or_else(|| {
            CheckoutError::Validation(format!(
                "unknown product variant: product {} color {:?} size {:?}",
                line.product_id, line.color_name, line.size
            ))
        })
}

/// Add a line to the cart, merging with an existing line of the same
/// variant. The resulting quantity is clamped to the available stock.
/// Returns the quantity actually stored.
pub fn add_line(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    user_id: i64,
    line: CartLine,
) -> Result<i32, CheckoutError> {
    validate_cart_line(&line)?;
    let unit = resolve_unit(storage, txn, &line)?;
    if unit.stock == 0 {
        return Err(CheckoutError::Validation(format!(
            "product {} ({}/{}) is out of stock",
            unit.product_id, unit.color_name, unit.size
        )));
    }

    let mut lines = storage.get_cart_txn(txn, user_id)?;
    let requested = match lines.iter().find(|l| same_variant(l, &line)) {
        Some(existing) => existing.quantity.saturating_add(line.quantity),
        None => line.quantity,
    };
    let stored = requested.min(unit.stock as i32);
    if stored < requested {
        debug!(
            user_id,
            product_id = line.product_id,
            requested,
            stored,
            "cart quantity clamped to stock"
        );
    }

    match lines.iter_mut().find(|l| same_variant(l, &line)) {
        Some(existing) => existing.quantity = stored,
        None => {
            let mut line = line;
            line.quantity = stored;
            lines.push(line);
        }
    }
    storage.store_cart_txn(txn, user_id, &lines)?;
    Ok(stored)
}

/// Set the quantity of an existing line. Zero removes the line; anything
/// else is clamped to stock. Returns the quantity actually stored.
pub fn set_quantity(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    user_id: i64,
    target: &CartLine,
    quantity: i32,
) -> Result<i32, CheckoutError> {
    if quantity < 0 {
        return Err(CheckoutError::Validation(format!(
            "quantity must be non-negative, got {quantity}"
        )));
    }
    let mut lines = storage.get_cart_txn(txn, user_id)?;
    let Some(index) = lines.iter().position(|l| same_variant(l, target)) else {
        return Err(CheckoutError::Validation(format!(
            "line not in cart: product {} color {:?} size {:?}",
            target.product_id, target.color_name, target.size
        )));
    };

    if quantity == 0 {
        lines.remove(index);
        storage.store_cart_txn(txn, user_id, &lines)?;
        return Ok(0);
    }

    let unit = resolve_unit(storage, txn, target)?;
    let stored = quantity.min(unit.stock as i32);
    lines[index].quantity = stored;
    storage.store_cart_txn(txn, user_id, &lines)?;
    Ok(stored)
}

/// Remove a line from the cart. Removing a line that is not present is a
/// no-op.
pub fn remove_line(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    user_id: i64,
    target: &CartLine,
) -> Result<(), CheckoutError> {
    let mut lines = storage.get_cart_txn(txn, user_id)?;
    lines.retain(|l| !same_variant(l, target));
    storage.store_cart_txn(txn, user_id, &lines)?;
    Ok(())
}
