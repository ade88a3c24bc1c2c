//! Reward Ledger
//!
//! Append-only point ledger plus the cached per-user aggregate. The ledger
//! entries are the source of truth: `recompute_account` folds the full
//! history with the same saturating arithmetic the write path uses, so the
//! cached aggregate is always re-derivable.
//!
//! Reversal entries always record the full reversed amount even when the
//! aggregate clamps at zero; the clamp is logged, never hidden in the
//! history.

use rust_decimal::Decimal;
use tracing::warn;

use crate::checkout::storage::{CheckoutStorage, StorageResult};
use crate::checkout::traits::CheckoutError;
use redb::WriteTransaction;
use shared::checkout::{LedgerEntryType, RewardAccount, RewardLedgerEntry, RewardTier};

/// Conversion rate (currency per point) when no tier matches
const DEFAULT_CONVERSION_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

fn load_account(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    user_id: i64,
) -> StorageResult<RewardAccount> {
    Ok(storage
        .get_account_txn(txn, user_id)?
        .unwrap_or_else(|| RewardAccount::new(user_id)))
}

fn append(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    user_id: i64,
    entry_type: LedgerEntryType,
    points: u32,
    ref_order_id: Option<&str>,
    now: i64,
) -> StorageResult<()> {
    let entry = RewardLedgerEntry {
        user_id,
        entry_type,
        points,
        ref_order_id: ref_order_id.map(str::to_string),
        created_at: now,
    };
    storage.append_ledger_txn(txn, &entry)?;
    Ok(())
}

/// Record earned points. Zero points appends nothing.
pub fn earn(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    user_id: i64,
    points: u32,
    ref_order_id: &str,
    now: i64,
) -> StorageResult<()> {
    if points == 0 {
        return Ok(());
    }
    append(
        storage,
        txn,
        user_id,
        LedgerEntryType::Earn,
        points,
        Some(ref_order_id),
        now,
    )?;
    let mut account = load_account(storage, txn, user_id)?;
    account.balance += points;
    account.accumulated += points;
    storage.store_account_txn(txn, &account)
}

/// Spend points as a checkout discount. Rejects when the balance is short;
/// nothing is appended on rejection.
pub fn redeem(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    user_id: i64,
    points: u32,
    ref_order_id: &str,
    now: i64,
) -> Result<(), CheckoutError> {
    if points == 0 {
        return Ok(());
    }
    let mut account = load_account(storage, txn, user_id)?;
    if account.balance < points {
        return Err(CheckoutError::InsufficientPoints {
            requested: points,
            balance: account.balance,
        });
    }
    append(
        storage,
        txn,
        user_id,
        LedgerEntryType::Redeem,
        points,
        Some(ref_order_id),
        now,
    )?;
    account.balance -= points;
    storage.store_account_txn(txn, &account)?;
    Ok(())
}

/// Reverse an earlier EARN on cancellation. The entry records the full
/// amount; only the aggregate clamps at zero (with a warning) when the
/// user has spent the points in the meantime.
pub fn reverse_earn(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    user_id: i64,
    points: u32,
    ref_order_id: &str,
    now: i64,
) -> StorageResult<()> {
    if points == 0 {
        return Ok(());
    }
    append(
        storage,
        txn,
        user_id,
        LedgerEntryType::AutoReversalEarn,
        points,
        Some(ref_order_id),
        now,
    )?;
    let mut account = load_account(storage, txn, user_id)?;
    if account.balance < points {
        warn!(
            user_id,
            points,
            balance = account.balance,
            order_id = ref_order_id,
            "earn reversal clamps balance at zero"
        );
    }
    account.balance = account.balance.saturating_sub(points);
    account.accumulated = account.accumulated.saturating_sub(points);
    storage.store_account_txn(txn, &account)
}

/// Return redeemed points to the balance on cancellation
pub fn reverse_redeem(
    storage: &CheckoutStorage,
    txn: &WriteTransaction,
    user_id: i64,
    points: u32,
    ref_order_id: &str,
    now: i64,
) -> StorageResult<()> {
    if points == 0 {
        return Ok(());
    }
    append(
        storage,
        txn,
        user_id,
        LedgerEntryType::AutoReversalRedeem,
        points,
        Some(ref_order_id),
        now,
    )?;
    let mut account = load_account(storage, txn, user_id)?;
    account.balance += points;
    storage.store_account_txn(txn, &account)
}

/// Conversion rate for a lifetime point total. Falls back to the default
/// rate when no tier covers the total.
pub fn tier_conversion_rate(tiers: &[RewardTier], accumulated: u32) -> Decimal {
    tiers
        .iter()
        .find(|t| accumulated >= t.min_points && accumulated <= t.max_points)
        .map(|t| t.rate)
        .unwrap_or(DEFAULT_CONVERSION_RATE)
}

/// Re-derive an aggregate from a full entry history.
///
/// Folds sequentially with the same saturating arithmetic as the write
/// path, so interleaved redemptions and clamped reversals reproduce the
/// cached account exactly.
pub fn recompute_account(user_id: i64, entries: &[RewardLedgerEntry]) -> RewardAccount {
    let mut account = RewardAccount::new(user_id);
    for entry in entries {
        match entry.entry_type {
            LedgerEntryType::Earn => {
                account.balance += entry.points;
                account.accumulated += entry.points;
            }
            LedgerEntryType::Redeem => {
                account.balance = account.balance.saturating_sub(entry.points);
            }
            LedgerEntryType::AutoReversalEarn => {
                account.balance = account.balance.saturating_sub(entry.points);
                account.accumulated = account.accumulated.saturating_sub(entry.points);
            }
            LedgerEntryType::AutoReversalRedeem => {
                account.balance += entry.points;
            }
        }
    }
    account
}
