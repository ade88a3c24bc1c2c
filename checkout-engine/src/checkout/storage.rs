//! redb-based storage layer for the checkout pipeline
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_id` | `OrderSnapshot` | Draft and settled orders |
//! | `session_drafts` | `session_id` | `order_id` | Session → pending draft index |
//! | `carts` | `user_id` | `Vec<CartLine>` | Shopping carts |
//! | `reward_ledger` | `(user_id, seq)` | `RewardLedgerEntry` | Append-only point ledger |
//! | `reward_accounts` | `user_id` | `RewardAccount` | Cached ledger aggregates |
//! | `inventory` | `(product_id, color, size)` | `InventoryUnit` | Sellable variants |
//! | `stock_movements` | `seq` | `StockMovement` | Signed stock audit log |
//! | `promotions` | `promotion_id` | `Promotion` | Campaign + targeted promotions |
//! | `promo_redemptions` | `(promotion_id, user_id)` | `()` | Per-user targeted-use flag |
//! | `deliveries` | `order_id` | `DeliveryRecord` | Delivery records |
//! | `processed_captures` | `external_payment_id` | `order_id` | Settlement idempotency |
//! | `counters` | name | `u64` | Ledger / movement sequences |
//!
//! # Atomicity
//!
//! Every command runs inside a single write transaction. Commit publishes
//! all of its writes at once; dropping the transaction without commit
//! discards them. redb admits one writer at a time, so settlement and
//! cancellation of the same order serialize here.

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use shared::checkout::{
    CartLine, DeliveryRecord, InventoryUnit, OrderSnapshot, Promotion, RewardAccount,
    RewardLedgerEntry, StockMovement,
};

/// key = order_id, value = JSON-serialized OrderSnapshot
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// key = session_id, value = order_id of the session's pending draft
const SESSION_DRAFTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("session_drafts");

/// key = user_id, value = JSON-serialized Vec<CartLine>
const CARTS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("carts");

/// key = (user_id, seq), value = JSON-serialized RewardLedgerEntry.
/// seq is globally increasing, so a range scan yields entries in write order.
const LEDGER_TABLE: TableDefinition<(i64, u64), &[u8]> = TableDefinition::new("reward_ledger");

/// key = user_id, value = JSON-serialized RewardAccount
const ACCOUNTS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("reward_accounts");

/// key = (product_id, color_name, size), value = JSON-serialized InventoryUnit
const INVENTORY_TABLE: TableDefinition<(i64, &str, &str), &[u8]> =
    TableDefinition::new("inventory");

/// key = movement seq, value = JSON-serialized StockMovement
const MOVEMENTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("stock_movements");

/// key = promotion_id, value = JSON-serialized Promotion
const PROMOTIONS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("promotions");

/// key = (promotion_id, user_id), value = empty (per-user targeted redemption flag)
const PROMO_REDEMPTIONS_TABLE: TableDefinition<(i64, i64), ()> =
    TableDefinition::new("promo_redemptions");

/// key = order_id, value = JSON-serialized DeliveryRecord
const DELIVERIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("deliveries");

/// key = external_payment_id, value = order_id (webhook idempotency)
const PROCESSED_CAPTURES_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("processed_captures");

/// key = counter name, value = u64
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const LEDGER_SEQ_KEY: &str = "ledger_seq";
const MOVEMENT_SEQ_KEY: &str = "movement_seq";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Checkout storage backed by redb
#[derive(Clone)]
pub struct CheckoutStorage {
    db: Arc<Database>,
}

impl CheckoutStorage {
    /// Open or create the database at the given path.
    ///
    /// redb commits with `Durability::Immediate`: once `commit()` returns
    /// the writes survive power loss, and the file is always in a
    /// consistent state (copy-on-write with atomic pointer swap).
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (tests and benchmarks)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        // Create all tables up front so read transactions never see a
        // missing table
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(SESSION_DRAFTS_TABLE)?;
            let _ = write_txn.open_table(CARTS_TABLE)?;
            let _ = write_txn.open_table(LEDGER_TABLE)?;
            let _ = write_txn.open_table(ACCOUNTS_TABLE)?;
            let _ = write_txn.open_table(INVENTORY_TABLE)?;
            let _ = write_txn.open_table(MOVEMENTS_TABLE)?;
            let _ = write_txn.open_table(PROMOTIONS_TABLE)?;
            let _ = write_txn.open_table(PROMO_REDEMPTIONS_TABLE)?;
            let _ = write_txn.open_table(DELIVERIES_TABLE)?;
            let _ = write_txn.open_table(PROCESSED_CAPTURES_TABLE)?;
            let mut counters = write_txn.open_table(COUNTERS_TABLE)?;
            if counters.get(LEDGER_SEQ_KEY)?.is_none() {
                counters.insert(LEDGER_SEQ_KEY, 0u64)?;
            }
            if counters.get(MOVEMENT_SEQ_KEY)?.is_none() {
                counters.insert(MOVEMENT_SEQ_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> StorageResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    fn next_counter(&self, txn: &WriteTransaction, key: &str) -> StorageResult<u64> {
        let mut table = txn.open_table(COUNTERS_TABLE)?;
        let next = table.get(key)?.map(|g| g.value()).unwrap_or(0) + 1;
        table.insert(key, next)?;
        Ok(next)
    }

    // ========== Orders ==========

    pub fn store_order_txn(
        &self,
        txn: &WriteTransaction,
        snapshot: &OrderSnapshot,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let value = serde_json::to_vec(snapshot)?;
        table.insert(snapshot.order_id.as_str(), value.as_slice())?;
        Ok(())
    }

    pub fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
    ) -> StorageResult<Option<OrderSnapshot>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_order(&self, order_id: &str) -> StorageResult<Option<OrderSnapshot>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn delete_order_txn(&self, txn: &WriteTransaction, order_id: &str) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        table.remove(order_id)?;
        Ok(())
    }

    // ========== Session draft index ==========

    pub fn get_session_draft_txn(
        &self,
        txn: &WriteTransaction,
        session_id: &str,
    ) -> StorageResult<Option<String>> {
        let table = txn.open_table(SESSION_DRAFTS_TABLE)?;
        Ok(table.get(session_id)?.map(|g| g.value().to_string()))
    }

    pub fn get_session_draft(&self, session_id: &str) -> StorageResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSION_DRAFTS_TABLE)?;
        Ok(table.get(session_id)?.map(|g| g.value().to_string()))
    }

    pub fn set_session_draft_txn(
        &self,
        txn: &WriteTransaction,
        session_id: &str,
        order_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(SESSION_DRAFTS_TABLE)?;
        table.insert(session_id, order_id)?;
        Ok(())
    }

    pub fn clear_session_draft_txn(
        &self,
        txn: &WriteTransaction,
        session_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(SESSION_DRAFTS_TABLE)?;
        table.remove(session_id)?;
        Ok(())
    }

    // ========== Carts ==========

    pub fn get_cart_txn(
        &self,
        txn: &WriteTransaction,
        user_id: i64,
    ) -> StorageResult<Vec<CartLine>> {
        let table = txn.open_table(CARTS_TABLE)?;
        match table.get(user_id)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Ok(Vec::new()),
        }
    }

    pub fn get_cart(&self, user_id: i64) -> StorageResult<Vec<CartLine>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CARTS_TABLE)?;
        match table.get(user_id)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Ok(Vec::new()),
        }
    }

    pub fn store_cart_txn(
        &self,
        txn: &WriteTransaction,
        user_id: i64,
        lines: &[CartLine],
    ) -> StorageResult<()> {
        let mut table = txn.open_table(CARTS_TABLE)?;
        let value = serde_json::to_vec(lines)?;
        table.insert(user_id, value.as_slice())?;
        Ok(())
    }

    pub fn clear_cart_txn(&self, txn: &WriteTransaction, user_id: i64) -> StorageResult<()> {
        let mut table = txn.open_table(CARTS_TABLE)?;
        table.remove(user_id)?;
        Ok(())
    }

    // ========== Reward ledger ==========

    /// Append a ledger entry. Entries are keyed by a globally increasing
    /// sequence so per-user scans come back in write order.
    pub fn append_ledger_txn(
        &self,
        txn: &WriteTransaction,
        entry: &RewardLedgerEntry,
    ) -> StorageResult<u64> {
        let seq = self.next_counter(txn, LEDGER_SEQ_KEY)?;
        let mut table = txn.open_table(LEDGER_TABLE)?;
        let value = serde_json::to_vec(entry)?;
        table.insert((entry.user_id, seq), value.as_slice())?;
        Ok(seq)
    }

    pub fn ledger_for_user_txn(
        &self,
        txn: &WriteTransaction,
        user_id: i64,
    ) -> StorageResult<Vec<RewardLedgerEntry>> {
        let table = txn.open_table(LEDGER_TABLE)?;
        let mut entries = Vec::new();
        for row in table.range((user_id, 0u64)..=(user_id, u64::MAX))? {
            let (_, value) = row?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    pub fn ledger_for_user(&self, user_id: i64) -> StorageResult<Vec<RewardLedgerEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEDGER_TABLE)?;
        let mut entries = Vec::new();
        for row in table.range((user_id, 0u64)..=(user_id, u64::MAX))? {
            let (_, value) = row?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    // ========== Reward accounts ==========

    pub fn get_account_txn(
        &self,
        txn: &WriteTransaction,
        user_id: i64,
    ) -> StorageResult<Option<RewardAccount>> {
        let table = txn.open_table(ACCOUNTS_TABLE)?;
        match table.get(user_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_account(&self, user_id: i64) -> StorageResult<Option<RewardAccount>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS_TABLE)?;
        match table.get(user_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn store_account_txn(
        &self,
        txn: &WriteTransaction,
        account: &RewardAccount,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ACCOUNTS_TABLE)?;
        let value = serde_json::to_vec(account)?;
        table.insert(account.user_id, value.as_slice())?;
        Ok(())
    }

    // ========== Inventory ==========

    pub fn get_unit_txn(
        &self,
        txn: &WriteTransaction,
        product_id: i64,
        color_name: &str,
        size: &str,
    ) -> StorageResult<Option<InventoryUnit>> {
        let table = txn.open_table(INVENTORY_TABLE)?;
        match table.get((product_id, color_name, size))? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Resolve a cart line to its inventory unit.
    ///
    /// A line with an explicit color must match it exactly. A line without
    /// one resolves to the product's default-color unit of the same size.
    pub fn resolve_unit_txn(
        &self,
        txn: &WriteTransaction,
        product_id: i64,
        color_name: Option<&str>,
        size: &str,
    ) -> StorageResult<Option<InventoryUnit>> {
        if let Some(color) = color_name {
            return self.get_unit_txn(txn, product_id, color, size);
        }
        let table = txn.open_table(INVENTORY_TABLE)?;
        for row in table.range((product_id, "", "")..)? {
            let (key, value) = row?;
            if key.value().0 != product_id {
                break;
            }
            let unit: InventoryUnit = serde_json::from_slice(value.value())?;
            if unit.is_default_color && unit.size == size {
                return Ok(Some(unit));
            }
        }
        Ok(None)
    }

    pub fn store_unit_txn(
        &self,
        txn: &WriteTransaction,
        unit: &InventoryUnit,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(INVENTORY_TABLE)?;
        let value = serde_json::to_vec(unit)?;
        table.insert(
            (unit.product_id, unit.color_name.as_str(), unit.size.as_str()),
            value.as_slice(),
        )?;
        Ok(())
    }

    pub fn get_unit(
        &self,
        product_id: i64,
        color_name: &str,
        size: &str,
    ) -> StorageResult<Option<InventoryUnit>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INVENTORY_TABLE)?;
        match table.get((product_id, color_name, size))? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    // ========== Stock movements ==========

    pub fn append_movement_txn(
        &self,
        txn: &WriteTransaction,
        movement: &StockMovement,
    ) -> StorageResult<u64> {
        let seq = self.next_counter(txn, MOVEMENT_SEQ_KEY)?;
        let mut table = txn.open_table(MOVEMENTS_TABLE)?;
        let value = serde_json::to_vec(movement)?;
        table.insert(seq, value.as_slice())?;
        Ok(seq)
    }

    /// All movements referencing an order, in write order
    pub fn movements_for_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
    ) -> StorageResult<Vec<StockMovement>> {
        let table = txn.open_table(MOVEMENTS_TABLE)?;
        let mut movements = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            let movement: StockMovement = serde_json::from_slice(value.value())?;
            if movement.ref_order_id == order_id {
                movements.push(movement);
            }
        }
        Ok(movements)
    }

    /// All movements referencing an order, in write order
    pub fn movements_for_order(&self, order_id: &str) -> StorageResult<Vec<StockMovement>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MOVEMENTS_TABLE)?;
        let mut movements = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            let movement: StockMovement = serde_json::from_slice(value.value())?;
            if movement.ref_order_id == order_id {
                movements.push(movement);
            }
        }
        Ok(movements)
    }

    // ========== Promotions ==========

    pub fn get_promotion_txn(
        &self,
        txn: &WriteTransaction,
        promotion_id: i64,
    ) -> StorageResult<Option<Promotion>> {
        let table = txn.open_table(PROMOTIONS_TABLE)?;
        match table.get(promotion_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_promotion(&self, promotion_id: i64) -> StorageResult<Option<Promotion>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PROMOTIONS_TABLE)?;
        match table.get(promotion_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn store_promotion_txn(
        &self,
        txn: &WriteTransaction,
        promotion: &Promotion,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PROMOTIONS_TABLE)?;
        let value = serde_json::to_vec(promotion)?;
        table.insert(promotion.id, value.as_slice())?;
        Ok(())
    }

    pub fn list_promotions_txn(&self, txn: &WriteTransaction) -> StorageResult<Vec<Promotion>> {
        let table = txn.open_table(PROMOTIONS_TABLE)?;
        let mut promotions = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            promotions.push(serde_json::from_slice(value.value())?);
        }
        Ok(promotions)
    }

    // ========== Per-user targeted redemptions ==========

    pub fn has_promo_redemption_txn(
        &self,
        txn: &WriteTransaction,
        promotion_id: i64,
        user_id: i64,
    ) -> StorageResult<bool> {
        let table = txn.open_table(PROMO_REDEMPTIONS_TABLE)?;
        Ok(table.get((promotion_id, user_id))?.is_some())
    }

    pub fn mark_promo_redemption_txn(
        &self,
        txn: &WriteTransaction,
        promotion_id: i64,
        user_id: i64,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PROMO_REDEMPTIONS_TABLE)?;
        table.insert((promotion_id, user_id), ())?;
        Ok(())
    }

    pub fn clear_promo_redemption_txn(
        &self,
        txn: &WriteTransaction,
        promotion_id: i64,
        user_id: i64,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PROMO_REDEMPTIONS_TABLE)?;
        table.remove((promotion_id, user_id))?;
        Ok(())
    }

    // ========== Deliveries ==========

    pub fn has_delivery_txn(&self, txn: &WriteTransaction, order_id: &str) -> StorageResult<bool> {
        let table = txn.open_table(DELIVERIES_TABLE)?;
        Ok(table.get(order_id)?.is_some())
    }

    pub fn store_delivery_txn(
        &self,
        txn: &WriteTransaction,
        record: &DeliveryRecord,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(DELIVERIES_TABLE)?;
        let value = serde_json::to_vec(record)?;
        table.insert(record.order_id.as_str(), value.as_slice())?;
        Ok(())
    }

    pub fn get_delivery(&self, order_id: &str) -> StorageResult<Option<DeliveryRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DELIVERIES_TABLE)?;
        match table.get(order_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    // ========== Processed captures (webhook idempotency) ==========

    /// The order a capture id already settled, if any
    pub fn capture_processed_txn(
        &self,
        txn: &WriteTransaction,
        external_payment_id: &str,
    ) -> StorageResult<Option<String>> {
        let table = txn.open_table(PROCESSED_CAPTURES_TABLE)?;
        Ok(table.get(external_payment_id)?.map(|g| g.value().to_string()))
    }

    pub fn capture_processed(&self, external_payment_id: &str) -> StorageResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PROCESSED_CAPTURES_TABLE)?;
        Ok(table.get(external_payment_id)?.map(|g| g.value().to_string()))
    }

    pub fn mark_capture_processed_txn(
        &self,
        txn: &WriteTransaction,
        external_payment_id: &str,
        order_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PROCESSED_CAPTURES_TABLE)?;
        table.insert(external_payment_id, order_id)?;
        Ok(())
    }
}
