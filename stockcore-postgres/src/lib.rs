//! `PostgreSQL` ledger store for `StockCore`
//!
//! Implements the `LedgerStore` trait over a `sqlx` connection pool. The
//! stock upsert and the movement append run inside a single database
//! transaction with the stock row locked `FOR UPDATE`, so the commit is
//! atomic even across multiple processes sharing the database, and the
//! expected-revision check turns any writer that bypassed the applier's key
//! lock into a conflict instead of a lost update.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nutype::nutype;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{query, PgPool, Postgres, Row, Transaction};
use stockcore::errors::{StoreError, StoreResult};
use stockcore::movement::{MovementKind, MovementRecord, Reference};
use stockcore::stock::{ExpectedRevision, StockRecord, StockWrite};
use stockcore::store::{LedgerStore, MovementFilter};
use stockcore::types::{
    BinId, MovementId, ProductId, Revision, StockKey, Timestamp, WarehouseId,
};
use tracing::{debug, instrument};

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying
/// type.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the `PostgresLedgerStore` connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 = match std::num::NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// `LedgerStore` implementation backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Create a new store with the default pool configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> StoreResult<Self> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Create a new store with a custom pool configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> StoreResult<Self> {
        let connection_string = connection_string.into();
        let max_connections: std::num::NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(|error| StoreError::Unavailable(error.to_string()))?;
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool.
    ///
    /// Use this when you need full control over pool configuration or want
    /// to share a pool across multiple components.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|error| StoreError::Configuration(error.to_string()))
    }

    /// Verify the database connection is usable.
    pub async fn ping(&self) -> StoreResult<()> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

/// Database row representing a stock record.
#[derive(Debug)]
struct StockRow {
    product_id: String,
    warehouse_id: String,
    bin_id: Option<String>,
    on_hand: i64,
    reserved: i64,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<&PgRow> for StockRow {
    type Error = sqlx::Error;

    fn try_from(row: &PgRow) -> Result<Self, Self::Error> {
        Ok(Self {
            product_id: row.try_get("product_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            bin_id: row.try_get("bin_id")?,
            on_hand: row.try_get("on_hand")?,
            reserved: row.try_get("reserved")?,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StockRow {
    fn into_record(self) -> StoreResult<StockRecord> {
        let key = StockKey::new(
            ProductId::try_new(self.product_id)
                .map_err(|e| StoreError::Corrupted(e.to_string()))?,
            WarehouseId::try_new(self.warehouse_id)
                .map_err(|e| StoreError::Corrupted(e.to_string()))?,
            self.bin_id
                .map(|bin| BinId::try_new(bin).map_err(|e| StoreError::Corrupted(e.to_string())))
                .transpose()?,
        );
        Ok(StockRecord {
            key,
            on_hand: quantity_from_db(self.on_hand, "on_hand")?,
            reserved: quantity_from_db(self.reserved, "reserved")?,
            revision: revision_from_db(self.revision)?,
            created_at: Timestamp::new(self.created_at),
            updated_at: Timestamp::new(self.updated_at),
        })
    }
}

/// Database row representing a movement record.
#[derive(Debug)]
struct MovementRow {
    movement_id: uuid::Uuid,
    product_id: String,
    quantity: i64,
    movement_kind: String,
    from_warehouse_id: Option<String>,
    from_bin_id: Option<String>,
    to_warehouse_id: Option<String>,
    to_bin_id: Option<String>,
    reference_kind: Option<String>,
    reference_id: Option<String>,
    notes: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<&PgRow> for MovementRow {
    type Error = sqlx::Error;

    fn try_from(row: &PgRow) -> Result<Self, Self::Error> {
        Ok(Self {
            movement_id: row.try_get("movement_id")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            movement_kind: row.try_get("movement_kind")?,
            from_warehouse_id: row.try_get("from_warehouse_id")?,
            from_bin_id: row.try_get("from_bin_id")?,
            to_warehouse_id: row.try_get("to_warehouse_id")?,
            to_bin_id: row.try_get("to_bin_id")?,
            reference_kind: row.try_get("reference_kind")?,
            reference_id: row.try_get("reference_id")?,
            notes: row.try_get("notes")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

impl MovementRow {
    fn into_record(self) -> StoreResult<MovementRecord> {
        let corrupted = |e: &dyn std::fmt::Display| StoreError::Corrupted(e.to_string());
        let reference = match (self.reference_kind, self.reference_id) {
            (Some(kind), Some(id)) => Some(Reference::new(kind, id)),
            (None, None) => None,
            _ => {
                return Err(StoreError::Corrupted(
                    "movement reference must set both kind and id".to_string(),
                ))
            }
        };
        Ok(MovementRecord {
            id: MovementId::try_new(self.movement_id).map_err(|e| corrupted(&e))?,
            product: ProductId::try_new(self.product_id).map_err(|e| corrupted(&e))?,
            quantity: quantity_from_db(self.quantity, "quantity")?,
            kind: MovementKind::try_from(self.movement_kind).map_err(|e| corrupted(&e))?,
            from_warehouse: self
                .from_warehouse_id
                .map(|w| WarehouseId::try_new(w).map_err(|e| corrupted(&e)))
                .transpose()?,
            from_bin: self
                .from_bin_id
                .map(|b| BinId::try_new(b).map_err(|e| corrupted(&e)))
                .transpose()?,
            to_warehouse: self
                .to_warehouse_id
                .map(|w| WarehouseId::try_new(w).map_err(|e| corrupted(&e)))
                .transpose()?,
            to_bin: self
                .to_bin_id
                .map(|b| BinId::try_new(b).map_err(|e| corrupted(&e)))
                .transpose()?,
            reference,
            notes: self.notes,
            recorded_at: Timestamp::new(self.recorded_at),
        })
    }
}

fn quantity_from_db(value: i64, column: &str) -> StoreResult<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::Corrupted(format!("negative {column} in database: {value}")))
}

fn revision_from_db(value: i64) -> StoreResult<Revision> {
    let value = u64::try_from(value)
        .map_err(|_| StoreError::Corrupted(format!("negative revision in database: {value}")))?;
    Revision::try_new(value).map_err(|e| StoreError::Corrupted(e.to_string()))
}

fn quantity_to_db(value: u64, column: &str) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| {
        StoreError::Serialization(format!("{column} value {value} exceeds BIGINT range"))
    })
}

fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable("connection pool timed out".to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupted(error.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(sqlx::error::DatabaseError::code)
        .is_some_and(|code| code == "23505")
}

async fn select_current_for_update(
    tx: &mut Transaction<'_, Postgres>,
    key: &StockKey,
) -> StoreResult<Option<StockRow>> {
    let row = query(
        "SELECT product_id, warehouse_id, bin_id, on_hand, reserved, revision, created_at, updated_at
         FROM stock_levels
         WHERE product_id = $1 AND warehouse_id = $2 AND bin_id IS NOT DISTINCT FROM $3
         FOR UPDATE",
    )
    .bind(key.product.as_ref())
    .bind(key.warehouse.as_ref())
    .bind(key.bin.as_deref())
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    row.as_ref().map(StockRow::try_from).transpose().map_err(map_sqlx_error)
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(name = "postgres.stock", skip(self), fields(key = %key))]
    async fn stock(&self, key: &StockKey) -> StoreResult<Option<StockRecord>> {
        let row = query(
            "SELECT product_id, warehouse_id, bin_id, on_hand, reserved, revision, created_at, updated_at
             FROM stock_levels
             WHERE product_id = $1 AND warehouse_id = $2 AND bin_id IS NOT DISTINCT FROM $3",
        )
        .bind(key.product.as_ref())
        .bind(key.warehouse.as_ref())
        .bind(key.bin.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref()
            .map(StockRow::try_from)
            .transpose()
            .map_err(map_sqlx_error)?
            .map(StockRow::into_record)
            .transpose()
    }

    #[instrument(name = "postgres.commit", skip(self, write, movement), fields(key = %write.key))]
    async fn commit(
        &self,
        write: StockWrite,
        movement: MovementRecord,
    ) -> StoreResult<StockRecord> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let current = select_current_for_update(&mut tx, &write.key).await?;
        let current_revision = match &current {
            Some(row) => revision_from_db(row.revision)?,
            None => Revision::initial(),
        };

        match write.expected {
            ExpectedRevision::Absent if current.is_some() => {
                return Err(StoreError::RevisionConflict {
                    key: write.key,
                    expected: ExpectedRevision::Absent,
                    current: current_revision,
                });
            }
            ExpectedRevision::At(expected)
                if current.is_none() || current_revision != expected =>
            {
                return Err(StoreError::RevisionConflict {
                    key: write.key,
                    expected: ExpectedRevision::At(expected),
                    current: current_revision,
                });
            }
            _ => {}
        }

        let on_hand = quantity_to_db(write.on_hand, "on_hand")?;
        let reserved = write
            .reserved
            .map(|r| quantity_to_db(r, "reserved"))
            .transpose()?;

        let committed_row = if current.is_some() {
            query(
                "UPDATE stock_levels
                 SET on_hand = $4, reserved = COALESCE($5, reserved),
                     revision = revision + 1, updated_at = NOW()
                 WHERE product_id = $1 AND warehouse_id = $2 AND bin_id IS NOT DISTINCT FROM $3
                 RETURNING product_id, warehouse_id, bin_id, on_hand, reserved, revision, created_at, updated_at",
            )
            .bind(write.key.product.as_ref())
            .bind(write.key.warehouse.as_ref())
            .bind(write.key.bin.as_deref())
            .bind(on_hand)
            .bind(reserved)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
        } else {
            // Two writers may both observe an absent row; the partial unique
            // index turns the loser's insert into a conflict.
            query(
                "INSERT INTO stock_levels
                     (product_id, warehouse_id, bin_id, on_hand, reserved, revision, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, COALESCE($5, 0), 1, NOW(), NOW())
                 RETURNING product_id, warehouse_id, bin_id, on_hand, reserved, revision, created_at, updated_at",
            )
            .bind(write.key.product.as_ref())
            .bind(write.key.warehouse.as_ref())
            .bind(write.key.bin.as_deref())
            .bind(on_hand)
            .bind(reserved)
            .fetch_one(&mut *tx)
            .await
            .map_err(|error| {
                if is_unique_violation(&error) {
                    StoreError::RevisionConflict {
                        key: write.key.clone(),
                        expected: write.expected,
                        current: Revision::initial(),
                    }
                } else {
                    map_sqlx_error(error)
                }
            })?
        };

        let quantity = quantity_to_db(movement.quantity, "quantity")?;
        query(
            "INSERT INTO stock_movements
                 (movement_id, product_id, quantity, movement_kind,
                  from_warehouse_id, from_bin_id, to_warehouse_id, to_bin_id,
                  reference_kind, reference_id, notes, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(*movement.id)
        .bind(movement.product.as_ref())
        .bind(quantity)
        .bind(movement.kind.as_str())
        .bind(movement.from_warehouse.as_deref())
        .bind(movement.from_bin.as_deref())
        .bind(movement.to_warehouse.as_deref())
        .bind(movement.to_bin.as_deref())
        .bind(movement.reference.as_ref().map(|r| r.kind.as_str()))
        .bind(movement.reference.as_ref().map(|r| r.id.as_str()))
        .bind(movement.notes.as_deref())
        .bind(movement.recorded_at.into_datetime())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        let record = StockRow::try_from(&committed_row)
            .map_err(map_sqlx_error)?
            .into_record()?;
        debug!(key = %record.key, on_hand = record.on_hand, "commit applied");
        Ok(record)
    }

    #[instrument(name = "postgres.movements", skip(self, filter))]
    async fn movements(&self, filter: &MovementFilter) -> StoreResult<Vec<MovementRecord>> {
        let limit = filter
            .limit
            .map(|l| {
                i64::try_from(l).map_err(|_| {
                    StoreError::Serialization(format!("limit {l} exceeds BIGINT range"))
                })
            })
            .transpose()?;
        let key = filter.key.as_ref();

        let rows = query(
            "SELECT movement_id, product_id, quantity, movement_kind,
                    from_warehouse_id, from_bin_id, to_warehouse_id, to_bin_id,
                    reference_kind, reference_id, notes, recorded_at
             FROM stock_movements
             WHERE ($1::TEXT IS NULL OR product_id = $1)
               AND ($2::TEXT IS NULL OR from_warehouse_id = $2 OR to_warehouse_id = $2)
               AND ($3::TEXT IS NULL OR movement_kind = $3)
               AND ($4::TIMESTAMPTZ IS NULL OR recorded_at >= $4)
               AND ($5::TEXT IS NULL OR (product_id = $5
                    AND ((from_warehouse_id = $6 AND from_bin_id IS NOT DISTINCT FROM $7)
                      OR (to_warehouse_id = $6 AND to_bin_id IS NOT DISTINCT FROM $7))))
             ORDER BY recorded_at, movement_id
             LIMIT $8",
        )
        .bind(filter.product.as_deref())
        .bind(filter.warehouse.as_deref())
        .bind(filter.kind.as_ref().map(MovementKind::as_str))
        .bind(filter.since.map(Timestamp::into_datetime))
        .bind(key.map(|k| k.product.as_ref()))
        .bind(key.map(|k| k.warehouse.as_ref()))
        .bind(key.and_then(|k| k.bin.as_deref()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                MovementRow::try_from(row)
                    .map_err(map_sqlx_error)?
                    .into_record()
            })
            .collect()
    }

    #[instrument(name = "postgres.snapshot", skip(self))]
    async fn snapshot(&self) -> StoreResult<Vec<StockRecord>> {
        let rows = query(
            "SELECT product_id, warehouse_id, bin_id, on_hand, reserved, revision, created_at, updated_at
             FROM stock_levels
             ORDER BY product_id, warehouse_id, bin_id NULLS FIRST",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                StockRow::try_from(row)
                    .map_err(map_sqlx_error)?
                    .into_record()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sensible() {
        let config = PostgresConfig::default();
        let max: std::num::NonZeroU32 = config.max_connections.into();
        assert_eq!(max.get(), 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn quantity_conversions_reject_out_of_range_values() {
        assert!(quantity_from_db(-1, "on_hand").is_err());
        assert_eq!(quantity_from_db(42, "on_hand").unwrap(), 42);
        assert!(quantity_to_db(u64::MAX, "on_hand").is_err());
        assert_eq!(quantity_to_db(42, "on_hand").unwrap(), 42);
    }

    #[test]
    fn revision_conversion_rejects_negative_values() {
        assert!(revision_from_db(-5).is_err());
        let revision = revision_from_db(3).unwrap();
        let value: u64 = revision.into();
        assert_eq!(value, 3);
    }
}
