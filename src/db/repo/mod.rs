//! Entity store over SQLite.
//!
//! Writes go through a [`StoreTx`], one per block, so the ledger engine can
//! commit or discard a whole block at once. Read-only lookups for the API run
//! directly against the pool. Row mapping lives in free functions over a
//! plain connection so both paths share it:
//! - `vaults.rs` - vaults, liquidity providers, queued withdrawals
//! - `rounds.rs` - option rounds, bids, buyer positions
//! - `blocks.rs` - indexed block headers and their applied events

mod blocks;
mod rounds;
mod vaults;

pub use blocks::IndexedBlock;

use crate::domain::{
    Address, Amount, Bid, BlockNumber, LiquidityProvider, OptionBuyer, OptionRound, QueuedWithdrawal,
    Vault,
};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{Row, Transaction};
use std::str::FromStr;

/// What a history-backed revert did to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restored {
    /// The key was not last written at the reverted block.
    Untouched,
    /// The value as of this earlier block is current again.
    Rewound(BlockNumber),
    /// No earlier value exists; the key was removed.
    Removed,
}

/// Decode a decimal TEXT column.
pub(crate) fn amount_col(row: &SqliteRow, col: &str) -> Result<Amount, sqlx::Error> {
    let raw: String = row.try_get(col)?;
    Amount::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

pub(crate) fn block_col(row: &SqliteRow, col: &str) -> Result<BlockNumber, sqlx::Error> {
    Ok(BlockNumber::from_i64(row.try_get::<i64, _>(col)?))
}

pub(crate) fn u64_col(row: &SqliteRow, col: &str) -> Result<u64, sqlx::Error> {
    let raw: i64 = row.try_get(col)?;
    u64::try_from(raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

/// Stored unsigned integers must fit SQLite's signed INTEGER.
pub(crate) fn u64_bind(value: u64, what: &str) -> Result<i64, sqlx::Error> {
    i64::try_from(value)
        .map_err(|_| sqlx::Error::Protocol(format!("{} {} exceeds INTEGER range", what, value)))
}

/// Repository for ledger state.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start the write transaction for one block.
    pub async fn begin(&self) -> Result<StoreTx, sqlx::Error> {
        Ok(StoreTx {
            tx: self.pool.begin().await?,
        })
    }

    /// Liveness probe for `/ready`.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Read-only lookups
    // =========================================================================

    pub async fn get_vault(&self, address: &Address) -> Result<Option<Vault>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        vaults::fetch_vault(&mut conn, address).await
    }

    pub async fn list_vault_addresses(&self) -> Result<Vec<Address>, sqlx::Error> {
        let rows = sqlx::query("SELECT address FROM vaults ORDER BY address")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| Address::new(r.get::<String, _>("address")))
            .collect())
    }

    pub async fn get_provider(
        &self,
        vault: &Address,
        provider: &Address,
    ) -> Result<Option<LiquidityProvider>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        vaults::fetch_provider(&mut conn, vault, provider).await
    }

    pub async fn get_queued(
        &self,
        provider: &Address,
        round: &Address,
    ) -> Result<Option<QueuedWithdrawal>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        vaults::fetch_queued(&mut conn, provider, round).await
    }

    pub async fn get_round(&self, address: &Address) -> Result<Option<OptionRound>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        rounds::fetch_round(&mut conn, address).await
    }

    /// Every known round as `(round, vault)`, for routing round-scoped events.
    pub async fn list_round_addresses(&self) -> Result<Vec<(Address, Address)>, sqlx::Error> {
        let rows = sqlx::query("SELECT address, vault_address FROM option_rounds ORDER BY address")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| {
                (
                    Address::new(r.get::<String, _>("address")),
                    Address::new(r.get::<String, _>("vault_address")),
                )
            })
            .collect())
    }

    /// A round's bids in clearing order.
    pub async fn list_bids(&self, round: &Address) -> Result<Vec<Bid>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        rounds::fetch_bids(&mut conn, round).await
    }

    pub async fn get_buyer(
        &self,
        round: &Address,
        buyer: &Address,
    ) -> Result<Option<OptionBuyer>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        rounds::fetch_buyer(&mut conn, round, buyer).await
    }

    /// Newest indexed block, if any.
    pub async fn latest_indexed_block(&self) -> Result<Option<IndexedBlock>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        blocks::fetch_latest(&mut conn).await
    }

    pub async fn get_indexed_block(
        &self,
        number: BlockNumber,
    ) -> Result<Option<IndexedBlock>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        blocks::fetch_block(&mut conn, number).await
    }
}

/// All reads and writes for one block.
///
/// Nothing is visible to other connections until [`StoreTx::commit`]; dropping
/// the handle without committing rolls everything back.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTx {
    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    pub(super) async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_dropped_tx_rolls_back() {
        let (repo, _temp) = setup_test_db().await;
        let vault = Vault::new(Address::new("0xv".to_string()), BlockNumber::new(3));

        {
            let mut tx = repo.begin().await.unwrap();
            tx.put_vault(&vault).await.unwrap();
            assert!(tx.get_vault(&vault.address).await.unwrap().is_some());
        }
        assert!(repo.get_vault(&vault.address).await.unwrap().is_none());

        let mut tx = repo.begin().await.unwrap();
        tx.put_vault(&vault).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(repo.get_vault(&vault.address).await.unwrap(), Some(vault));
    }

    #[tokio::test]
    async fn test_corrupt_amount_is_a_decode_error() {
        let (repo, _temp) = setup_test_db().await;
        sqlx::query(
            "INSERT INTO vaults (address, unlocked_balance, locked_balance, stashed_balance, latest_block)
             VALUES ('0xv', 'abc', '0', '0', 1)",
        )
        .execute(repo.pool())
        .await
        .unwrap();

        let err = repo
            .get_vault(&Address::new("0xv".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, sqlx::Error::ColumnDecode { .. }));
    }

    #[test]
    fn test_u64_bind_rejects_values_beyond_integer_range() {
        assert_eq!(u64_bind(42, "nonce").unwrap(), 42);
        let err = u64_bind(u64::MAX, "nonce").unwrap_err();
        match err {
            sqlx::Error::Protocol(msg) => assert!(msg.contains("nonce")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
