//! Headers of applied blocks together with the exact events applied, so a
//! retracted block can be reverted without re-fetching it.

use crate::domain::{BlockNumber, LedgerEvent};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::{block_col, StoreTx};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedBlock {
    pub number: BlockNumber,
    pub hash: String,
    pub parent_hash: String,
    pub events: Vec<LedgerEvent>,
    pub indexed_at: DateTime<Utc>,
}

fn block_from_row(row: &SqliteRow) -> Result<IndexedBlock, sqlx::Error> {
    let events: String = row.try_get("events")?;
    let events = serde_json::from_str(&events).map_err(|e| sqlx::Error::ColumnDecode {
        index: "events".to_string(),
        source: Box::new(e),
    })?;
    let indexed_at: String = row.try_get("indexed_at")?;
    let indexed_at = DateTime::parse_from_rfc3339(&indexed_at)
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: "indexed_at".to_string(),
            source: Box::new(e),
        })?
        .with_timezone(&Utc);
    Ok(IndexedBlock {
        number: block_col(row, "block_number")?,
        hash: row.try_get("block_hash")?,
        parent_hash: row.try_get("parent_hash")?,
        events,
        indexed_at,
    })
}

pub(super) async fn fetch_latest(
    conn: &mut SqliteConnection,
) -> Result<Option<IndexedBlock>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT block_number, block_hash, parent_hash, events, indexed_at
        FROM indexed_blocks
        ORDER BY block_number DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(block_from_row).transpose()
}

pub(super) async fn fetch_block(
    conn: &mut SqliteConnection,
    number: BlockNumber,
) -> Result<Option<IndexedBlock>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT block_number, block_hash, parent_hash, events, indexed_at
        FROM indexed_blocks
        WHERE block_number = ?
        "#,
    )
    .bind(number.as_i64())
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(block_from_row).transpose()
}

impl StoreTx {
    pub async fn get_indexed_block(
        &mut self,
        number: BlockNumber,
    ) -> Result<Option<IndexedBlock>, sqlx::Error> {
        fetch_block(&mut self.tx, number).await
    }

    pub async fn put_indexed_block(&mut self, block: &IndexedBlock) -> Result<(), sqlx::Error> {
        let events = serde_json::to_string(&block.events)
            .map_err(|e| sqlx::Error::Protocol(format!("encoding block events: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO indexed_blocks (block_number, block_hash, parent_hash, events, indexed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(block.number.as_i64())
        .bind(&block.hash)
        .bind(&block.parent_hash)
        .bind(events)
        .bind(block.indexed_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn delete_indexed_block(&mut self, number: BlockNumber) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM indexed_blocks WHERE block_number = ?")
            .bind(number.as_i64())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::setup_test_db;
    use super::*;
    use crate::domain::{Address, Amount};

    #[tokio::test]
    async fn test_indexed_block_keeps_events() {
        let (repo, _temp) = setup_test_db().await;
        let block = IndexedBlock {
            number: BlockNumber::new(42),
            hash: "0x42".to_string(),
            parent_hash: "0x41".to_string(),
            events: vec![LedgerEvent::Deposit {
                vault: Address::new("0xv".to_string()),
                provider: Address::new("0xa".to_string()),
                provider_unlocked: Amount::from(100u64),
                vault_unlocked: Amount::from(100u64),
            }],
            indexed_at: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };

        let mut tx = repo.begin().await.unwrap();
        tx.put_indexed_block(&block).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(repo.latest_indexed_block().await.unwrap(), Some(block.clone()));

        let mut tx = repo.begin().await.unwrap();
        assert!(tx.delete_indexed_block(block.number).await.unwrap());
        tx.commit().await.unwrap();
        assert!(repo.get_indexed_block(block.number).await.unwrap().is_none());
    }
}
