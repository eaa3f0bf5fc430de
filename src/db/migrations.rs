//! Schema creation and connection setup.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

/// Open (creating if needed) the ledger database at `db_path` and bring the
/// schema up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .after_connect(|conn, _meta| Box::pin(async move { configure_connection(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    apply_schema(&pool).await?;

    info!(path = %db_path, "Ledger database ready");
    Ok(pool)
}

/// Execute `schema.sql` one statement at a time. Every statement is
/// `IF NOT EXISTS`, so this is safe to repeat.
async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let schema_sql = include_str!("schema.sql");
    let mut applied = 0usize;

    for statement in schema_sql.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
            applied += 1;
        }
    }

    debug!(statements = applied, "Schema applied");
    Ok(())
}

async fn configure_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    use sqlx::Row;

    // journal_mode reports the mode actually in effect
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);
    debug!(journal_mode = %journal_mode, "SQLite connection opened");

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_pool() -> (TempDir, SqlitePool) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("nested")
            .join("ledger.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        assert!(Path::new(&db_path).exists());
        (temp_dir, pool)
    }

    #[tokio::test]
    async fn test_schema_creates_ledger_tables() {
        let (_dir, pool) = temp_pool().await;

        let names: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .expect("query failed");
        let names: Vec<String> = names.into_iter().map(|(n,)| n).collect();

        for table in [
            "bids",
            "indexed_blocks",
            "liquidity_provider_history",
            "liquidity_providers",
            "option_buyers",
            "option_rounds",
            "queued_withdrawal_history",
            "queued_withdrawals",
            "vault_history",
            "vaults",
        ] {
            assert!(names.iter().any(|n| n == table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_schema_is_reapplicable() {
        let (_dir, pool) = temp_pool().await;
        apply_schema(&pool).await.expect("second run failed");
    }

    #[tokio::test]
    async fn test_busy_timeout_set() {
        let (_dir, pool) = temp_pool().await;
        let result: (i64,) = sqlx::query_as("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 5000);
    }
}
