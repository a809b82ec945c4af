//! Database migrations and initialization.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

/// Open (creating if needed) the fight store, apply pragmas and the schema.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas_conn(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!(path = db_path, "Fight store ready");
    Ok(pool)
}

/// Apply `schema.sql`; every statement is idempotent.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let schema_sql = include_str!("schema.sql");

    for statement in schema_sql.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }

    debug!("Schema applied");
    Ok(())
}

/// Foreign keys, WAL and a busy timeout so several orchestrators can share the file.
async fn configure_pragmas_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    use sqlx::Row;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // The pragma answers with the mode actually in effect.
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);
    debug!(journal_mode = %journal_mode, "SQLite journal mode");

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

    async fn fresh_store() -> (SqlitePool, String, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/store.db").to_string_lossy().to_string();
        let pool = init_db(&path).await.expect("init_db failed");
        (pool, path, dir)
    }

    #[tokio::test]
    async fn test_store_is_created_with_parent_dirs() {
        let (pool, path, _dir) = fresh_store().await;
        assert!(Path::new(&path).exists());

        for table in ["fights", "reward_slots", "fighter_records"] {
            let (name,): (String,) =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                    .bind(table)
                    .fetch_one(&pool)
                    .await
                    .unwrap();
            assert_eq!(name, table);
        }
    }

    #[tokio::test]
    async fn test_schema_rejects_derived_status() {
        let (pool, _path, _dir) = fresh_store().await;
        let inserted = sqlx::query(
            "INSERT INTO fights (red_fighter, blue_fighter, payment_amount, payment_address, status, created_at)
             VALUES ('a', 'b', 1, 'addr', 'EXPIRED', 0)",
        )
        .execute(&pool)
        .await;
        assert!(inserted.is_err());
    }

    #[tokio::test]
    async fn test_incoming_output_binds_at_most_one_fight() {
        let (pool, _path, _dir) = fresh_store().await;
        let insert = "INSERT INTO fights (red_fighter, blue_fighter, payment_amount, payment_address, created_at, incoming_tx, incoming_index)
                      VALUES ('a', 'b', 1, 'addr', 0, 'tx', 0)";
        sqlx::query(insert).execute(&pool).await.unwrap();
        assert!(sqlx::query(insert).execute(&pool).await.is_err());
    }

    #[tokio::test]
    async fn test_reopening_keeps_rows_and_pragmas() {
        let (pool, path, _dir) = fresh_store().await;
        sqlx::query("INSERT INTO fighter_records (name, wins) VALUES ('Red001', 2)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let pool = init_db(&path).await.unwrap();
        let (wins,): (i64,) = sqlx::query_as("SELECT wins FROM fighter_records WHERE name = 'Red001'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(wins, 2);

        let (fk,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }
}
