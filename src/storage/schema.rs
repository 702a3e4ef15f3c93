use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the catalog. Cheap to clone; clones share the pool and the
/// write gate.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

/// A write transaction holding the store-level write gate.
///
/// Dropping it without [`WriteTxn::commit`] rolls the transaction back and
/// releases the gate.
pub struct WriteTxn {
    // Declared before the guard so the rollback happens while the gate is held.
    pub(crate) tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

impl WriteTxn {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process has the database
    /// locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `StoreError::Migration` if the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file with owner-only permissions before SQLite opens it
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if db_path.parent().is_some_and(|p| p.as_os_str().is_empty() || p.exists()) {
                // If creation fails, SQLite will report the error at connect_with.
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        // busy_timeout=5000: wait up to 5 seconds for another process's lock.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let db = Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        };
        db.migrate().await.map_err(|e| match StoreError::from_sqlx(e) {
            StoreError::Locked => StoreError::Locked,
            other => StoreError::Migration(other.to_string()),
        })?;
        Ok(db)
    }

    /// Begin a write transaction.
    ///
    /// SQLite allows one writer at a time, so writers within this process
    /// queue on the write gate instead of failing with SQLITE_BUSY.
    pub async fn begin_write(&self) -> Result<WriteTxn, StoreError> {
        let gate = Arc::clone(&self.write_gate).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTxn { tx, _gate: gate })
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                canonical_url TEXT NOT NULL,
                display_name TEXT NOT NULL,
                feed_url TEXT NOT NULL UNIQUE,
                auto_download INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                published_at INTEGER NOT NULL,
                source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                downloaded INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_published ON items(published_at)")
            .execute(&mut *tx)
            .await?;

        // items_by_source filters on source_id and sorts by published_at
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_source_published ON items(source_id, published_at)",
        )
        .execute(&mut *tx)
        .await?;

        // Search records: rowid mirrors items.rowid
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS items_fts
            USING fts5(id UNINDEXED, title, source_name)
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // FTS tables cannot carry foreign keys; this trigger also fires for
        // rows removed by the sources cascade.
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS items_fts_delete AFTER DELETE ON items BEGIN
                DELETE FROM items_fts WHERE rowid = old.rowid;
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_creates_schema() {
        let db = Database::open(":memory:").await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'trigger') ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"sources"));
        assert!(names.contains(&"items"));
        assert!(names.contains(&"items_fts"));
        assert!(names.contains(&"items_fts_delete"));
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = Database::open(":memory:").await.unwrap();
        let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_open_file_database_persists() {
        let dir = std::env::temp_dir().join("feedvault_schema_test_persist");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog.db");
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_str().unwrap();

        {
            let db = Database::open(path_str).await.unwrap();
            sqlx::query(
                "INSERT INTO sources (id, canonical_url, display_name, feed_url) VALUES ('a', '', 'A', 'u')",
            )
            .execute(&db.pool)
            .await
            .unwrap();
            db.pool.close().await;
        }

        let db = Database::open(path_str).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sources")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        db.pool.close().await;

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_dropped_write_txn_rolls_back_and_releases_gate() {
        let db = Database::open(":memory:").await.unwrap();
        {
            let mut txn = db.begin_write().await.unwrap();
            sqlx::query(
                "INSERT INTO sources (id, canonical_url, display_name, feed_url) VALUES ('a', '', 'A', 'u')",
            )
            .execute(&mut *txn.tx)
            .await
            .unwrap();
        }

        // Gate must be free again, and the insert must be gone
        let txn = db.begin_write().await.unwrap();
        txn.commit().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sources")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
