use futures::stream::{BoxStream, StreamExt};

use super::schema::{Database, WriteTxn};
use super::types::{Source, StoreError};

const SOURCE_COLUMNS: &str = "id, canonical_url, display_name, feed_url, auto_download";

impl WriteTxn {
    /// Insert a source. Fails with `DuplicateKey` if the id or feed URL is taken.
    pub async fn insert_source(&mut self, source: &Source) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sources (id, canonical_url, display_name, feed_url, auto_download)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&source.id)
        .bind(&source.canonical_url)
        .bind(&source.display_name)
        .bind(&source.feed_url)
        .bind(source.auto_download)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Delete a source together with its items and their search records.
    pub async fn delete_source(&mut self, source_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("source {source_id}")));
        }
        Ok(())
    }
}

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    pub async fn insert_source(&self, source: &Source) -> Result<(), StoreError> {
        let mut txn = self.begin_write().await?;
        txn.insert_source(source).await?;
        txn.commit().await
    }

    /// Delete a source; cascades to its items and search records.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no source has this id.
    pub async fn delete_source(&self, source_id: &str) -> Result<(), StoreError> {
        let mut txn = self.begin_write().await?;
        txn.delete_source(source_id).await?;
        txn.commit().await?;
        tracing::info!(source_id = %source_id, "Deleted source");
        Ok(())
    }

    pub async fn get_source(&self, source_id: &str) -> Result<Option<Source>, StoreError> {
        let source = sqlx::query_as::<_, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?"
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(source)
    }

    pub async fn get_source_by_feed_url(&self, feed_url: &str) -> Result<Option<Source>, StoreError> {
        let source = sqlx::query_as::<_, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE feed_url = ?"
        ))
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(source)
    }

    /// Lazily stream every source. Re-query to restart.
    pub fn stream_sources(&self) -> BoxStream<'_, Result<Source, StoreError>> {
        sqlx::query_as::<_, Source>(
            "SELECT id, canonical_url, display_name, feed_url, auto_download FROM sources ORDER BY id",
        )
        .fetch(&self.pool)
        .map(|row| row.map_err(StoreError::from))
        .boxed()
    }

    /// All sources ordered by display name.
    pub async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        let sources = sqlx::query_as::<_, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY display_name COLLATE NOCASE, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }
}
