use futures::stream::{BoxStream, StreamExt};
use sqlx::QueryBuilder;

use super::schema::{Database, WriteTxn};
use super::types::{
    Item, ItemRow, ItemWithSource, ItemWithSourceRow, StoreError, ITEM_WITH_SOURCE_COLUMNS,
};

/// Upper bound on ids bound into a single `IN (...)` list.
const ID_BATCH_SIZE: usize = 500;

impl WriteTxn {
    /// Insert an item and its search record.
    ///
    /// Fails with `DuplicateKey` if the item id is already stored (nothing is
    /// written) and with `Integrity` if its source does not exist.
    pub async fn insert_item(&mut self, item: &Item) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO items (id, url, title, published_at, source_id, downloaded)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&item.url)
        .bind(&item.title)
        .bind(item.published_at.timestamp())
        .bind(&item.source_id)
        .bind(item.downloaded)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO items_fts (rowid, id, title, source_name)
            SELECT i.rowid, i.id, i.title, s.display_name
            FROM items i
            JOIN sources s ON s.id = i.source_id
            WHERE i.id = ?
        "#,
        )
        .bind(&item.id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

impl Database {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Insert a single item and its search record in one transaction.
    pub async fn insert_item(&self, item: &Item) -> Result<(), StoreError> {
        let mut txn = self.begin_write().await?;
        txn.insert_item(item).await?;
        txn.commit().await
    }

    /// Lazily stream every item with its source, oldest first.
    pub fn stream_items(&self) -> BoxStream<'_, Result<ItemWithSource, StoreError>> {
        sqlx::query_as::<_, ItemWithSourceRow>(
            "SELECT i.id, i.url, i.title, i.published_at, i.source_id, i.downloaded,
                    s.canonical_url AS s_canonical_url, s.display_name AS s_display_name,
                    s.feed_url AS s_feed_url, s.auto_download AS s_auto_download
             FROM items i
             JOIN sources s ON s.id = i.source_id
             ORDER BY i.published_at ASC, i.id",
        )
        .fetch(&self.pool)
        .map(|row| {
            row.map(ItemWithSourceRow::into_item_with_source)
                .map_err(StoreError::from)
        })
        .boxed()
    }

    /// All items with their sources, oldest first.
    pub async fn list_items(&self) -> Result<Vec<ItemWithSource>, StoreError> {
        let rows = sqlx::query_as::<_, ItemWithSourceRow>(&format!(
            "SELECT {ITEM_WITH_SOURCE_COLUMNS}
             FROM items i
             JOIN sources s ON s.id = i.source_id
             ORDER BY i.published_at ASC, i.id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(ItemWithSourceRow::into_item_with_source)
            .collect())
    }

    /// Items with the given ids, oldest first. Unknown ids are ignored.
    pub async fn items_by_id(&self, ids: &[String]) -> Result<Vec<ItemWithSource>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut items = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
                "SELECT {ITEM_WITH_SOURCE_COLUMNS} FROM items i \
                 JOIN sources s ON s.id = i.source_id WHERE i.id IN ("
            ));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");

            let rows: Vec<ItemWithSourceRow> = builder.build_query_as().fetch_all(&self.pool).await?;
            items.extend(rows.into_iter().map(ItemWithSourceRow::into_item_with_source));
        }

        items.sort_by(|a, b| {
            a.item
                .published_at
                .cmp(&b.item.published_at)
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        Ok(items)
    }

    /// Items owned by a source, oldest first.
    pub async fn items_by_source(&self, source_id: &str) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT id, url, title, published_at, source_id, downloaded
             FROM items
             WHERE source_id = ?
             ORDER BY published_at ASC, id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemRow::into_item).collect())
    }

    /// Items of every source with this display name, oldest first.
    pub async fn items_by_source_name(
        &self,
        name: &str,
    ) -> Result<Vec<ItemWithSource>, StoreError> {
        let rows = sqlx::query_as::<_, ItemWithSourceRow>(&format!(
            "SELECT {ITEM_WITH_SOURCE_COLUMNS}
             FROM items i
             JOIN sources s ON s.id = i.source_id
             WHERE s.display_name = ?
             ORDER BY i.published_at ASC, i.id"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(ItemWithSourceRow::into_item_with_source)
            .collect())
    }
}
