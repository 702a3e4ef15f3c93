use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Catalog store errors.
///
/// `DuplicateKey` is the normal "already merged" signal for items and is
/// never reported to users as a failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database lock
    #[error("The catalog database is locked by another process. Please close it and try again.")]
    Locked,

    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A row with the same key already exists
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Referential integrity violation (e.g. an item for an unknown source)
    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Other(#[source] sqlx::Error),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey(_))
    }

    /// Classify a sqlx error by constraint kind or lock condition.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let message = db_err.message().to_string();
            if db_err.is_unique_violation() || message.contains("UNIQUE constraint failed") {
                return StoreError::DuplicateKey(message);
            }
            if db_err.is_foreign_key_violation()
                || message.contains("FOREIGN KEY constraint failed")
            {
                return StoreError::Integrity(message);
            }
        }

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        let error_string = err.to_string().to_lowercase();
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::Locked;
        }

        StoreError::Other(err)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::from_sqlx(err)
    }
}

// ============================================================================
// Search Index Report
// ============================================================================

/// Consistency of `items_fts` relative to `items`.
///
/// Orphaned entries are search records whose item is gone; missing entries
/// are items without a search record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConsistencyReport {
    pub items: i64,
    pub indexed: i64,
    pub orphaned: i64,
    pub missing: i64,
    pub is_consistent: bool,
}

// ============================================================================
// Data Structures
// ============================================================================

/// A followed feed or channel.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Source {
    pub id: String,
    pub canonical_url: String,
    pub display_name: String,
    pub feed_url: String,
    /// Reserved; always false for sources created by the engine.
    pub auto_download: bool,
}

/// A discovered piece of content. Never updated once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub source_id: String,
    /// Reserved.
    pub downloaded: bool,
}

/// An item joined with the source that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemWithSource {
    pub item: Item,
    pub source: Source,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub source_name: String,
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for `items` queries.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemRow {
    pub id: String,
    pub url: String,
    pub title: String,
    pub published_at: i64,
    pub source_id: String,
    pub downloaded: bool,
}

impl ItemRow {
    pub(crate) fn into_item(self) -> Item {
        Item {
            id: self.id,
            title: self.title,
            url: self.url,
            published_at: from_unix(self.published_at),
            source_id: self.source_id,
            downloaded: self.downloaded,
        }
    }
}

/// Internal row type for items joined with `sources` (columns prefixed `s_`).
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemWithSourceRow {
    pub id: String,
    pub url: String,
    pub title: String,
    pub published_at: i64,
    pub source_id: String,
    pub downloaded: bool,
    pub s_canonical_url: String,
    pub s_display_name: String,
    pub s_feed_url: String,
    pub s_auto_download: bool,
}

impl ItemWithSourceRow {
    pub(crate) fn into_item_with_source(self) -> ItemWithSource {
        let source = Source {
            id: self.source_id.clone(),
            canonical_url: self.s_canonical_url,
            display_name: self.s_display_name,
            feed_url: self.s_feed_url,
            auto_download: self.s_auto_download,
        };
        let item = Item {
            id: self.id,
            title: self.title,
            url: self.url,
            published_at: from_unix(self.published_at),
            source_id: self.source_id,
            downloaded: self.downloaded,
        };
        ItemWithSource { item, source }
    }
}

/// Column list matching [`ItemWithSourceRow`]; expects `items i JOIN sources s`.
pub(crate) const ITEM_WITH_SOURCE_COLUMNS: &str = "i.id, i.url, i.title, i.published_at, \
     i.source_id, i.downloaded, s.canonical_url AS s_canonical_url, \
     s.display_name AS s_display_name, s.feed_url AS s_feed_url, \
     s.auto_download AS s_auto_download";

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
