use thiserror::Error;

use super::schema::Database;
use super::types::{IndexConsistencyReport, SearchHit, StoreError};

// ============================================================================
// FTS5 Query Validation
// ============================================================================

const MAX_QUERY_LENGTH: usize = 256;
const MAX_WILDCARDS: usize = 3;
const MAX_OR_OPERATORS: usize = 5;
const MAX_PARENTHESES: usize = 5;
const MAX_AND_OPERATORS: usize = 10;

/// Maximum number of hits returned by a single search
const MAX_RESULTS: i64 = 500;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search query too complex: {0}")]
    QueryTooComplex(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for SearchError {
    fn from(err: sqlx::Error) -> Self {
        SearchError::Store(StoreError::from_sqlx(err))
    }
}

/// Bound FTS5 query complexity so wildcard expansion and nested groups stay cheap.
fn validate_fts_query(query: &str) -> Result<(), SearchError> {
    let too_complex = |msg: String| -> Result<(), SearchError> { Err(SearchError::QueryTooComplex(msg)) };

    if query.chars().count() > MAX_QUERY_LENGTH {
        return too_complex(format!(
            "exceeds maximum length of {MAX_QUERY_LENGTH} characters"
        ));
    }

    if query.matches('*').count() > MAX_WILDCARDS {
        return too_complex(format!("too many wildcards (max {MAX_WILDCARDS})"));
    }

    let upper = query.to_uppercase();
    if upper.matches(" OR ").count() > MAX_OR_OPERATORS {
        return too_complex(format!("too many OR operators (max {MAX_OR_OPERATORS})"));
    }

    let open_parens = query.chars().filter(|&c| c == '(').count();
    let close_parens = query.chars().filter(|&c| c == ')').count();
    if open_parens > MAX_PARENTHESES {
        return too_complex(format!("too many parentheses (max {MAX_PARENTHESES})"));
    }
    if open_parens != close_parens {
        return too_complex("unbalanced parentheses".to_string());
    }

    if upper.matches(" AND ").count() > MAX_AND_OPERATORS {
        return too_complex(format!("too many AND operators (max {MAX_AND_OPERATORS})"));
    }

    Ok(())
}

/// Escape `LIKE` wildcards so the term matches literally (escape char `\`).
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Database {
    // ========================================================================
    // Search Operations
    // ========================================================================

    /// Ranked full-text search over item titles and source names.
    ///
    /// An empty term yields no hits. Terms FTS5 cannot parse fall back to a
    /// substring match ordered newest first.
    pub async fn search(&self, term: &str) -> Result<Vec<SearchHit>, SearchError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        validate_fts_query(term)?;

        let fts_result = sqlx::query_as::<_, SearchHit>(
            r#"
            SELECT id, title, source_name
            FROM items_fts
            WHERE items_fts MATCH ?
            ORDER BY rank
            LIMIT ?
        "#,
        )
        .bind(term)
        .bind(MAX_RESULTS)
        .fetch_all(&self.pool)
        .await;

        match fts_result {
            Ok(hits) => {
                tracing::debug!(term = %term, hits = hits.len(), "FTS5 search");
                Ok(hits)
            }
            Err(e) => {
                tracing::warn!(error = %e, term = %term, "FTS5 search failed, falling back to LIKE");
                let like_pattern = format!("%{}%", escape_like(term));
                let hits = sqlx::query_as::<_, SearchHit>(
                    r#"
                    SELECT i.id, i.title, s.display_name AS source_name
                    FROM items i
                    JOIN sources s ON s.id = i.source_id
                    WHERE i.title LIKE ?1 ESCAPE '\' OR s.display_name LIKE ?1 ESCAPE '\'
                    ORDER BY i.published_at DESC
                    LIMIT ?2
                "#,
                )
                .bind(&like_pattern)
                .bind(MAX_RESULTS)
                .fetch_all(&self.pool)
                .await?;
                Ok(hits)
            }
        }
    }

    // ========================================================================
    // Search Index Maintenance
    // ========================================================================

    /// Compare `items_fts` against `items`.
    pub async fn check_search_consistency(&self) -> Result<IndexConsistencyReport, StoreError> {
        let (items,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;

        let (indexed,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items_fts")
            .fetch_one(&self.pool)
            .await?;

        let (orphaned,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM items_fts f LEFT JOIN items i ON f.rowid = i.rowid WHERE i.rowid IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let (missing,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM items i LEFT JOIN items_fts f ON i.rowid = f.rowid WHERE f.rowid IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let is_consistent = orphaned == 0 && missing == 0 && items == indexed;

        tracing::debug!(
            items,
            indexed,
            orphaned,
            missing,
            is_consistent,
            "Search index consistency check"
        );

        Ok(IndexConsistencyReport {
            items,
            indexed,
            orphaned,
            missing,
            is_consistent,
        })
    }

    /// Drop and repopulate every search record from `items`.
    ///
    /// Returns the number of items indexed.
    pub async fn rebuild_search_index(&self) -> Result<u64, StoreError> {
        let mut txn = self.begin_write().await?;

        sqlx::query("DELETE FROM items_fts")
            .execute(&mut *txn.tx)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO items_fts (rowid, id, title, source_name)
            SELECT i.rowid, i.id, i.title, s.display_name
            FROM items i
            JOIN sources s ON s.id = i.source_id
        "#,
        )
        .execute(&mut *txn.tx)
        .await?;

        txn.commit().await?;

        tracing::info!(indexed = result.rows_affected(), "Rebuilt search index");
        Ok(result.rows_affected())
    }
}
