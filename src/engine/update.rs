use futures::future::join_all;
use futures::TryStreamExt;
use std::any::Any;
use std::sync::Arc;

use super::merge::merge_entries;
use super::{Engine, SourceFailure, UpdateError, UpdateReport};
use crate::feed::FeedClient;
use crate::storage::{Database, Item, Source, StoreError};

/// What one source task produced.
struct SourceResult {
    new_items: Vec<Item>,
    errors: Vec<UpdateError>,
}

impl<C: FeedClient + 'static> Engine<C> {
    /// Poll every source concurrently and merge what is new.
    ///
    /// Each source runs in its own task with its own write transaction, so a
    /// failing source never affects another. Returns once every task has
    /// finished. Only failing to enumerate the sources is an error; per-source
    /// problems are collected in [`UpdateReport::errors`].
    ///
    /// If the returned future is dropped, already spawned tasks keep running
    /// until their transaction commits or rolls back.
    pub async fn update_all(&self) -> Result<UpdateReport, StoreError> {
        let sources: Vec<Source> = self.db.stream_sources().try_collect().await?;
        let total = sources.len();
        tracing::info!(sources = total, "Starting update");

        let handles: Vec<_> = sources
            .iter()
            .cloned()
            .map(|source| {
                let db = self.db.clone();
                let client = Arc::clone(&self.client);
                tokio::spawn(async move { update_source(&db, client.as_ref(), &source).await })
            })
            .collect();

        let mut report = UpdateReport::default();
        for (source, joined) in sources.into_iter().zip(join_all(handles).await) {
            let result = joined.unwrap_or_else(|e| {
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                tracing::error!(source_id = %source.id, error = %message, "Update task failed");
                SourceResult {
                    new_items: Vec::new(),
                    errors: vec![UpdateError::Task(message)],
                }
            });

            report.new_items.extend(result.new_items);
            report
                .errors
                .extend(result.errors.into_iter().map(|error| SourceFailure {
                    source_id: source.id.clone(),
                    source_name: source.display_name.clone(),
                    error,
                }));
        }

        tracing::info!(
            sources = total,
            new_items = report.new_items.len(),
            errors = report.errors.len(),
            "Update complete"
        );
        Ok(report)
    }
}

/// Fetch one source and merge its entries in a single transaction.
async fn update_source<C: FeedClient>(db: &Database, client: &C, source: &Source) -> SourceResult {
    let feed = match client.fetch(&source.feed_url).await {
        Ok(feed) => feed,
        Err(e) => {
            tracing::warn!(source_id = %source.id, feed = %source.feed_url, error = %e, "Fetch failed");
            return SourceResult {
                new_items: Vec::new(),
                errors: vec![UpdateError::Fetch(e)],
            };
        }
    };

    let merged = async {
        let mut txn = db.begin_write().await?;
        let outcome = merge_entries(&mut txn, source, &feed.entries).await?;
        txn.commit().await?;
        Ok::<_, StoreError>(outcome)
    }
    .await;

    match merged {
        Ok(outcome) => {
            for skipped in &outcome.skipped {
                tracing::warn!(source_id = %source.id, error = %skipped, "Skipped entry");
            }
            tracing::debug!(
                source_id = %source.id,
                new_items = outcome.new_items.len(),
                "Merged source"
            );
            SourceResult {
                new_items: outcome.new_items,
                errors: outcome.skipped,
            }
        }
        Err(e) => {
            tracing::warn!(source_id = %source.id, error = %e, "Merge rolled back");
            SourceResult {
                new_items: Vec::new(),
                errors: vec![UpdateError::Store(e)],
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
