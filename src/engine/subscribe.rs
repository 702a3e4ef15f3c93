use super::merge::merge_entries;
use super::{Engine, SubscribeError};
use crate::feed::{discover_feed_url, resolve_feed_url, FeedClient, HttpFeedClient};
use crate::identity::identifier_for;
use crate::storage::{Source, StoreError};

impl<C: FeedClient> Engine<C> {
    /// Subscribe to a feed URL or channel id and merge its current entries.
    ///
    /// The source and its initial items are written in one transaction, so a
    /// failed subscribe leaves no source behind.
    ///
    /// # Errors
    ///
    /// - `SubscribeError::InvalidInput` if the input is not a URL or channel id
    /// - `SubscribeError::AlreadySubscribed` if the feed URL is already a source
    /// - `SubscribeError::Fetch` if the feed cannot be fetched or parsed
    /// - `SubscribeError::Entry` if an entry has a bad timestamp or no link
    /// - `SubscribeError::Store` on database failure
    pub async fn subscribe(&self, input: &str) -> Result<Source, SubscribeError> {
        let feed_url = resolve_feed_url(input, &self.channel_feed_template)
            .map_err(|e| SubscribeError::InvalidInput(e.to_string()))?;
        self.subscribe_feed_url(feed_url).await
    }

    /// Remove a source together with its items and search records.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no source has this id.
    pub async fn unsubscribe(&self, source_id: &str) -> Result<(), StoreError> {
        self.db.delete_source(source_id).await
    }

    async fn subscribe_feed_url(&self, feed_url: String) -> Result<Source, SubscribeError> {
        if self.db.get_source_by_feed_url(&feed_url).await?.is_some() {
            return Err(SubscribeError::AlreadySubscribed(feed_url));
        }

        let feed = self.client.fetch(&feed_url).await?;

        let canonical_url = if feed.link.is_empty() {
            feed_url.clone()
        } else {
            feed.link.clone()
        };
        let source = Source {
            id: identifier_for(&feed_url),
            canonical_url,
            display_name: feed.title.clone(),
            feed_url,
            auto_download: false,
        };

        let mut txn = self.db.begin_write().await?;
        match txn.insert_source(&source).await {
            Ok(()) => {}
            // Lost a race with a concurrent subscribe of the same feed
            Err(e) if e.is_duplicate_key() => {
                return Err(SubscribeError::AlreadySubscribed(source.feed_url));
            }
            Err(e) => return Err(e.into()),
        }

        let outcome = merge_entries(&mut txn, &source, &feed.entries).await?;
        if let Some(rejected) = outcome.skipped.into_iter().next() {
            // Dropping txn rolls back the source insert
            tracing::warn!(feed = %source.feed_url, error = %rejected, "Subscribe aborted");
            return Err(SubscribeError::Entry(rejected));
        }
        txn.commit().await?;

        tracing::info!(
            source_id = %source.id,
            name = %source.display_name,
            feed = %source.feed_url,
            items = outcome.new_items.len(),
            "Subscribed"
        );

        Ok(source)
    }
}

impl Engine<HttpFeedClient> {
    /// Subscribe to the feed behind a web page (e.g. a channel page).
    pub async fn subscribe_page(&self, page_url: &str) -> Result<Source, SubscribeError> {
        let feed_url =
            discover_feed_url(&self.client, page_url, &self.channel_feed_template).await?;
        tracing::debug!(page = %page_url, feed = %feed_url, "Discovered feed");
        self.subscribe_feed_url(feed_url).await
    }
}
