//! Subscription and update orchestration over the catalog.
//!
//! - [`merge`] - Turns feed entries into items and inserts the new ones
//! - [`update`] - Concurrent polling of every source ([`Engine::update_all`])
//! - [`subscribe`] - Adding and removing sources
//!
//! The engine keeps no state of its own beyond handles to the store and the
//! feed client; everything persistent lives in [`Database`].

mod merge;
mod subscribe;
mod update;

use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::feed::{DiscoveryError, FeedClient, FetchError, HttpFeedClient};
use crate::storage::{
    Database, Item, ItemWithSource, SearchError, SearchHit, Source, StoreError,
};

pub use merge::parse_published;

// ============================================================================
// Error Types
// ============================================================================

/// A failure recorded while updating one source.
///
/// Only `Fetch`, `Store` and `Task` stop a source's merge; `Timestamp` and
/// `MissingLink` skip a single entry.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("unparseable published time {value:?} for entry {title:?}")]
    Timestamp { title: String, value: String },

    #[error("entry {title:?} has no link")]
    MissingLink { title: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("update task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("invalid subscription: {0}")]
    InvalidInput(String),

    #[error("feed discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    /// An entry of the feed could not be merged; nothing was stored
    #[error("feed entry rejected: {0}")]
    Entry(UpdateError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// Update Results
// ============================================================================

/// An error tagged with the source it happened on.
#[derive(Debug)]
pub struct SourceFailure {
    pub source_id: String,
    pub source_name: String,
    pub error: UpdateError,
}

/// Outcome of one [`Engine::update_all`] cycle.
///
/// Items keep feed order within a source; there is no order across sources.
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub new_items: Vec<Item>,
    pub errors: Vec<SourceFailure>,
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine<C> {
    db: Database,
    client: Arc<C>,
    channel_feed_template: String,
}

impl<C> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            client: Arc::clone(&self.client),
            channel_feed_template: self.channel_feed_template.clone(),
        }
    }
}

impl Engine<HttpFeedClient> {
    /// Engine that fetches over HTTP with the configured timeout and user agent.
    pub fn from_config(db: Database, config: &Config) -> Result<Self, FetchError> {
        let client = HttpFeedClient::new(config)?;
        Ok(Self::new(db, client, config.channel_feed_template.clone()))
    }
}

impl<C: FeedClient> Engine<C> {
    pub fn new(db: Database, client: C, channel_feed_template: impl Into<String>) -> Self {
        Self {
            db,
            client: Arc::new(client),
            channel_feed_template: channel_feed_template.into(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn search(&self, term: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.db.search(term).await
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.db.list_sources().await
    }

    pub async fn list_items(&self) -> Result<Vec<ItemWithSource>, StoreError> {
        self.db.list_items().await
    }

    pub async fn items_by_source(&self, source_id: &str) -> Result<Vec<Item>, StoreError> {
        self.db.items_by_source(source_id).await
    }

    pub async fn items_by_source_name(
        &self,
        name: &str,
    ) -> Result<Vec<ItemWithSource>, StoreError> {
        self.db.items_by_source_name(name).await
    }

    pub async fn items_by_id(&self, ids: &[String]) -> Result<Vec<ItemWithSource>, StoreError> {
        self.db.items_by_id(ids).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::feed::{FeedClient, FeedEntry, FetchError, ParsedFeed};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves canned feeds by URL; unknown URLs fail with HTTP 503.
    #[derive(Default)]
    pub(crate) struct FakeClient {
        feeds: Mutex<HashMap<String, ParsedFeed>>,
        pub(crate) calls: AtomicUsize,
    }

    impl FakeClient {
        pub(crate) fn with_feed(self, url: &str, feed: ParsedFeed) -> Self {
            self.set_feed(url, feed);
            self
        }

        pub(crate) fn set_feed(&self, url: &str, feed: ParsedFeed) {
            self.feeds.lock().unwrap().insert(url.to_string(), feed);
        }

        pub(crate) fn remove_feed(&self, url: &str) {
            self.feeds.lock().unwrap().remove(url);
        }
    }

    impl FeedClient for FakeClient {
        async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let feed = self.feeds.lock().unwrap().get(url).cloned();
            feed.ok_or(FetchError::HttpStatus(503))
        }
    }

    pub(crate) fn feed(title: &str, entries: Vec<FeedEntry>) -> ParsedFeed {
        ParsedFeed {
            title: title.to_string(),
            link: format!("https://example.com/{}", title.to_lowercase()),
            entries,
        }
    }

    pub(crate) fn entry(title: &str, link: &str, published: &str) -> FeedEntry {
        FeedEntry {
            title: title.to_string(),
            link: link.to_string(),
            published: published.to_string(),
            ..Default::default()
        }
    }
}
