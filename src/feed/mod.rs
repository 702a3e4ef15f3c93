//! Feed access: fetching, parsing, and resolving what the user subscribes to.
//!
//! - [`parser`] - Converts RSS/Atom/JSON Feed bytes into [`ParsedFeed`] using `feed-rs`
//! - [`client`] - The [`FeedClient`] seam and its HTTP implementation
//! - [`discovery`] - Turns a feed URL, channel id, or channel page into a feed URL
//!
//! # Example
//!
//! ```ignore
//! use feedvault::feed::{resolve_feed_url, FeedClient, HttpFeedClient};
//!
//! let url = resolve_feed_url("UC_channel", &config.channel_feed_template)?;
//! let feed = HttpFeedClient::new(&config)?.fetch(&url).await?;
//! ```

mod client;
mod discovery;
mod parser;

pub use client::{FeedClient, FetchError, HttpFeedClient};
pub use discovery::{
    channel_feed_url, discover_feed_url, resolve_feed_url, DiscoveryError, CHANNEL_PLACEHOLDER,
};
pub use parser::{parse_feed, FeedEntry, ParseFeedError, ParsedFeed};
