use chrono::{DateTime, Utc};
use feed_rs::model::Link;
use feed_rs::parser;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub use feed_rs::parser::ParseFeedError;

/// A fetched and parsed feed, reduced to what the catalog stores.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: String,
    /// Human-facing page of the feed (may be empty).
    pub link: String,
    pub entries: Vec<FeedEntry>,
}

/// One entry of a parsed feed, in document order.
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub title: String,
    /// Permanent link of the entry (may be empty if the feed omits it).
    pub link: String,
    /// Publication time exactly as the feed wrote it, or empty when absent.
    pub published: String,
    /// Provider-specific data (entry id, author). Never used for identity.
    pub extensions: HashMap<String, String>,
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseFeedError> {
    // feed-rs only hands back parsed instants. Each timestamp element is
    // recorded here and the instant returned for it is its index.
    let raw_timestamps: Rc<RefCell<Vec<String>>> = Rc::default();
    let recorder = Rc::clone(&raw_timestamps);
    let feed = parser::Builder::new()
        .timestamp_parser(move |text| {
            let mut seen = recorder.borrow_mut();
            seen.push(text.trim().to_string());
            DateTime::from_timestamp(seen.len() as i64 - 1, 0)
        })
        .build()
        .parse(bytes)?;

    let raw_timestamps = raw_timestamps.take();
    let raw_text = |token: Option<DateTime<Utc>>| {
        token
            .and_then(|t| usize::try_from(t.timestamp()).ok())
            .and_then(|i| raw_timestamps.get(i))
            .filter(|text| !text.is_empty())
            .cloned()
    };

    let title = feed
        .title
        .map(|t| sanitize(&t.content))
        .unwrap_or_else(|| "Untitled Feed".to_string());
    let link = permalink(&feed.links).unwrap_or_default();

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry
                .title
                .map(|t| sanitize(&t.content))
                .unwrap_or_else(|| "Untitled".to_string());
            let link = permalink(&entry.links).unwrap_or_default();
            let published = raw_text(entry.published)
                .or_else(|| raw_text(entry.updated))
                .unwrap_or_default();

            let mut extensions = HashMap::new();
            if !entry.id.trim().is_empty() {
                extensions.insert("id".to_string(), entry.id.trim().to_string());
            }
            if let Some(author) = entry.authors.first() {
                extensions.insert("author".to_string(), sanitize(&author.name));
            }

            FeedEntry {
                title,
                link,
                published,
                extensions,
            }
        })
        .collect();

    Ok(ParsedFeed {
        title,
        link,
        entries,
    })
}

/// Picks the `alternate` (or unlabelled) link, falling back to the first one.
fn permalink(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
}

/// Feed text ends up in terminal output; drop control characters except whitespace.
fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n'))
        .collect::<String>()
        .trim()
        .to_string()
}
