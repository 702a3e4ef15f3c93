use chrono::{DateTime, NaiveDateTime, Utc};

use super::UpdateError;
use crate::feed::FeedEntry;
use crate::identity::identifier_for;
use crate::storage::{Item, Source, StoreError, WriteTxn};

/// RFC 850, e.g. `Monday, 02-Jan-06 15:04:05` followed by a UTC zone name.
const RFC850_FORMAT: &str = "%A, %d-%b-%y %H:%M:%S";

/// Parse a feed timestamp.
///
/// Formats are tried in order: RFC 3339, RFC 2822 (numeric offsets and
/// named zones such as `GMT`), then RFC 850 with a `GMT` or `UTC` zone.
pub fn parse_published(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = value
        .strip_suffix(" GMT")
        .or_else(|| value.strip_suffix(" UTC"))?;
    NaiveDateTime::parse_from_str(naive, RFC850_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Result of merging one feed's entries into a transaction.
#[derive(Debug, Default)]
pub(super) struct MergeOutcome {
    /// Newly inserted items, in feed order.
    pub new_items: Vec<Item>,
    /// Entries that were skipped, one error each.
    pub skipped: Vec<UpdateError>,
}

/// Build the item for a feed entry, or the reason it must be skipped.
fn item_from_entry(entry: &FeedEntry, source_id: &str) -> Result<Item, UpdateError> {
    let link = entry.link.trim();
    if link.is_empty() {
        return Err(UpdateError::MissingLink {
            title: entry.title.clone(),
        });
    }

    let published_at =
        parse_published(&entry.published).ok_or_else(|| UpdateError::Timestamp {
            title: entry.title.clone(),
            value: entry.published.clone(),
        })?;

    Ok(Item {
        id: identifier_for(link),
        title: entry.title.clone(),
        url: link.to_string(),
        published_at,
        source_id: source_id.to_string(),
        downloaded: false,
    })
}

/// Insert every entry that is not already in the catalog.
///
/// Entries are handled in feed order. A duplicate id means the item was
/// merged before and is skipped silently. Any other store error is returned
/// and the caller must drop `txn` so nothing from this feed is kept.
pub(super) async fn merge_entries(
    txn: &mut WriteTxn,
    source: &Source,
    entries: &[FeedEntry],
) -> Result<MergeOutcome, StoreError> {
    let mut outcome = MergeOutcome::default();

    for entry in entries {
        let item = match item_from_entry(entry, &source.id) {
            Ok(item) => item,
            Err(e) => {
                outcome.skipped.push(e);
                continue;
            }
        };

        match txn.insert_item(&item).await {
            Ok(()) => outcome.new_items.push(item),
            Err(e) if e.is_duplicate_key() => {
                tracing::trace!(source_id = %source.id, item_id = %item.id, "Item already known");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(outcome)
}
