use crate::feed::client::{read_limited_bytes, FetchError, HttpFeedClient};
use thiserror::Error;
use url::Url;

const MAX_DISCOVERY_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Placeholder substituted with the channel identifier in feed templates.
pub const CHANNEL_PLACEHOLDER: &str = "{id}";

/// Errors that can occur while turning user input into a feed URL.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The input is neither an http(s) URL nor a usable channel reference
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// The page is not a feed and carries no channel id or feed link
    #[error("not a feed: no channel id or RSS/Atom link found")]
    NotAFeed,
    /// HTTP request failed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-2xx response for the page
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the client timeout
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the 5MB size limit
    #[error("response too large")]
    TooLarge,
}

/// Resolves subscription input to a feed URL.
///
/// Absolute http(s) URLs are taken as feed URLs. Anything else is treated as
/// a channel reference and substituted into `template`.
pub fn resolve_feed_url(input: &str, template: &str) -> Result<String, DiscoveryError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DiscoveryError::InvalidUrl("empty input".to_string()));
    }

    if input.contains("://") {
        let url = Url::parse(input).map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
        return match url.scheme() {
            "http" | "https" => Ok(url.to_string()),
            scheme => Err(DiscoveryError::InvalidUrl(format!(
                "unsupported scheme: {scheme} (only http/https allowed)"
            ))),
        };
    }

    channel_feed_url(input, template)
}

/// Expands a channel identifier through the feed template.
pub fn channel_feed_url(channel_id: &str, template: &str) -> Result<String, DiscoveryError> {
    let valid = !channel_id.is_empty()
        && channel_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(DiscoveryError::InvalidUrl(format!(
            "not a URL or channel id: {channel_id}"
        )));
    }
    Ok(template.replace(CHANNEL_PLACEHOLDER, channel_id))
}

/// Finds the feed behind a web page.
///
/// If the page itself parses as a feed its URL is returned. Otherwise the
/// HTML is scanned for a channel id meta tag (expanded through `template`)
/// and then for a `<link rel="alternate">` feed link.
pub async fn discover_feed_url(
    client: &HttpFeedClient,
    page_url: &str,
    template: &str,
) -> Result<String, DiscoveryError> {
    let page = Url::parse(page_url.trim()).map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
    if !matches!(page.scheme(), "http" | "https") {
        return Err(DiscoveryError::InvalidUrl(format!(
            "unsupported scheme: {}",
            page.scheme()
        )));
    }

    let response = tokio::time::timeout(client.timeout(), client.http().get(page.as_str()).send())
        .await
        .map_err(|_| DiscoveryError::Timeout)??;

    if !response.status().is_success() {
        return Err(DiscoveryError::HttpStatus(response.status().as_u16()));
    }

    let bytes = tokio::time::timeout(
        client.timeout(),
        read_limited_bytes(response, MAX_DISCOVERY_SIZE),
    )
    .await
    .map_err(|_| DiscoveryError::Timeout)?
    .map_err(|e| match e {
        FetchError::Network(e) => DiscoveryError::Network(e),
        FetchError::ResponseTooLarge => DiscoveryError::TooLarge,
        _ => DiscoveryError::NotAFeed,
    })?;

    if feed_rs::parser::parse(bytes.as_slice()).is_ok() {
        return Ok(page.to_string());
    }

    let html = String::from_utf8_lossy(&bytes);
    if let Some(channel_id) = find_channel_id_in_html(&html) {
        tracing::debug!(page = %page, channel_id = %channel_id, "Found channel id in page");
        return channel_feed_url(&channel_id, template);
    }

    find_feed_link_in_html(&html, &page).ok_or(DiscoveryError::NotAFeed)
}

/// Scans HTML for `<meta itemprop="channelId|identifier" content="...">`.
fn find_channel_id_in_html(html: &str) -> Option<String> {
    scan_tags(html, "<meta", |tag, original| {
        let is_channel = contains_attr(tag, "itemprop", "channelid")
            || contains_attr(tag, "itemprop", "identifier");
        if !is_channel {
            return None;
        }
        extract_attr_value(original, "content")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    })
}

/// Scans HTML for `<link rel="alternate">` tags with an RSS/Atom type.
fn find_feed_link_in_html(html: &str, base: &Url) -> Option<String> {
    scan_tags(html, "<link", |tag, original| {
        let is_feed = contains_attr(tag, "rel", "alternate")
            && (tag.contains("application/rss+xml") || tag.contains("application/atom+xml"));
        if !is_feed {
            return None;
        }
        let href = extract_attr_value(original, "href")?;
        base.join(href.trim()).ok().map(|u| u.to_string())
    })
}

/// Walks every `open` tag, handing the lowercased and original text to `f`
/// until it yields a value.
fn scan_tags<F>(html: &str, open: &str, mut f: F) -> Option<String>
where
    F: FnMut(&str, &str) -> Option<String>,
{
    let html_lower = html.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(start) = html_lower[search_from..].find(open) {
        let abs_start = search_from + start;
        let tag_end = html_lower[abs_start..].find('>')?;
        let tag = &html_lower[abs_start..=abs_start + tag_end];
        let original = &html[abs_start..=abs_start + tag_end];

        if let Some(found) = f(tag, original) {
            return Some(found);
        }
        search_from = abs_start + tag_end + 1;
    }

    None
}

fn contains_attr(tag: &str, name: &str, value: &str) -> bool {
    tag.contains(&format!("{name}=\"{value}\"")) || tag.contains(&format!("{name}='{value}'"))
}

/// Extracts a quoted attribute value, preserving case.
fn extract_attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {name}=");
    let start = tag.to_ascii_lowercase().find(&needle)? + needle.len();
    let rest = tag.get(start..)?;
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    Some(&inner[..end])
}
