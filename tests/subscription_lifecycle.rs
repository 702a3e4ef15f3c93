//! Integration tests for the subscription lifecycle over real HTTP:
//! subscribe, update, search, unsubscribe.
//!
//! Each test serves its feeds from a wiremock server and uses its own
//! in-memory SQLite database.

use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedvault::engine::{Engine, SubscribeError, UpdateError};
use feedvault::feed::HttpFeedClient;
use feedvault::identity::identifier_for;
use feedvault::storage::{Database, StoreError};

const TEMPLATE: &str = "https://www.youtube.com/feeds/videos.xml?channel_id={id}";

async fn test_engine() -> Engine<HttpFeedClient> {
    let db = Database::open(":memory:").await.unwrap();
    let client = HttpFeedClient::with_client(reqwest::Client::new(), Duration::from_secs(5));
    Engine::new(db, client, TEMPLATE)
}

fn atom_feed(title: &str, entries: &[(&str, &str, &str)]) -> String {
    let body: String = entries
        .iter()
        .map(|(entry_title, link, published)| {
            format!(
                r#"<entry>
    <id>{link}</id>
    <title>{entry_title}</title>
    <link rel="alternate" href="{link}"/>
    <published>{published}</published>
  </entry>"#
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>{title}</title>
  <link rel="alternate" href="https://example.com/{title}"/>
  {body}
</feed>"#
    )
}

fn rss_feed(title: &str, entries: &[(&str, &str, &str)]) -> String {
    let body: String = entries
        .iter()
        .map(|(entry_title, link, published)| {
            format!(
                "<item><title>{entry_title}</title><link>{link}</link><pubDate>{published}</pubDate></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>{title}</title><link>https://example.com/</link>{body}</channel></rss>"#
    )
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// ============================================================================
// Subscribe
// ============================================================================

#[tokio::test]
async fn test_subscribe_populates_catalog_and_search() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed.xml",
        atom_feed("Channel", &[("title", "https://example.com/v/1", "2006-01-02T15:04:05Z")]),
    )
    .await;
    let engine = test_engine().await;
    let feed_url = format!("{}/feed.xml", server.uri());

    let source = engine.subscribe(&feed_url).await.unwrap();
    assert_eq!(source.id, identifier_for(&feed_url));
    assert_eq!(source.display_name, "Channel");
    assert_eq!(source.canonical_url, "https://example.com/Channel");

    let items = engine.items_by_source(&source.id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "title");
    assert_eq!(items[0].url, "https://example.com/v/1");
    assert_eq!(items[0].published_at.timestamp(), 1136214245);

    let hits = engine.search("title").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, items[0].id);
}

#[tokio::test]
async fn test_subscribe_malformed_feed_fails_cleanly() {
    let server = MockServer::start().await;
    serve(&server, "/feed.xml", "<html>not a feed".to_string()).await;
    let engine = test_engine().await;

    let err = engine
        .subscribe(&format!("{}/feed.xml", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, SubscribeError::Fetch(_)), "got {err:?}");
    assert!(engine.list_sources().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_subscribe_page_discovers_feed_link() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/blog",
        r#"<html><head><link rel="alternate" type="application/rss+xml" href="/rss"></head></html>"#
            .to_string(),
    )
    .await;
    serve(
        &server,
        "/rss",
        rss_feed(
            "Blog",
            &[("Hello", "https://blog.example.com/hello", "Mon, 02 Jan 2006 15:04:05 GMT")],
        ),
    )
    .await;
    let engine = test_engine().await;

    let source = engine
        .subscribe_page(&format!("{}/blog", server.uri()))
        .await
        .unwrap();
    assert_eq!(source.feed_url, format!("{}/rss", server.uri()));
    assert_eq!(source.display_name, "Blog");
    assert_eq!(engine.items_by_source(&source.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_subscribe_rejects_feed_with_unparseable_date() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/rss",
        rss_feed(
            "Blog",
            &[
                ("Fine", "https://blog.example.com/fine", "Mon, 02 Jan 2006 15:04:05 GMT"),
                ("Broken", "https://blog.example.com/broken", "Someday in June"),
            ],
        ),
    )
    .await;
    let engine = test_engine().await;

    let err = engine
        .subscribe(&format!("{}/rss", server.uri()))
        .await
        .unwrap_err();
    match err {
        SubscribeError::Entry(UpdateError::Timestamp { title, value }) => {
            assert_eq!(title, "Broken");
            assert_eq!(value, "Someday in June");
        }
        other => panic!("expected Entry(Timestamp), got {other:?}"),
    }
    assert!(engine.list_sources().await.unwrap().is_empty());
    assert!(engine.list_items().await.unwrap().is_empty());
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_update_merges_new_entries_only() {
    let server = MockServer::start().await;
    let engine = test_engine().await;
    let feed_url = format!("{}/feed.xml", server.uri());

    // Initial feed with one entry
    let initial = Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(atom_feed(
            "Channel",
            &[("first", "https://example.com/v/1", "2024-01-01T00:00:00Z")],
        )))
        .mount_as_scoped(&server)
        .await;
    let source = engine.subscribe(&feed_url).await.unwrap();
    drop(initial);

    serve(
        &server,
        "/feed.xml",
        atom_feed(
            "Channel",
            &[
                ("second", "https://example.com/v/2", "2024-01-02T00:00:00Z"),
                ("first", "https://example.com/v/1", "2024-01-01T00:00:00Z"),
            ],
        ),
    )
    .await;

    let report = engine.update_all().await.unwrap();
    assert_eq!(report.errors.len(), 0);
    let titles: Vec<&str> = report.new_items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, vec!["second"]);

    let again = engine.update_all().await.unwrap();
    assert_eq!(again.new_items.len(), 0);
    assert_eq!(again.errors.len(), 0);

    let stored: Vec<String> = engine
        .items_by_source(&source.id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.title)
        .collect();
    assert_eq!(stored, vec!["first", "second"]);
}

#[tokio::test]
async fn test_update_isolates_failing_source() {
    let server = MockServer::start().await;
    let engine = test_engine().await;

    serve(&server, "/a.xml", atom_feed("A", &[])).await;
    serve(&server, "/b.xml", atom_feed("B", &[])).await;
    let source_a = engine
        .subscribe(&format!("{}/a.xml", server.uri()))
        .await
        .unwrap();
    let source_b = engine
        .subscribe(&format!("{}/b.xml", server.uri()))
        .await
        .unwrap();

    // A starts failing, B publishes something new
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/a.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    serve(
        &server,
        "/b.xml",
        atom_feed("B", &[("fresh", "https://example.com/b/1", "2024-01-01T00:00:00Z")]),
    )
    .await;

    let report = engine.update_all().await.unwrap();
    assert_eq!(report.new_items.len(), 1);
    assert_eq!(report.new_items[0].source_id, source_b.id);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].source_id, source_a.id);
    assert_eq!(report.errors[0].source_name, "A");
    assert!(matches!(report.errors[0].error, UpdateError::Fetch(_)));

    assert_eq!(engine.items_by_source(&source_b.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_parses_feed_dates_and_reports_raw_value() {
    let server = MockServer::start().await;
    serve(&server, "/rss", rss_feed("Blog", &[])).await;
    let engine = test_engine().await;
    let source = engine
        .subscribe(&format!("{}/rss", server.uri()))
        .await
        .unwrap();

    server.reset().await;
    serve(
        &server,
        "/rss",
        rss_feed(
            "Blog",
            &[
                ("Numeric zone", "https://blog.example.com/1", "Mon, 02 Jan 2006 15:04:05 -0700"),
                ("Old style", "https://blog.example.com/2", "Monday, 02-Jan-06 15:04:05 GMT"),
                ("Local time", "https://blog.example.com/3", "2024-01-02 10:00:00"),
            ],
        ),
    )
    .await;

    let report = engine.update_all().await.unwrap();
    let stamps: Vec<(&str, i64)> = report
        .new_items
        .iter()
        .map(|i| (i.title.as_str(), i.published_at.timestamp()))
        .collect();
    assert_eq!(
        stamps,
        vec![("Numeric zone", 1136239445), ("Old style", 1136214245)]
    );

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].source_id, source.id);
    match &report.errors[0].error {
        UpdateError::Timestamp { title, value } => {
            assert_eq!(title, "Local time");
            assert_eq!(value, "2024-01-02 10:00:00");
        }
        other => panic!("expected Timestamp, got {other:?}"),
    }
}

// ============================================================================
// Unsubscribe
// ============================================================================

#[tokio::test]
async fn test_unsubscribe_removes_items_and_search_records() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed.xml",
        atom_feed(
            "Channel",
            &[
                ("alpha", "https://example.com/v/1", "2024-01-01T00:00:00Z"),
                ("beta", "https://example.com/v/2", "2024-01-02T00:00:00Z"),
            ],
        ),
    )
    .await;
    let engine = test_engine().await;
    let source = engine
        .subscribe(&format!("{}/feed.xml", server.uri()))
        .await
        .unwrap();

    engine.unsubscribe(&source.id).await.unwrap();

    assert!(engine.items_by_source(&source.id).await.unwrap().is_empty());
    assert!(engine.list_sources().await.unwrap().is_empty());
    assert!(engine.search("alpha").await.unwrap().is_empty());

    let report = engine.database().check_search_consistency().await.unwrap();
    assert!(report.is_consistent);
    assert_eq!(report.items, 0);

    assert!(matches!(
        engine.unsubscribe(&source.id).await,
        Err(StoreError::NotFound(_))
    ));
}
