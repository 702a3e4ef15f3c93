use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedvault::config::Config;
use feedvault::engine::Engine;
use feedvault::storage::{Database, ItemWithSource, StoreError};

/// Get the config directory path (~/.config/feedvault/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedvault"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedvault",
    version,
    about = "Follow feeds and channels without an account"
)]
struct Args {
    /// Config file (default: ~/.config/feedvault/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (overrides database_path from the config)
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every source and store new items
    Update,
    /// Subscribe to a feed URL or channel id
    Subscribe { input: String },
    /// Subscribe to the feed behind a web page
    SubscribePage { url: String },
    /// Remove a source and all of its items
    Unsubscribe { source_id: String },
    /// List sources
    Sources,
    /// List items, oldest first
    Items {
        /// Only items from the source with this name
        #[arg(long, value_name = "NAME")]
        source: Option<String>,
    },
    /// Show items by id
    Show {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Full-text search over item titles and source names
    Search { term: String },
    /// Rebuild the search index from the catalog
    RebuildSearch,
    /// Report whether the search index matches the catalog
    CheckSearch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config.database_path_in(&config_dir));
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::Locked) => {
            eprintln!("Error: {}", StoreError::Locked);
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    let engine = Engine::from_config(db, &config).context("Failed to create HTTP client")?;
    run(&engine, args.command).await
}

async fn run(engine: &Engine<feedvault::feed::HttpFeedClient>, command: Command) -> Result<()> {
    match command {
        Command::Update => {
            let report = engine.update_all().await.context("Update failed")?;
            for item in &report.new_items {
                println!("new  {}  {}", item.id, item.title);
            }
            for failure in &report.errors {
                eprintln!(
                    "error  {} ({}): {}",
                    failure.source_name, failure.source_id, failure.error
                );
            }
            println!(
                "{} new items, {} errors",
                report.new_items.len(),
                report.errors.len()
            );
        }
        Command::Subscribe { input } => {
            let source = engine
                .subscribe(&input)
                .await
                .with_context(|| format!("Failed to subscribe to {input}"))?;
            println!("Subscribed to {} ({})", source.display_name, source.id);
        }
        Command::SubscribePage { url } => {
            let source = engine
                .subscribe_page(&url)
                .await
                .with_context(|| format!("Failed to subscribe to page {url}"))?;
            println!("Subscribed to {} ({})", source.display_name, source.id);
        }
        Command::Unsubscribe { source_id } => {
            engine
                .unsubscribe(&source_id)
                .await
                .with_context(|| format!("Failed to unsubscribe {source_id}"))?;
            println!("Unsubscribed {source_id}");
        }
        Command::Sources => {
            for source in engine.list_sources().await.context("Failed to list sources")? {
                println!(
                    "{}  {}  {}",
                    source.id, source.display_name, source.feed_url
                );
            }
        }
        Command::Items { source } => {
            let items = match source {
                Some(name) => engine.items_by_source_name(&name).await,
                None => engine.list_items().await,
            }
            .context("Failed to list items")?;
            print_items(&items);
        }
        Command::Show { ids } => {
            let items = engine.items_by_id(&ids).await.context("Failed to load items")?;
            for entry in &items {
                println!("id:        {}", entry.item.id);
                println!("title:     {}", entry.item.title);
                println!("url:       {}", entry.item.url);
                println!("published: {}", entry.item.published_at.to_rfc3339());
                println!("source:    {} ({})", entry.source.display_name, entry.source.id);
                println!();
            }
        }
        Command::Search { term } => {
            let hits = engine.search(&term).await.context("Search failed")?;
            for hit in &hits {
                println!("{}  {}  [{}]", hit.id, hit.title, hit.source_name);
            }
        }
        Command::RebuildSearch => {
            tracing::info!("Rebuilding search index...");
            let count = engine
                .database()
                .rebuild_search_index()
                .await
                .context("Failed to rebuild search index")?;
            println!("Search index rebuilt: {count} items indexed");
        }
        Command::CheckSearch => {
            let report = engine
                .database()
                .check_search_consistency()
                .await
                .context("Failed to check search index")?;
            if report.is_consistent {
                println!("Search index is consistent ({} items)", report.items);
            } else {
                println!(
                    "Search index is out of sync (items: {}, indexed: {}, missing: {}, orphaned: {}). Run `feedvault rebuild-search` to fix.",
                    report.items, report.indexed, report.missing, report.orphaned
                );
            }
        }
    }

    Ok(())
}

fn print_items(items: &[ItemWithSource]) {
    for entry in items {
        println!(
            "{}  {}  {}  [{}]",
            entry.item.published_at.format("%Y-%m-%d %H:%M"),
            entry.item.id,
            entry.item.title,
            entry.source.display_name
        );
    }
}
