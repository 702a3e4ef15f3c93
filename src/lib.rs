//! Follow feeds and channels without an account, poll them concurrently,
//! and keep a deduplicated, searchable catalog of everything they publish.

pub mod config;
pub mod engine;
pub mod feed;
pub mod identity;
pub mod storage;
