mod items;
mod schema;
mod search;
mod sources;
mod types;

pub use schema::{Database, WriteTxn};
pub use search::SearchError;
pub use types::{IndexConsistencyReport, Item, ItemWithSource, SearchHit, Source, StoreError};
