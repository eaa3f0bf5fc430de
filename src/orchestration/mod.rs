pub mod indexer;

pub use indexer::{Indexer, IndexerError, IndexerSettings, SyncReport};
