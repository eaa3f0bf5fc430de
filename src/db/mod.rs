//! SQLite entity store.
//!
//! - Schema creation and connection pragmas
//! - `Repository` for read-only lookups
//! - `StoreTx` for the per-block write transaction

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{IndexedBlock, Repository, Restored, StoreTx};
