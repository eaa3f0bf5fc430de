pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod decoder;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod orchestration;

pub use config::Config;
pub use datasource::{Block, BlockSource, BlockSourceError, MockBlockSource, RpcBlockSource};
pub use db::{init_db, Repository};
pub use decoder::{Dispatcher, Felt, RawEvent};
pub use domain::{
    Address, Amount, Bid, BlockNumber, LedgerEvent, LiquidityProvider, OptionBuyer, OptionRound,
    RoundState, Vault,
};
pub use error::AppError;
pub use ledger::{LedgerEngine, LedgerError};
pub use orchestration::{Indexer, IndexerSettings};
