//! Block delivery: the chain as an ordered sequence of blocks, each carrying
//! its header hashes and raw contract events in emission order.

use crate::decoder::RawEvent;
use crate::domain::BlockNumber;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod mock;
pub mod rpc;

pub use mock::MockBlockSource;
pub use rpc::RpcBlockSource;

/// One accepted block as seen by the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: BlockNumber,
    pub hash: String,
    pub parent_hash: String,
    pub events: Vec<RawEvent>,
}

/// Source of accepted blocks.
///
/// Implementations handle retry/backoff themselves; an error returned here has
/// already exhausted retries or is permanent.
#[async_trait]
pub trait BlockSource: Send + Sync + fmt::Debug {
    /// Height of the newest accepted block.
    async fn latest_block_number(&self) -> Result<BlockNumber, BlockSourceError>;

    /// Fetch block `number`, or `None` if the chain has not reached it.
    async fn block(&self, number: BlockNumber) -> Result<Option<Block>, BlockSourceError>;
}

#[derive(Debug, Clone, Error)]
pub enum BlockSourceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}
