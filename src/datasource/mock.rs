//! In-memory chain for tests, with suffix replacement to simulate reorgs.

use super::{Block, BlockSource, BlockSourceError};
use crate::decoder::RawEvent;
use crate::domain::BlockNumber;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Chain {
    blocks: Vec<Block>,
    /// Bumped on every reorg so replacement blocks get fresh hashes.
    fork: u64,
}

/// Mock block source. Block numbers start at 0.
#[derive(Debug, Default)]
pub struct MockBlockSource {
    chain: Mutex<Chain>,
}

impl MockBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from per-block event lists.
    pub fn with_blocks(blocks: Vec<Vec<RawEvent>>) -> Self {
        let source = Self::new();
        for events in blocks {
            source.push_block(events);
        }
        source
    }

    /// Append a block on top of the current tip.
    pub fn push_block(&self, events: Vec<RawEvent>) -> Block {
        let mut chain = self.lock();
        let number = BlockNumber::new(chain.blocks.len() as u64);
        let parent_hash = chain
            .blocks
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_else(|| "0x0".to_string());
        let block = Block {
            number,
            hash: block_hash(number, chain.fork),
            parent_hash,
            events,
        };
        chain.blocks.push(block.clone());
        block
    }

    /// Drop every block from `from` upward and append `replacement` in its
    /// place.
    pub fn reorg(&self, from: BlockNumber, replacement: Vec<Vec<RawEvent>>) {
        {
            let mut chain = self.lock();
            let keep = (from.as_u64() as usize).min(chain.blocks.len());
            chain.blocks.truncate(keep);
            chain.fork += 1;
        }
        for events in replacement {
            self.push_block(events);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Chain> {
        self.chain.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn block_hash(number: BlockNumber, fork: u64) -> String {
    format!("0x{:x}{:08x}", fork + 1, number.as_u64())
}

#[async_trait]
impl BlockSource for MockBlockSource {
    async fn latest_block_number(&self) -> Result<BlockNumber, BlockSourceError> {
        let chain = self.lock();
        Ok(chain
            .blocks
            .last()
            .map(|b| b.number)
            .unwrap_or_default())
    }

    async fn block(&self, number: BlockNumber) -> Result<Option<Block>, BlockSourceError> {
        Ok(self.lock().blocks.get(number.as_u64() as usize).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocks_link_by_parent_hash() {
        let source = MockBlockSource::with_blocks(vec![vec![], vec![], vec![]]);
        let b1 = source.block(BlockNumber::new(1)).await.unwrap().unwrap();
        let b2 = source.block(BlockNumber::new(2)).await.unwrap().unwrap();
        assert_eq!(b2.parent_hash, b1.hash);
        assert_eq!(source.latest_block_number().await.unwrap(), BlockNumber::new(2));
        assert!(source.block(BlockNumber::new(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reorg_replaces_suffix_with_new_hashes() {
        let source = MockBlockSource::with_blocks(vec![vec![], vec![], vec![]]);
        let old_b1 = source.block(BlockNumber::new(1)).await.unwrap().unwrap();
        let b0 = source.block(BlockNumber::new(0)).await.unwrap().unwrap();

        source.reorg(BlockNumber::new(1), vec![vec![], vec![], vec![]]);

        assert_eq!(source.len(), 4);
        let new_b1 = source.block(BlockNumber::new(1)).await.unwrap().unwrap();
        assert_ne!(new_b1.hash, old_b1.hash);
        assert_eq!(new_b1.parent_hash, b0.hash);
        assert_eq!(
            source.block(BlockNumber::new(0)).await.unwrap().unwrap().hash,
            b0.hash
        );
    }
}
