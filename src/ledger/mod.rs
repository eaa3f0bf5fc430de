//! Ledger engine: applies decoded events to the entity store and reverts them
//! when a block is retracted.
//!
//! Every block runs in one store transaction. If any event fails the whole
//! block rolls back and the error is returned to the caller, which may retry
//! the block as a unit.

mod error;
pub mod forward;
pub mod revert;

pub use error::LedgerError;
pub use forward::apply;
pub use revert::revert;

use crate::db::{IndexedBlock, Repository, StoreTx};
use crate::domain::{BlockNumber, LedgerEvent};
use std::sync::Arc;
use tracing::{info, warn};

pub struct LedgerEngine {
    repo: Arc<Repository>,
}

impl LedgerEngine {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    /// Apply `events` in order as block `block`, all or nothing.
    pub async fn apply_block(
        &self,
        block: BlockNumber,
        events: &[LedgerEvent],
    ) -> Result<(), LedgerError> {
        let mut tx = self.repo.begin().await?;
        apply_all(&mut tx, block, events).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Revert `events` of block `block` in reverse order, all or nothing.
    pub async fn revert_block(
        &self,
        block: BlockNumber,
        events: &[LedgerEvent],
    ) -> Result<(), LedgerError> {
        let mut tx = self.repo.begin().await?;
        revert_all(&mut tx, block, events).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Apply a block and record its header and events in the same transaction.
    pub async fn commit_block(&self, block: &IndexedBlock) -> Result<(), LedgerError> {
        let mut tx = self.repo.begin().await?;
        apply_all(&mut tx, block.number, &block.events).await?;
        tx.put_indexed_block(block).await?;
        tx.commit().await?;
        info!(
            block = %block.number,
            hash = %block.hash,
            events = block.events.len(),
            "Block committed"
        );
        Ok(())
    }

    /// Revert a previously committed block from its recorded events and
    /// forget it. Returns the retracted header.
    pub async fn retract_block(&self, number: BlockNumber) -> Result<IndexedBlock, LedgerError> {
        let mut tx = self.repo.begin().await?;
        let block = tx
            .get_indexed_block(number)
            .await?
            .ok_or_else(|| LedgerError::not_found("indexed block", number))?;
        revert_all(&mut tx, number, &block.events).await?;
        tx.delete_indexed_block(number).await?;
        tx.commit().await?;
        warn!(
            block = %number,
            hash = %block.hash,
            events = block.events.len(),
            "Block retracted"
        );
        Ok(block)
    }
}

async fn apply_all(
    tx: &mut StoreTx,
    block: BlockNumber,
    events: &[LedgerEvent],
) -> Result<(), LedgerError> {
    for (index, event) in events.iter().enumerate() {
        apply(tx, event, block).await.map_err(|e| {
            warn!(block = %block, index, event = event.name(), error = %e, "Apply failed, block rolled back");
            e
        })?;
    }
    Ok(())
}

async fn revert_all(
    tx: &mut StoreTx,
    block: BlockNumber,
    events: &[LedgerEvent],
) -> Result<(), LedgerError> {
    for (index, event) in events.iter().enumerate().rev() {
        revert(tx, event, block).await.map_err(|e| {
            warn!(block = %block, index, event = event.name(), error = %e, "Revert failed, block rolled back");
            e
        })?;
    }
    Ok(())
}
