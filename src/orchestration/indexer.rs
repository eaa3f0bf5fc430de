//! Chain follower: pulls blocks from a `BlockSource`, decodes them, commits
//! them through the ledger engine and rewinds when the chain reorganizes.

use crate::config::Config;
use crate::datasource::{Block, BlockSource, BlockSourceError};
use crate::db::IndexedBlock;
use crate::decoder::Dispatcher;
use crate::domain::{Address, BlockNumber, LedgerEvent};
use crate::ledger::{LedgerEngine, LedgerError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct IndexerSettings {
    /// First block to index when nothing has been indexed yet.
    pub start_block: BlockNumber,
    pub poll_interval: Duration,
    /// Most blocks a single reorg may retract before the indexer gives up.
    pub max_reorg_depth: u64,
    /// Vaults to track without waiting for a deployment event.
    pub seed_vaults: Vec<Address>,
}

impl IndexerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            start_block: config.start_block,
            poll_interval: config.poll_interval,
            max_reorg_depth: config.max_reorg_depth,
            seed_vaults: config.vault_addresses.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: usize,
    pub retracted: usize,
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Source(#[from] BlockSourceError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("reorg at block {at} deeper than {depth} blocks")]
    ReorgTooDeep { at: BlockNumber, depth: u64 },
}

impl IndexerError {
    /// Worth retrying on the next poll without operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            IndexerError::Source(_) | IndexerError::Db(_) => true,
            IndexerError::Ledger(e) => e.is_transient(),
            IndexerError::ReorgTooDeep { .. } => false,
        }
    }
}

pub struct Indexer {
    source: Arc<dyn BlockSource>,
    engine: LedgerEngine,
    dispatcher: Dispatcher,
    settings: IndexerSettings,
}

impl Indexer {
    pub fn new(
        source: Arc<dyn BlockSource>,
        engine: LedgerEngine,
        dispatcher: Dispatcher,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            source,
            engine,
            dispatcher,
            settings,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Follow the chain forever, polling every `poll_interval`.
    pub async fn run(mut self) {
        info!(
            start_block = %self.settings.start_block,
            max_reorg_depth = self.settings.max_reorg_depth,
            "Indexer started"
        );
        loop {
            match self.sync_once().await {
                Ok(report) if report.applied > 0 || report.retracted > 0 => {
                    info!(applied = report.applied, retracted = report.retracted, "Sync pass done");
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Sync pass failed, retrying");
                }
                Err(e) => {
                    error!(error = %e, "Sync pass failed; ledger is stalled until resolved");
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Catch up to the source's current tip.
    pub async fn sync_once(&mut self) -> Result<SyncReport, IndexerError> {
        let mut report = SyncReport {
            retracted: self.rewind().await?,
            ..SyncReport::default()
        };
        let latest = self.source.latest_block_number().await?;

        loop {
            let tip = self.engine.repo().latest_indexed_block().await?;
            let next = match &tip {
                Some(t) => BlockNumber::new(t.number.as_u64() + 1),
                None => self.settings.start_block,
            };
            if next > latest {
                break;
            }
            let Some(block) = self.source.block(next).await? else {
                break;
            };

            if let Some(tip) = &tip {
                if block.parent_hash != tip.hash {
                    warn!(
                        block = %block.number,
                        parent = %block.parent_hash,
                        indexed_tip = %tip.hash,
                        "Parent hash mismatch, rewinding"
                    );
                    let retracted = self.rewind().await?;
                    if retracted == 0 {
                        // Source answered from two different forks; try again next poll.
                        break;
                    }
                    report.retracted += retracted;
                    continue;
                }
            }

            self.commit(block).await?;
            report.applied += 1;
        }

        Ok(report)
    }

    /// Retract indexed blocks newest-first until the indexed tip is on the
    /// source's chain again. A no-op when the tip is still canonical.
    async fn rewind(&mut self) -> Result<usize, IndexerError> {
        let mut retracted = 0usize;
        while let Some(tip) = self.engine.repo().latest_indexed_block().await? {
            match self.source.block(tip.number).await? {
                Some(canonical) if canonical.hash == tip.hash => {
                    if retracted > 0 {
                        debug!(block = %tip.number, "Common ancestor found");
                    }
                    break;
                }
                Some(_) => {}
                None => {
                    debug!(block = %tip.number, "Source has not reached indexed tip");
                    break;
                }
            }
            if retracted as u64 >= self.settings.max_reorg_depth {
                return Err(IndexerError::ReorgTooDeep {
                    at: tip.number,
                    depth: self.settings.max_reorg_depth,
                });
            }
            let block = self.engine.retract_block(tip.number).await?;
            self.dispatcher.forget(&block.events);
            retracted += 1;
        }
        Ok(retracted)
    }

    async fn commit(&mut self, block: Block) -> Result<(), IndexerError> {
        let mut events = self.seed_events();
        events.extend(self.dispatcher.decode_block(&block.events));

        let indexed = IndexedBlock {
            number: block.number,
            hash: block.hash,
            parent_hash: block.parent_hash,
            events,
            indexed_at: Utc::now(),
        };
        if let Err(e) = self.engine.commit_block(&indexed).await {
            self.dispatcher.forget(&indexed.events);
            return Err(e.into());
        }
        Ok(())
    }

    /// `VaultDeployed` for configured vaults not yet known, recorded with the
    /// block so a reorg below it seeds them again.
    fn seed_events(&mut self) -> Vec<LedgerEvent> {
        let mut events = Vec::new();
        for vault in &self.settings.seed_vaults {
            if !self.dispatcher.is_known_vault(vault) {
                self.dispatcher.track_vault(vault.clone());
                events.push(LedgerEvent::VaultDeployed {
                    vault: vault.clone(),
                });
            }
        }
        events
    }
}
