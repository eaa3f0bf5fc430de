//! Revert handlers: the exact inverse of each forward handler.
//!
//! Vaults, providers and queued withdrawals rewind from per-block history.
//! Rounds, bids and buyer positions carry no history and are inverted from
//! the event payload instead.

use crate::db::{Restored, StoreTx};
use crate::domain::{Address, Amount, BlockNumber, BuyerFlag, LedgerEvent, RoundState};
use crate::engine::transitions;
use tracing::{debug, info};

use super::forward::{require_round, require_round_by_id, set_flag};
use super::LedgerError;

/// Revert one event inside the block transaction.
pub async fn revert(
    tx: &mut StoreTx,
    event: &LedgerEvent,
    block: BlockNumber,
) -> Result<(), LedgerError> {
    debug!(block = %block, event = event.name(), "Reverting event");
    match event {
        LedgerEvent::VaultDeployed { vault } => match tx.get_vault(vault).await? {
            None => {
                debug!(block = %block, vault = %vault, "Vault already removed");
                Ok(())
            }
            Some(current) if current.latest_block != block => Err(LedgerError::Conflict(format!(
                "vault {} changed at block {} after deployment at {}",
                vault, current.latest_block, block
            ))),
            Some(_) => {
                let restored = tx.revert_vault(vault, block).await?;
                info!(block = %block, vault = %vault, ?restored, "Vault deployment reverted");
                Ok(())
            }
        },
        LedgerEvent::Deposit {
            vault, provider, ..
        }
        | LedgerEvent::Withdraw {
            vault, provider, ..
        }
        | LedgerEvent::StashWithdrawn {
            vault, provider, ..
        } => {
            revert_vault_state(tx, vault, block).await?;
            let restored = tx.revert_provider(vault, provider, block).await?;
            info!(
                block = %block,
                vault = %vault,
                provider = %provider,
                ?restored,
                "{} reverted",
                event.name()
            );
            Ok(())
        }
        LedgerEvent::WithdrawalQueued {
            vault,
            provider,
            round_id,
            queued_before,
            queued_now,
            ..
        } => {
            let round = require_round_by_id(tx, vault, *round_id).await?;
            let round = transitions::unqueue_withdrawal(&round, queued_before, queued_now)?;
            tx.put_round(&round).await?;
            tx.revert_queued(provider, &round.address, block).await?;
            info!(block = %block, round = %round.address, provider = %provider, "Withdrawal queue reverted");
            Ok(())
        }
        LedgerEvent::RoundDeployed { vault, round, .. } => {
            let current = require_round(tx, round).await?;
            transitions::require_state(&current, RoundState::Open, RoundState::Open)?;
            tx.delete_round(round).await?;
            tx.revert_vault(vault, block).await?;
            info!(block = %block, vault = %vault, round = %round, "Option round deployment reverted");
            Ok(())
        }
        LedgerEvent::AuctionStarted { round, .. } => {
            let current = require_round(tx, round).await?;
            let reopened = transitions::unstart_auction(&current)?;
            tx.put_round(&reopened).await?;
            let providers = rewind_vault(tx, &current.vault_address, block).await?;
            info!(block = %block, round = %round, providers, "Auction start reverted");
            Ok(())
        }
        LedgerEvent::AuctionEnded { round, .. } => {
            let current = require_round(tx, round).await?;
            let reopened = transitions::unend_auction(&current)?;
            tx.put_round(&reopened).await?;
            let providers = rewind_vault(tx, &current.vault_address, block).await?;

            let mut cleared = 0usize;
            for mut position in tx.buyers_for_round(round).await? {
                if position.mintable_options.is_zero() && position.refundable_amount.is_zero() {
                    continue;
                }
                position.mintable_options = Amount::zero();
                position.refundable_amount = Amount::zero();
                tx.put_buyer(&position).await?;
                cleared += 1;
            }
            info!(block = %block, round = %round, providers, buyers = cleared, "Auction end reverted");
            Ok(())
        }
        LedgerEvent::RoundSettled { round, .. } => {
            let current = require_round(tx, round).await?;
            let running = transitions::unsettle_round(&current)?;
            tx.put_round(&running).await?;
            let providers = rewind_vault(tx, &current.vault_address, block).await?;
            info!(block = %block, round = %round, providers, "Settlement reverted");
            Ok(())
        }
        LedgerEvent::BidPlaced {
            round,
            bid_id,
            buyer,
            ..
        } => {
            if !tx.delete_bid(round, bid_id).await? {
                return Err(LedgerError::not_found("bid", format!("{}/{}", round, bid_id)));
            }
            let removed_buyer = remove_idle_buyer(tx, round, buyer).await?;
            info!(block = %block, round = %round, bid_id = %bid_id, removed_buyer, "Bid placement reverted");
            Ok(())
        }
        LedgerEvent::BidUpdated {
            round,
            bid_id,
            price_increase,
            nonce_before,
            nonce_after,
        } => {
            let bid = tx
                .get_bid(round, bid_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("bid", format!("{}/{}", round, bid_id)))?;
            let restored =
                transitions::revert_bid_update(&bid, price_increase, *nonce_before, *nonce_after)?;
            tx.put_bid(&restored).await?;
            info!(block = %block, round = %round, bid_id = %bid_id, nonce = restored.nonce, "Bid update reverted");
            Ok(())
        }
        LedgerEvent::OptionsMinted { round, buyer } => {
            unclaim(tx, round, buyer, BuyerFlag::Minted, block).await
        }
        LedgerEvent::OptionsExercised { round, buyer } => {
            unclaim(tx, round, buyer, BuyerFlag::Exercised, block).await
        }
        LedgerEvent::UnusedBidsRefunded { round, buyer } => {
            unclaim(tx, round, buyer, BuyerFlag::Refunded, block).await
        }
    }
}

/// Rewind the vault and every provider it moved at `block`.
async fn rewind_vault(
    tx: &mut StoreTx,
    vault: &Address,
    block: BlockNumber,
) -> Result<usize, LedgerError> {
    revert_vault_state(tx, vault, block).await?;
    Ok(tx.revert_providers_at(vault, block).await?)
}

/// Rewind the vault row to its state before `block`.
///
/// A vault deployed at `block` has no earlier state. The first revert to reach
/// it removes it and later reverts in the same block find it gone.
async fn revert_vault_state(
    tx: &mut StoreTx,
    vault: &Address,
    block: BlockNumber,
) -> Result<(), LedgerError> {
    match tx.revert_vault(vault, block).await? {
        Restored::Removed => {
            debug!(block = %block, vault = %vault, "Vault created in this block removed");
        }
        Restored::Untouched if tx.get_vault(vault).await?.is_none() => {
            debug!(block = %block, vault = %vault, "Vault already removed in this block");
        }
        _ => {}
    }
    Ok(())
}

/// Drop a buyer position that only existed because of the reverted bid.
async fn remove_idle_buyer(
    tx: &mut StoreTx,
    round: &Address,
    buyer: &Address,
) -> Result<bool, LedgerError> {
    if tx.count_buyer_bids(round, buyer).await? > 0 {
        return Ok(false);
    }
    let idle = match tx.get_buyer(round, buyer).await? {
        Some(position) => {
            position.mintable_options.is_zero()
                && position.refundable_amount.is_zero()
                && !position.has_minted
                && !position.has_refunded
                && !position.has_exercised
        }
        None => false,
    };
    if idle {
        tx.delete_buyer(round, buyer).await?;
    }
    Ok(idle)
}

async fn unclaim(
    tx: &mut StoreTx,
    round: &Address,
    buyer: &Address,
    flag: BuyerFlag,
    block: BlockNumber,
) -> Result<(), LedgerError> {
    set_flag(tx, round, buyer, flag, false).await?;
    info!(block = %block, round = %round, buyer = %buyer, flag = %flag, "Buyer claim reverted");
    Ok(())
}
