//! Forward handlers: one per event kind.

use crate::db::StoreTx;
use crate::domain::{
    Address, Amount, BlockNumber, BuyerFlag, LedgerEvent, LiquidityProvider, OptionBuyer,
    OptionRound, RoundState, Vault,
};
use crate::engine::transitions::{self, AuctionOutcome, NewBid, RoundTerms};
use crate::engine::{bid_book, ClearingPoint};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::LedgerError;

pub(super) async fn require_vault(tx: &mut StoreTx, address: &Address) -> Result<Vault, LedgerError> {
    tx.get_vault(address)
        .await?
        .ok_or_else(|| LedgerError::not_found("vault", address))
}

pub(super) async fn require_round(
    tx: &mut StoreTx,
    address: &Address,
) -> Result<OptionRound, LedgerError> {
    tx.get_round(address)
        .await?
        .ok_or_else(|| LedgerError::not_found("round", address))
}

pub(super) async fn require_round_by_id(
    tx: &mut StoreTx,
    vault: &Address,
    round_id: u64,
) -> Result<OptionRound, LedgerError> {
    tx.get_round_by_id(vault, round_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("round", format!("{}#{}", vault, round_id)))
}

async fn put_providers(tx: &mut StoreTx, providers: &[LiquidityProvider]) -> Result<(), LedgerError> {
    for lp in providers {
        tx.put_provider(lp).await?;
    }
    Ok(())
}

/// Apply one event inside the block transaction.
pub async fn apply(
    tx: &mut StoreTx,
    event: &LedgerEvent,
    block: BlockNumber,
) -> Result<(), LedgerError> {
    debug!(block = %block, event = event.name(), "Applying event");
    match event {
        LedgerEvent::VaultDeployed { vault } => vault_deployed(tx, vault, block).await,
        LedgerEvent::Deposit {
            vault,
            provider,
            provider_unlocked,
            vault_unlocked,
        }
        | LedgerEvent::Withdraw {
            vault,
            provider,
            provider_unlocked,
            vault_unlocked,
        } => {
            let current = require_vault(tx, vault).await?;
            let lp = tx.get_provider(vault, provider).await?;
            let (next, lp) = transitions::set_unlocked(
                &current,
                lp.as_ref(),
                provider,
                provider_unlocked,
                vault_unlocked,
                block,
            );
            tx.put_vault(&next).await?;
            tx.put_provider(&lp).await?;
            info!(
                block = %block,
                vault = %vault,
                provider = %provider,
                unlocked = %provider_unlocked,
                "{} applied",
                event.name()
            );
            Ok(())
        }
        LedgerEvent::WithdrawalQueued {
            vault,
            provider,
            round_id,
            bps,
            queued_before,
            queued_now,
            vault_queued_now,
        } => {
            let round = require_round_by_id(tx, vault, *round_id).await?;
            if let Some(existing) = tx.get_queued(provider, &round.address).await? {
                if &existing.queued_amount != queued_before {
                    warn!(
                        round = %round.address,
                        provider = %provider,
                        stored = %existing.queued_amount,
                        reported = %queued_before,
                        "Queued amount before event differs from tracked amount"
                    );
                }
            }
            let (round, queued) = transitions::queue_withdrawal(
                &round,
                provider,
                *bps,
                queued_now,
                vault_queued_now,
                block,
            )?;
            tx.put_round(&round).await?;
            tx.put_queued(&queued).await?;
            info!(block = %block, round = %round.address, provider = %provider, bps, "Withdrawal queued");
            Ok(())
        }
        LedgerEvent::StashWithdrawn {
            vault,
            provider,
            amount,
            vault_stashed_now,
        } => {
            let current = require_vault(tx, vault).await?;
            let lp = tx
                .get_provider(vault, provider)
                .await?
                .ok_or_else(|| LedgerError::not_found("liquidity provider", provider))?;
            let (next, lp) = transitions::withdraw_stash(&current, &lp, amount, vault_stashed_now, block);
            tx.put_vault(&next).await?;
            tx.put_provider(&lp).await?;
            info!(block = %block, vault = %vault, provider = %provider, amount = %amount, "Stash withdrawn");
            Ok(())
        }
        LedgerEvent::RoundDeployed {
            vault,
            round_id,
            round,
            auction_start_date,
            auction_end_date,
            settlement_date,
            strike_price,
            cap_level,
            reserve_price,
        } => {
            if tx.get_round(round).await?.is_some() {
                return Err(LedgerError::Conflict(format!("round {} already deployed", round)));
            }
            let current = require_vault(tx, vault).await?;
            let terms = RoundTerms {
                auction_start_date: *auction_start_date,
                auction_end_date: *auction_end_date,
                settlement_date: *settlement_date,
                strike_price: strike_price.clone(),
                cap_level: cap_level.clone(),
                reserve_price: reserve_price.clone(),
            };
            let (next, deployed) = transitions::deploy_round(&current, *round_id, round, terms, block)?;
            tx.put_vault(&next).await?;
            tx.put_round(&deployed).await?;
            info!(block = %block, vault = %vault, round = %round, round_id, "Option round deployed");
            Ok(())
        }
        LedgerEvent::AuctionStarted {
            round,
            available_options,
            starting_liquidity,
        } => auction_started(tx, round, available_options, starting_liquidity, block).await,
        LedgerEvent::AuctionEnded {
            round,
            options_sold,
            clearing_price,
            unsold_liquidity,
            clearing_nonce,
            premiums,
        } => {
            let outcome = AuctionOutcome {
                options_sold: options_sold.clone(),
                clearing_price: clearing_price.clone(),
                clearing_nonce: *clearing_nonce,
                unsold_liquidity: unsold_liquidity.clone(),
                premiums: premiums.clone(),
            };
            auction_ended(tx, round, &outcome, block).await
        }
        LedgerEvent::RoundSettled {
            round,
            settlement_price,
            payout_per_option,
        } => round_settled(tx, round, settlement_price, payout_per_option, block).await,
        LedgerEvent::BidPlaced {
            round,
            bid_id,
            buyer,
            amount,
            price,
            nonce,
        } => {
            let current = require_round(tx, round).await?;
            let existing = tx.get_bid(round, bid_id).await?;
            let bid = transitions::place_bid(
                &current,
                existing.as_ref(),
                NewBid {
                    bid_id: bid_id.clone(),
                    buyer: buyer.clone(),
                    amount: amount.clone(),
                    price: price.clone(),
                    nonce: *nonce,
                },
                block,
            )?;
            tx.put_bid(&bid).await?;
            if tx.get_buyer(round, buyer).await?.is_none() {
                tx.put_buyer(&OptionBuyer::new(round.clone(), buyer.clone()))
                    .await?;
            }
            info!(block = %block, round = %round, bid_id = %bid_id, buyer = %buyer, nonce, "Bid placed");
            Ok(())
        }
        LedgerEvent::BidUpdated {
            round,
            bid_id,
            price_increase,
            nonce_before,
            nonce_after,
        } => {
            let current = require_round(tx, round).await?;
            transitions::require_state(&current, RoundState::Auctioning, RoundState::Auctioning)?;
            let bid = tx
                .get_bid(round, bid_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("bid", format!("{}/{}", round, bid_id)))?;
            let updated = transitions::update_bid(&bid, price_increase, *nonce_before, *nonce_after)?;
            tx.put_bid(&updated).await?;
            info!(block = %block, round = %round, bid_id = %bid_id, price = %updated.price, "Bid updated");
            Ok(())
        }
        LedgerEvent::OptionsMinted { round, buyer } => {
            claim(tx, round, buyer, BuyerFlag::Minted, block).await
        }
        LedgerEvent::OptionsExercised { round, buyer } => {
            claim(tx, round, buyer, BuyerFlag::Exercised, block).await
        }
        LedgerEvent::UnusedBidsRefunded { round, buyer } => {
            claim(tx, round, buyer, BuyerFlag::Refunded, block).await
        }
    }
}

async fn claim(
    tx: &mut StoreTx,
    round: &Address,
    buyer: &Address,
    flag: BuyerFlag,
    block: BlockNumber,
) -> Result<(), LedgerError> {
    set_flag(tx, round, buyer, flag, true).await?;
    info!(block = %block, round = %round, buyer = %buyer, flag = %flag, "Buyer claim recorded");
    Ok(())
}

async fn vault_deployed(
    tx: &mut StoreTx,
    vault: &Address,
    block: BlockNumber,
) -> Result<(), LedgerError> {
    if tx.get_vault(vault).await?.is_some() {
        return Err(LedgerError::Conflict(format!("vault {} already deployed", vault)));
    }
    tx.put_vault(&Vault::new(vault.clone(), block)).await?;
    info!(block = %block, vault = %vault, "Vault deployed");
    Ok(())
}

async fn auction_started(
    tx: &mut StoreTx,
    round_address: &Address,
    available_options: &Amount,
    starting_liquidity: &Amount,
    block: BlockNumber,
) -> Result<(), LedgerError> {
    let round = require_round(tx, round_address).await?;
    let started = transitions::start_auction(&round, available_options, starting_liquidity)?;
    let vault = require_vault(tx, &round.vault_address).await?;
    let providers = tx.providers_for_vault(&round.vault_address).await?;

    let (vault, locked) = transitions::lock_liquidity(&vault, &providers, block);
    if vault.locked_balance != *starting_liquidity {
        warn!(
            round = %round_address,
            locked = %vault.locked_balance,
            starting = %starting_liquidity,
            "Vault locked balance differs from reported starting liquidity"
        );
    }

    tx.put_round(&started).await?;
    tx.put_vault(&vault).await?;
    put_providers(tx, &locked).await?;
    info!(
        block = %block,
        round = %round_address,
        providers = locked.len(),
        starting = %starting_liquidity,
        "Auction started"
    );
    Ok(())
}

async fn auction_ended(
    tx: &mut StoreTx,
    round_address: &Address,
    outcome: &AuctionOutcome,
    block: BlockNumber,
) -> Result<(), LedgerError> {
    let round = require_round(tx, round_address).await?;
    let ended = transitions::end_auction(&round, outcome)?;
    let vault = require_vault(tx, &round.vault_address).await?;
    let providers = tx.providers_for_vault(&round.vault_address).await?;
    let (vault, released) = transitions::release_unsold(&vault, &providers, &ended, block)?;

    tx.put_round(&ended).await?;
    tx.put_vault(&vault).await?;
    put_providers(tx, &released).await?;

    let bids = tx.bids_for_round(round_address).await?;
    let allocations = bid_book::clear(
        &bids,
        &ClearingPoint {
            clearing_price: outcome.clearing_price.clone(),
            clearing_nonce: outcome.clearing_nonce,
            options_sold: outcome.options_sold.clone(),
        },
    );
    let minted: Amount = allocations.iter().map(|a| a.mintable.clone()).sum();
    if minted != outcome.options_sold {
        warn!(
            round = %round_address,
            mintable = %minted,
            sold = %outcome.options_sold,
            "Cleared bids do not account for every option sold"
        );
    }

    let totals = bid_book::buyer_totals(&allocations);
    for (buyer, (mintable, refundable)) in &totals {
        let mut position = tx
            .get_buyer(round_address, buyer)
            .await?
            .unwrap_or_else(|| OptionBuyer::new(round_address.clone(), buyer.clone()));
        position.mintable_options = mintable.clone();
        position.refundable_amount = refundable.clone();
        tx.put_buyer(&position).await?;
    }

    info!(
        block = %block,
        round = %round_address,
        sold = %outcome.options_sold,
        clearing_price = %outcome.clearing_price,
        bids = bids.len(),
        buyers = totals.len(),
        "Auction ended"
    );
    Ok(())
}

async fn round_settled(
    tx: &mut StoreTx,
    round_address: &Address,
    settlement_price: &Amount,
    payout_per_option: &Amount,
    block: BlockNumber,
) -> Result<(), LedgerError> {
    let round = require_round(tx, round_address).await?;
    let settled = transitions::settle_round(&round, settlement_price, payout_per_option)?;
    let vault = require_vault(tx, &round.vault_address).await?;
    let providers = tx.providers_for_vault(&round.vault_address).await?;

    let queued: HashMap<Address, Amount> = tx
        .queued_for_round(round_address)
        .await?
        .into_iter()
        .map(|q| (q.provider, q.queued_amount))
        .collect();
    let paired: Vec<(LiquidityProvider, Amount)> = providers
        .into_iter()
        .map(|lp| {
            let q = queued.get(&lp.address).cloned().unwrap_or_default();
            (lp, q)
        })
        .collect();

    let (vault, distributed) = transitions::distribute_settlement(&vault, &paired, &settled, block)?;
    tx.put_round(&settled).await?;
    tx.put_vault(&vault).await?;
    put_providers(tx, &distributed).await?;
    info!(
        block = %block,
        round = %round_address,
        payout = %settled.total_payout,
        remaining = %settled.remaining_liquidity,
        "Round settled"
    );
    Ok(())
}

/// Set or clear a buyer flag. Shared with the revert path.
pub(super) async fn set_flag(
    tx: &mut StoreTx,
    round: &Address,
    buyer: &Address,
    flag: BuyerFlag,
    value: bool,
) -> Result<(), LedgerError> {
    let position = tx
        .get_buyer(round, buyer)
        .await?
        .ok_or_else(|| LedgerError::not_found("option buyer", format!("{}/{}", round, buyer)))?;
    let next = transitions::set_buyer_flag(&position, flag, value)?;
    tx.put_buyer(&next).await?;
    Ok(())
}
