//! Pure state transitions for every ledger event.
//!
//! Each function takes the current snapshots plus the event payload and
//! returns new snapshots. Nothing here touches the store; the ledger engine
//! loads the inputs and persists the outputs inside the block transaction.

use crate::domain::{
    Address, Amount, Bid, BlockNumber, BuyerFlag, LiquidityProvider, OptionBuyer, OptionRound,
    QueuedWithdrawal, RoundState, Vault,
};
use crate::engine::settlement::{self, ZeroDivisor};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("round {round}: cannot move from {from} to {to}")]
    InvalidTransition {
        round: Address,
        from: RoundState,
        to: RoundState,
    },
    #[error("underflow: {0}")]
    Underflow(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

fn sub(lhs: &Amount, rhs: &Amount, what: &str) -> Result<Amount, TransitionError> {
    lhs.checked_sub(rhs)
        .ok_or_else(|| TransitionError::Underflow(format!("{}: {} - {}", what, lhs, rhs)))
}

/// Move `round` one step from `from` to `to`, or fail without touching it.
fn step(round: &OptionRound, from: RoundState, to: RoundState) -> Result<OptionRound, TransitionError> {
    if round.state != from {
        return Err(TransitionError::InvalidTransition {
            round: round.address.clone(),
            from: round.state,
            to,
        });
    }
    let mut next = round.clone();
    next.state = to;
    Ok(next)
}

/// Fails unless `round` is in `expected`. `action` names the attempted move.
pub fn require_state(
    round: &OptionRound,
    expected: RoundState,
    action: RoundState,
) -> Result<(), TransitionError> {
    if round.state == expected {
        Ok(())
    } else {
        Err(TransitionError::InvalidTransition {
            round: round.address.clone(),
            from: round.state,
            to: action,
        })
    }
}

// ---------------------------------------------------------------------------
// Vault-scoped
// ---------------------------------------------------------------------------

/// Deposit and Withdraw carry absolute post-event unlocked balances.
pub fn set_unlocked(
    vault: &Vault,
    provider: Option<&LiquidityProvider>,
    provider_address: &Address,
    provider_unlocked: &Amount,
    vault_unlocked: &Amount,
    block: BlockNumber,
) -> (Vault, LiquidityProvider) {
    let mut vault = vault.clone();
    vault.unlocked_balance = vault_unlocked.clone();
    vault.latest_block = block;

    let mut lp = provider.cloned().unwrap_or_else(|| {
        LiquidityProvider::new(vault.address.clone(), provider_address.clone(), block)
    });
    lp.unlocked_balance = provider_unlocked.clone();
    lp.latest_block = block;
    (vault, lp)
}

/// The provider collects all of its stash.
pub fn withdraw_stash(
    vault: &Vault,
    provider: &LiquidityProvider,
    amount: &Amount,
    vault_stashed_now: &Amount,
    block: BlockNumber,
) -> (Vault, LiquidityProvider) {
    if &provider.stashed_balance != amount {
        warn!(
            provider = %provider.address,
            stored = %provider.stashed_balance,
            collected = %amount,
            "Collected stash differs from tracked stash"
        );
    }
    let mut vault = vault.clone();
    vault.stashed_balance = vault_stashed_now.clone();
    vault.latest_block = block;

    let mut lp = provider.clone();
    lp.stashed_balance = Amount::zero();
    lp.latest_block = block;
    (vault, lp)
}

/// Round schedule and pricing fixed at deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTerms {
    pub auction_start_date: u64,
    pub auction_end_date: u64,
    pub settlement_date: u64,
    pub strike_price: Amount,
    pub cap_level: Amount,
    pub reserve_price: Amount,
}

/// Create an `Open` round and point the vault at it. Round ids only grow.
pub fn deploy_round(
    vault: &Vault,
    round_id: u64,
    round_address: &Address,
    terms: RoundTerms,
    block: BlockNumber,
) -> Result<(Vault, OptionRound), TransitionError> {
    if round_id <= vault.current_round_id {
        return Err(TransitionError::Conflict(format!(
            "vault {} deployed round {} after round {}",
            vault.address, round_id, vault.current_round_id
        )));
    }
    let mut vault = vault.clone();
    vault.current_round_id = round_id;
    vault.current_round_address = Some(round_address.clone());
    vault.latest_block = block;

    let round = OptionRound {
        address: round_address.clone(),
        vault_address: vault.address.clone(),
        round_id,
        state: RoundState::Open,
        deployed_block: block,
        auction_start_date: terms.auction_start_date,
        auction_end_date: terms.auction_end_date,
        settlement_date: terms.settlement_date,
        strike_price: terms.strike_price,
        cap_level: terms.cap_level,
        reserve_price: terms.reserve_price,
        available_options: Amount::zero(),
        starting_liquidity: Amount::zero(),
        queued_liquidity: Amount::zero(),
        clearing_price: Amount::zero(),
        clearing_nonce: 0,
        options_sold: Amount::zero(),
        unsold_liquidity: Amount::zero(),
        premiums: Amount::zero(),
        settlement_price: Amount::zero(),
        payout_per_option: Amount::zero(),
        total_payout: Amount::zero(),
        remaining_liquidity: Amount::zero(),
    };
    Ok((vault, round))
}

/// Record a provider's queued amount and the round's new queued total.
/// Only legal while the round is auctioning.
pub fn queue_withdrawal(
    round: &OptionRound,
    provider: &Address,
    bps: u64,
    queued_now: &Amount,
    round_queued_now: &Amount,
    block: BlockNumber,
) -> Result<(OptionRound, QueuedWithdrawal), TransitionError> {
    require_state(round, RoundState::Auctioning, RoundState::Auctioning)?;
    let mut round = round.clone();
    round.queued_liquidity = round_queued_now.clone();
    let queued = QueuedWithdrawal {
        provider: provider.clone(),
        round_address: round.address.clone(),
        bps,
        queued_amount: queued_now.clone(),
        latest_block: block,
    };
    Ok((round, queued))
}

/// Undo a queue event on the round total: `total += before - now`.
pub fn unqueue_withdrawal(
    round: &OptionRound,
    queued_before: &Amount,
    queued_now: &Amount,
) -> Result<OptionRound, TransitionError> {
    let mut round = round.clone();
    round.queued_liquidity = if queued_now >= queued_before {
        let delta = sub(queued_now, queued_before, "queued delta")?;
        sub(&round.queued_liquidity, &delta, "round queued liquidity")?
    } else {
        let delta = sub(queued_before, queued_now, "queued delta")?;
        &round.queued_liquidity + &delta
    };
    Ok(round)
}

// ---------------------------------------------------------------------------
// Round lifecycle
// ---------------------------------------------------------------------------

/// Open -> Auctioning.
pub fn start_auction(
    round: &OptionRound,
    available_options: &Amount,
    starting_liquidity: &Amount,
) -> Result<OptionRound, TransitionError> {
    let mut next = step(round, RoundState::Open, RoundState::Auctioning)?;
    next.available_options = available_options.clone();
    next.starting_liquidity = starting_liquidity.clone();
    Ok(next)
}

/// Auctioning -> Open.
pub fn unstart_auction(round: &OptionRound) -> Result<OptionRound, TransitionError> {
    let mut prev = step(round, RoundState::Auctioning, RoundState::Open)?;
    prev.available_options = Amount::zero();
    prev.starting_liquidity = Amount::zero();
    Ok(prev)
}

/// All unlocked liquidity becomes locked for the auction.
pub fn lock_liquidity(
    vault: &Vault,
    providers: &[LiquidityProvider],
    block: BlockNumber,
) -> (Vault, Vec<LiquidityProvider>) {
    let mut vault = vault.clone();
    vault.locked_balance = &vault.locked_balance + &vault.unlocked_balance;
    vault.unlocked_balance = Amount::zero();
    vault.latest_block = block;

    let providers = providers
        .iter()
        .filter(|lp| lp.unlocked_balance.is_positive())
        .map(|lp| {
            let mut lp = lp.clone();
            lp.locked_balance = &lp.locked_balance + &lp.unlocked_balance;
            lp.unlocked_balance = Amount::zero();
            lp.latest_block = block;
            lp
        })
        .collect();
    (vault, providers)
}

/// Auction outcome as reported on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionOutcome {
    pub options_sold: Amount,
    pub clearing_price: Amount,
    pub clearing_nonce: u64,
    pub unsold_liquidity: Amount,
    pub premiums: Amount,
}

/// Auctioning -> Running.
pub fn end_auction(
    round: &OptionRound,
    outcome: &AuctionOutcome,
) -> Result<OptionRound, TransitionError> {
    let mut next = step(round, RoundState::Auctioning, RoundState::Running)?;
    next.options_sold = outcome.options_sold.clone();
    next.clearing_price = outcome.clearing_price.clone();
    next.clearing_nonce = outcome.clearing_nonce;
    next.unsold_liquidity = outcome.unsold_liquidity.clone();
    next.premiums = outcome.premiums.clone();
    Ok(next)
}

/// Running -> Auctioning.
pub fn unend_auction(round: &OptionRound) -> Result<OptionRound, TransitionError> {
    let mut prev = step(round, RoundState::Running, RoundState::Auctioning)?;
    prev.options_sold = Amount::zero();
    prev.clearing_price = Amount::zero();
    prev.clearing_nonce = 0;
    prev.unsold_liquidity = Amount::zero();
    prev.premiums = Amount::zero();
    Ok(prev)
}

/// Unsold liquidity and premiums flow back to unlocked, pro rata by locked
/// balance against the round's starting liquidity.
///
/// Providers are only touched if the distribution is well defined; a zero
/// starting liquidity is logged and leaves them as they were.
pub fn release_unsold(
    vault: &Vault,
    providers: &[LiquidityProvider],
    round: &OptionRound,
    block: BlockNumber,
) -> Result<(Vault, Vec<LiquidityProvider>), TransitionError> {
    let mut vault = vault.clone();
    vault.unlocked_balance = &(&vault.unlocked_balance + &round.unsold_liquidity) + &round.premiums;
    vault.locked_balance = sub(
        &vault.locked_balance,
        &round.unsold_liquidity,
        "vault locked at auction end",
    )?;
    vault.latest_block = block;

    let mut updated = Vec::with_capacity(providers.len());
    for lp in providers.iter().filter(|lp| lp.locked_balance.is_positive()) {
        let share = match settlement::auction_end_share(
            &lp.locked_balance,
            &round.unsold_liquidity,
            &round.premiums,
            &round.starting_liquidity,
        ) {
            Ok(share) => share,
            Err(ZeroDivisor) => {
                warn!(
                    round = %round.address,
                    "Zero starting liquidity at auction end, skipping provider distribution"
                );
                return Ok((vault, Vec::new()));
            }
        };
        let mut lp = lp.clone();
        lp.unlocked_balance = &lp.unlocked_balance + &share.unlocked_credit;
        lp.locked_balance = sub(&lp.locked_balance, &share.locked_debit, "provider locked")?;
        lp.latest_block = block;
        updated.push(lp);
    }
    Ok((vault, updated))
}

/// Running -> Settled, fixing payout and what is left for providers.
pub fn settle_round(
    round: &OptionRound,
    settlement_price: &Amount,
    payout_per_option: &Amount,
) -> Result<OptionRound, TransitionError> {
    let mut next = step(round, RoundState::Running, RoundState::Settled)?;
    let total_payout = round.compute_total_payout(payout_per_option);
    next.remaining_liquidity = settlement::remaining_liquidity(
        &round.starting_liquidity,
        &round.unsold_liquidity,
        &total_payout,
    )
    .ok_or_else(|| {
        TransitionError::Underflow(format!(
            "round {} payout {} exceeds sold liquidity",
            round.address, total_payout
        ))
    })?;
    next.settlement_price = settlement_price.clone();
    next.payout_per_option = payout_per_option.clone();
    next.total_payout = total_payout;
    Ok(next)
}

/// Settled -> Running.
pub fn unsettle_round(round: &OptionRound) -> Result<OptionRound, TransitionError> {
    let mut prev = step(round, RoundState::Settled, RoundState::Running)?;
    prev.settlement_price = Amount::zero();
    prev.payout_per_option = Amount::zero();
    prev.total_payout = Amount::zero();
    prev.remaining_liquidity = Amount::zero();
    Ok(prev)
}

/// Split a settled round's remaining liquidity into stash and unlocked.
///
/// `providers` pairs each provider with its queued amount for this round.
/// Shares are weighted against the providers' summed locked balance, not the
/// vault's, so provider credits never exceed the remaining liquidity. Locked
/// balances go to zero; per-provider rounding dust stays with the vault.
pub fn distribute_settlement(
    vault: &Vault,
    providers: &[(LiquidityProvider, Amount)],
    settled: &OptionRound,
    block: BlockNumber,
) -> Result<(Vault, Vec<LiquidityProvider>), TransitionError> {
    let locked_pool: Amount = providers
        .iter()
        .map(|(lp, _)| lp.locked_balance.clone())
        .sum();
    let remaining = &settled.remaining_liquidity;

    let vault_stash = match settlement::pro_rata(
        &settled.queued_liquidity,
        remaining,
        &settled.starting_liquidity,
    ) {
        Ok(stash) => std::cmp::min(stash, remaining.clone()),
        Err(ZeroDivisor) => {
            warn!(round = %settled.address, "Zero starting liquidity at settlement, nothing stashed");
            Amount::zero()
        }
    };

    let mut vault = vault.clone();
    vault.stashed_balance = &vault.stashed_balance + &vault_stash;
    vault.unlocked_balance =
        &vault.unlocked_balance + &sub(remaining, &vault_stash, "vault unlocked at settlement")?;
    vault.locked_balance = Amount::zero();
    vault.latest_block = block;

    let mut updated = Vec::with_capacity(providers.len());
    for (lp, queued) in providers {
        if !lp.locked_balance.is_positive() {
            continue;
        }
        let share = match settlement::settlement_share(
            &lp.locked_balance,
            &locked_pool,
            remaining,
            queued,
            &settled.starting_liquidity,
        ) {
            Ok(share) => share,
            Err(ZeroDivisor) => {
                warn!(
                    round = %settled.address,
                    provider = %lp.address,
                    "Zero divisor in settlement share, provider left locked"
                );
                continue;
            }
        };
        let mut lp = lp.clone();
        lp.stashed_balance = &lp.stashed_balance + &share.stashed_credit;
        lp.unlocked_balance = &lp.unlocked_balance + &share.unlocked_credit;
        lp.locked_balance = Amount::zero();
        lp.latest_block = block;
        updated.push(lp);
    }
    Ok((vault, updated))
}

// ---------------------------------------------------------------------------
// Bids and buyers
// ---------------------------------------------------------------------------

/// New bid fields as reported on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBid {
    pub bid_id: String,
    pub buyer: Address,
    pub amount: Amount,
    pub price: Amount,
    pub nonce: u64,
}

pub fn place_bid(
    round: &OptionRound,
    existing: Option<&Bid>,
    new: NewBid,
    block: BlockNumber,
) -> Result<Bid, TransitionError> {
    require_state(round, RoundState::Auctioning, RoundState::Auctioning)?;
    if existing.is_some() {
        return Err(TransitionError::Conflict(format!(
            "bid {} already exists in round {}",
            new.bid_id, round.address
        )));
    }
    Ok(Bid {
        round_address: round.address.clone(),
        bid_id: new.bid_id,
        buyer: new.buyer,
        amount: new.amount,
        price: new.price,
        nonce: new.nonce,
        placed_block: block,
    })
}

/// Raise a bid's price. The nonce moves from `nonce_before` to `nonce_after`.
pub fn update_bid(
    bid: &Bid,
    price_increase: &Amount,
    nonce_before: u64,
    nonce_after: u64,
) -> Result<Bid, TransitionError> {
    if bid.nonce != nonce_before || nonce_after <= nonce_before {
        return Err(TransitionError::Conflict(format!(
            "bid {} at nonce {} cannot move {} -> {}",
            bid.bid_id, bid.nonce, nonce_before, nonce_after
        )));
    }
    let mut bid = bid.clone();
    bid.price = &bid.price + price_increase;
    bid.nonce = nonce_after;
    Ok(bid)
}

pub fn revert_bid_update(
    bid: &Bid,
    price_increase: &Amount,
    nonce_before: u64,
    nonce_after: u64,
) -> Result<Bid, TransitionError> {
    if bid.nonce != nonce_after {
        return Err(TransitionError::Conflict(format!(
            "bid {} at nonce {} is not the result of update to {}",
            bid.bid_id, bid.nonce, nonce_after
        )));
    }
    let mut bid = bid.clone();
    bid.price = sub(&bid.price, price_increase, "bid price")?;
    bid.nonce = nonce_before;
    Ok(bid)
}

/// Set (`value = true`) or clear a set-once buyer flag.
pub fn set_buyer_flag(
    buyer: &OptionBuyer,
    flag: BuyerFlag,
    value: bool,
) -> Result<OptionBuyer, TransitionError> {
    if buyer.flag(flag) == value {
        return Err(TransitionError::Conflict(format!(
            "buyer {} in round {}: {} already {}",
            buyer.address, buyer.round_address, flag, value
        )));
    }
    let mut next = buyer.clone();
    next.set_flag(flag, value);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: u64) -> Amount {
        Amount::from(v)
    }

    fn addr(s: &str) -> Address {
        Address::new(s.to_string())
    }

    fn b(v: u64) -> BlockNumber {
        BlockNumber::new(v)
    }

    fn terms() -> RoundTerms {
        RoundTerms {
            auction_start_date: 100,
            auction_end_date: 200,
            settlement_date: 300,
            strike_price: n(1000),
            cap_level: n(5000),
            reserve_price: n(2),
        }
    }

    fn lp(address: &str, unlocked: u64, locked: u64) -> LiquidityProvider {
        let mut lp = LiquidityProvider::new(addr("0xv"), addr(address), b(1));
        lp.unlocked_balance = n(unlocked);
        lp.locked_balance = n(locked);
        lp
    }

    fn fresh_round() -> (Vault, OptionRound) {
        let vault = Vault::new(addr("0xv"), b(1));
        deploy_round(&vault, 1, &addr("0xr1"), terms(), b(2)).unwrap()
    }

    #[test]
    fn test_deploy_round_points_vault_and_opens() {
        let (vault, round) = fresh_round();
        assert_eq!(vault.current_round_id, 1);
        assert_eq!(vault.current_round_address, Some(addr("0xr1")));
        assert_eq!(round.state, RoundState::Open);
        assert_eq!(round.strike_price, n(1000));

        let err = deploy_round(&vault, 1, &addr("0xr2"), terms(), b(3)).unwrap_err();
        assert!(matches!(err, TransitionError::Conflict(_)));
    }

    #[test]
    fn test_lifecycle_forward_and_back_one_step() {
        let (_, open) = fresh_round();
        let auctioning = start_auction(&open, &n(10), &n(1000)).unwrap();
        assert!(matches!(
            settle_round(&auctioning, &n(1), &n(1)),
            Err(TransitionError::InvalidTransition { .. })
        ));
        let outcome = AuctionOutcome {
            options_sold: n(8),
            clearing_price: n(10),
            clearing_nonce: 1,
            unsold_liquidity: n(100),
            premiums: n(80),
        };
        let running = end_auction(&auctioning, &outcome).unwrap();
        let settled = settle_round(&running, &n(1200), &n(5)).unwrap();
        assert_eq!(settled.total_payout, n(40));
        assert_eq!(settled.remaining_liquidity, n(860));

        assert_eq!(unsettle_round(&settled).unwrap(), running);
        assert_eq!(unend_auction(&running).unwrap(), auctioning);
        assert_eq!(unstart_auction(&auctioning).unwrap(), open);
        assert!(unstart_auction(&open).is_err());
    }

    #[test]
    fn test_settle_rejects_payout_beyond_sold_liquidity() {
        let (_, open) = fresh_round();
        let auctioning = start_auction(&open, &n(10), &n(100)).unwrap();
        let outcome = AuctionOutcome {
            options_sold: n(10),
            clearing_price: n(1),
            clearing_nonce: 0,
            unsold_liquidity: n(0),
            premiums: n(10),
        };
        let running = end_auction(&auctioning, &outcome).unwrap();
        assert!(matches!(
            settle_round(&running, &n(1), &n(11)),
            Err(TransitionError::Underflow(_))
        ));
    }

    #[test]
    fn test_lock_liquidity_skips_empty_providers() {
        let mut vault = Vault::new(addr("0xv"), b(1));
        vault.unlocked_balance = n(150);
        let providers = vec![lp("0xa", 100, 0), lp("0xb", 0, 0), lp("0xc", 50, 0)];
        let (vault, locked) = lock_liquidity(&vault, &providers, b(5));
        assert_eq!(vault.locked_balance, n(150));
        assert_eq!(vault.unlocked_balance, n(0));
        assert_eq!(locked.len(), 2);
        assert!(locked.iter().all(|lp| lp.latest_block == b(5)));
        assert_eq!(locked[1].locked_balance, n(50));
    }

    #[test]
    fn test_release_unsold_conserves_plus_premiums() {
        let mut vault = Vault::new(addr("0xv"), b(1));
        vault.locked_balance = n(1000);
        let providers = vec![lp("0xa", 0, 600), lp("0xb", 0, 400)];
        let (_, open) = fresh_round();
        let mut round = start_auction(&open, &n(10), &n(1000)).unwrap();
        round.unsold_liquidity = n(100);
        round.premiums = n(50);

        let before = vault.total_balance();
        let (after, lps) = release_unsold(&vault, &providers, &round, b(6)).unwrap();
        assert_eq!(after.total_balance(), &before + &n(50));
        assert_eq!(after.locked_balance, n(900));
        assert_eq!(lps[0].unlocked_balance, n(90));
        assert_eq!(lps[0].locked_balance, n(540));
        assert_eq!(lps[1].unlocked_balance, n(60));
        assert_eq!(lps[1].locked_balance, n(360));
        let lp_locked: Amount = lps.iter().map(|lp| lp.locked_balance.clone()).sum();
        assert_eq!(lp_locked, after.locked_balance);
    }

    #[test]
    fn test_release_unsold_zero_starting_skips_providers() {
        let vault = Vault::new(addr("0xv"), b(1));
        let (_, round) = fresh_round();
        let (_, lps) = release_unsold(&vault, &[lp("0xa", 0, 10)], &round, b(6)).unwrap();
        assert!(lps.is_empty());
    }

    #[test]
    fn test_distribute_settlement_conserves_minus_payout() {
        let mut vault = Vault::new(addr("0xv"), b(1));
        vault.locked_balance = n(900);
        vault.unlocked_balance = n(150);
        let (_, mut round) = fresh_round();
        round.state = RoundState::Settled;
        round.starting_liquidity = n(1000);
        round.unsold_liquidity = n(100);
        round.queued_liquidity = n(300);
        round.total_payout = n(200);
        round.remaining_liquidity = n(700);

        let providers = vec![(lp("0xa", 90, 540), n(300)), (lp("0xb", 60, 360), n(0))];
        let before = vault.total_balance();
        let (after, lps) = distribute_settlement(&vault, &providers, &round, b(9)).unwrap();

        assert_eq!(&after.total_balance() + &n(200), before);
        assert_eq!(after.locked_balance, n(0));
        assert_eq!(after.stashed_balance, n(210));
        assert_eq!(lps[0].stashed_balance, n(210));
        assert_eq!(lps[0].unlocked_balance, n(300));
        assert_eq!(lps[1].stashed_balance, n(0));
        assert_eq!(lps[1].unlocked_balance, n(340));
        assert!(lps.iter().all(|lp| lp.locked_balance.is_zero()));
    }

    #[test]
    fn test_distribute_settlement_never_credits_beyond_remaining() {
        // Auction-end flooring left providers holding 125 locked against the
        // vault's 122.
        let mut vault = Vault::new(addr("0xv"), b(1));
        vault.locked_balance = n(122);
        vault.unlocked_balance = n(57);
        let (_, mut round) = fresh_round();
        round.state = RoundState::Settled;
        round.starting_liquidity = n(176);
        round.unsold_liquidity = n(54);
        round.total_payout = n(3);
        round.remaining_liquidity = n(119);

        let providers: Vec<(LiquidityProvider, Amount)> = [34, 21, 22, 30, 18]
            .iter()
            .enumerate()
            .map(|(i, locked)| (lp(&format!("0xa{}", i), 0, *locked), n(0)))
            .collect();
        let (after, lps) = distribute_settlement(&vault, &providers, &round, b(9)).unwrap();

        let credited: Amount = lps.iter().map(|lp| lp.unlocked_balance.clone()).sum();
        assert!(credited <= round.remaining_liquidity);
        assert_eq!(credited, n(116));
        let each: Vec<Amount> = lps.iter().map(|lp| lp.unlocked_balance.clone()).collect();
        assert_eq!(each, vec![n(32), n(19), n(20), n(28), n(17)]);
        assert_eq!(after.unlocked_balance, n(176));
    }

    #[test]
    fn test_queue_and_unqueue_round_total() {
        let (_, open) = fresh_round();
        assert!(queue_withdrawal(&open, &addr("0xa"), 5000, &n(10), &n(10), b(3)).is_err());

        let auctioning = start_auction(&open, &n(10), &n(1000)).unwrap();
        let (queued, record) =
            queue_withdrawal(&auctioning, &addr("0xa"), 5000, &n(300), &n(300), b(3)).unwrap();
        assert_eq!(queued.queued_liquidity, n(300));
        assert_eq!(record.queued_amount, n(300));

        let back = unqueue_withdrawal(&queued, &n(0), &n(300)).unwrap();
        assert_eq!(back.queued_liquidity, n(0));

        // lowering a queue restores upward
        let mut lowered = queued.clone();
        lowered.queued_liquidity = n(100);
        let back = unqueue_withdrawal(&lowered, &n(300), &n(100)).unwrap();
        assert_eq!(back.queued_liquidity, n(300));
    }

    #[test]
    fn test_bid_update_and_revert() {
        let (_, open) = fresh_round();
        let new = NewBid {
            bid_id: "0x1".to_string(),
            buyer: addr("0xb"),
            amount: n(5),
            price: n(10),
            nonce: 0,
        };
        assert!(place_bid(&open, None, new.clone(), b(3)).is_err());

        let auctioning = start_auction(&open, &n(10), &n(1000)).unwrap();
        let bid = place_bid(&auctioning, None, new.clone(), b(3)).unwrap();
        assert!(place_bid(&auctioning, Some(&bid), new, b(3)).is_err());

        let raised = update_bid(&bid, &n(4), 0, 3).unwrap();
        assert_eq!(raised.price, n(14));
        assert_eq!(raised.nonce, 3);
        assert!(update_bid(&raised, &n(1), 0, 4).is_err());

        assert_eq!(revert_bid_update(&raised, &n(4), 0, 3).unwrap(), bid);
        assert!(revert_bid_update(&bid, &n(4), 0, 3).is_err());
    }

    #[test]
    fn test_buyer_flags_set_once() {
        let buyer = OptionBuyer::new(addr("0xr"), addr("0xb"));
        let minted = set_buyer_flag(&buyer, BuyerFlag::Minted, true).unwrap();
        assert!(minted.has_minted);
        assert!(!minted.has_exercised);
        assert!(set_buyer_flag(&minted, BuyerFlag::Minted, true).is_err());
        assert_eq!(set_buyer_flag(&minted, BuyerFlag::Minted, false).unwrap(), buyer);
        assert!(set_buyer_flag(&buyer, BuyerFlag::Refunded, false).is_err());
    }

    #[test]
    fn test_set_unlocked_creates_provider() {
        let vault = Vault::new(addr("0xv"), b(1));
        let (vault, lp) = set_unlocked(&vault, None, &addr("0xa"), &n(100), &n(100), b(10));
        assert_eq!(vault.unlocked_balance, n(100));
        assert_eq!(lp.unlocked_balance, n(100));
        assert_eq!(lp.latest_block, b(10));
        assert_eq!(lp.vault_address, addr("0xv"));
    }

    #[test]
    fn test_withdraw_stash_zeroes_provider() {
        let mut vault = Vault::new(addr("0xv"), b(1));
        vault.stashed_balance = n(250);
        let mut provider = lp("0xa", 0, 0);
        provider.stashed_balance = n(210);
        let (vault, provider) = withdraw_stash(&vault, &provider, &n(210), &n(40), b(12));
        assert_eq!(vault.stashed_balance, n(40));
        assert_eq!(provider.stashed_balance, n(0));
    }
}
