//! Pro-rata distribution arithmetic for auction end and round settlement.
//!
//! All divisions floor. Rounding dust is never handed to a provider: it stays
//! in the vault-level aggregate, so the sum of provider shares can trail the
//! distributed total by strictly less than the number of providers.

use crate::domain::Amount;
use thiserror::Error;

/// A pro-rata distribution was asked to divide by a zero reference total.
///
/// Recoverable: the caller skips that distribution and logs the inconsistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pro-rata distribution over a zero reference total")]
pub struct ZeroDivisor;

/// `floor(weight * distributed / reference)`.
pub fn pro_rata(
    weight: &Amount,
    distributed: &Amount,
    reference: &Amount,
) -> Result<Amount, ZeroDivisor> {
    weight
        .mul_div_floor(distributed, reference)
        .ok_or(ZeroDivisor)
}

/// A provider's movement when the auction ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionEndShare {
    /// Added to unlocked: share of unsold liquidity plus share of premiums.
    pub unlocked_credit: Amount,
    /// Removed from locked: share of unsold liquidity.
    pub locked_debit: Amount,
}

/// Split unsold liquidity and premiums for one provider.
///
/// `unlocked_credit = floor(locked * (unsold + premiums) / starting)`,
/// `locked_debit = floor(locked * unsold / starting)`.
pub fn auction_end_share(
    provider_locked: &Amount,
    unsold_liquidity: &Amount,
    premiums: &Amount,
    starting_liquidity: &Amount,
) -> Result<AuctionEndShare, ZeroDivisor> {
    let released = unsold_liquidity + premiums;
    Ok(AuctionEndShare {
        unlocked_credit: pro_rata(provider_locked, &released, starting_liquidity)?,
        locked_debit: pro_rata(provider_locked, unsold_liquidity, starting_liquidity)?,
    })
}

/// A provider's movement when the round settles. Locked goes to zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementShare {
    pub stashed_credit: Amount,
    pub unlocked_credit: Amount,
}

/// Split a provider's portion of the remaining liquidity.
///
/// The provider owns `floor(locked * remaining / locked_pool)` of what is
/// left after payouts, where `locked_pool` is the summed locked balance of
/// every provider in the round. Of that, `floor(remaining * queued / starting)` is stashed
/// (never more than the provider owns) and the rest becomes unlocked.
pub fn settlement_share(
    provider_locked: &Amount,
    locked_pool: &Amount,
    remaining_liquidity: &Amount,
    provider_queued: &Amount,
    starting_liquidity: &Amount,
) -> Result<SettlementShare, ZeroDivisor> {
    let owned = pro_rata(provider_locked, remaining_liquidity, locked_pool)?;
    let stashed = if provider_queued.is_zero() {
        Amount::zero()
    } else {
        std::cmp::min(
            pro_rata(provider_queued, remaining_liquidity, starting_liquidity)?,
            owned.clone(),
        )
    };
    let unlocked_credit = owned.checked_sub(&stashed).unwrap_or_default();
    Ok(SettlementShare {
        stashed_credit: stashed,
        unlocked_credit,
    })
}

/// `starting - unsold - sold * payout_per_option`, or None if the payout
/// exceeds what was sold against.
pub fn remaining_liquidity(
    starting_liquidity: &Amount,
    unsold_liquidity: &Amount,
    total_payout: &Amount,
) -> Option<Amount> {
    starting_liquidity
        .checked_sub(unsold_liquidity)?
        .checked_sub(total_payout)
}
