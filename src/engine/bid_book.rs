//! Auction clearing over a round's bid set.
//!
//! Bids are walked in canonical order (price desc, nonce asc) exactly as the
//! store returns them; the persisted collection is never re-sorted here.

use crate::domain::ordering::is_canonical_order;
use crate::domain::{Address, Amount, Bid};
use std::collections::BTreeMap;
use tracing::warn;

/// Where a bid landed relative to the clearing point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidClass {
    /// Fully filled: every requested option is mintable.
    Above,
    /// Partially filled by the last of the supply.
    Boundary,
    /// Not filled: everything paid is refundable.
    Below,
}

/// Outcome of clearing for one bid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidAllocation {
    pub bid_id: String,
    pub buyer: Address,
    pub class: BidClass,
    pub mintable: Amount,
    pub refundable: Amount,
}

/// Clearing point reported by the auction-end event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearingPoint {
    pub clearing_price: Amount,
    pub clearing_nonce: u64,
    pub options_sold: Amount,
}

/// Partition `bids` around the clearing point and size each fill.
///
/// - price > clearing price, or price == clearing price with nonce <= clearing
///   nonce: fully filled, nothing refunded.
/// - later bids at the clearing price share whatever supply remains in nonce
///   order; the one that exhausts it is the boundary bid, mintable
///   `min(remaining, amount)` and refundable `(amount - mintable) * clearing price`.
/// - everything else: refundable `amount * price`.
///
/// `bids` must be in canonical order.
pub fn clear(bids: &[Bid], point: &ClearingPoint) -> Vec<BidAllocation> {
    if !is_canonical_order(bids) {
        warn!(
            bids = bids.len(),
            "Bid set not in canonical order; clearing walks it as given"
        );
    }

    let mut remaining = point.options_sold.clone();
    let mut allocations = Vec::with_capacity(bids.len());

    for bid in bids {
        let (class, mintable, refundable) = if bid.price < point.clearing_price {
            (BidClass::Below, Amount::zero(), &bid.amount * &bid.price)
        } else if bid.price > point.clearing_price || bid.nonce <= point.clearing_nonce {
            match remaining.checked_sub(&bid.amount) {
                Some(left) => remaining = left,
                None => {
                    warn!(
                        bid_id = %bid.bid_id,
                        amount = %bid.amount,
                        remaining = %remaining,
                        "Winning bid exceeds remaining supply"
                    );
                    remaining = Amount::zero();
                }
            }
            (BidClass::Above, bid.amount.clone(), Amount::zero())
        } else {
            let filled = std::cmp::min(remaining.clone(), bid.amount.clone());
            remaining = remaining.checked_sub(&filled).unwrap_or_default();
            let unfilled = bid.amount.checked_sub(&filled).unwrap_or_default();
            let refundable = &unfilled * &point.clearing_price;
            let class = if unfilled.is_zero() {
                BidClass::Above
            } else if filled.is_zero() {
                BidClass::Below
            } else {
                BidClass::Boundary
            };
            (class, filled, refundable)
        };

        allocations.push(BidAllocation {
            bid_id: bid.bid_id.clone(),
            buyer: bid.buyer.clone(),
            class,
            mintable,
            refundable,
        });
    }

    allocations
}

/// Per-buyer totals of `(mintable, refundable)` across all of their bids.
pub fn buyer_totals(allocations: &[BidAllocation]) -> BTreeMap<Address, (Amount, Amount)> {
    let mut totals: BTreeMap<Address, (Amount, Amount)> = BTreeMap::new();
    for allocation in allocations {
        let entry = totals
            .entry(allocation.buyer.clone())
            .or_insert_with(|| (Amount::zero(), Amount::zero()));
        entry.0 += &allocation.mintable;
        entry.1 += &allocation.refundable;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BlockNumber;

    fn n(v: u64) -> Amount {
        Amount::from(v)
    }

    fn bid(id: &str, buyer: &str, price: u64, nonce: u64, amount: u64) -> Bid {
        Bid {
            round_address: Address::new("0xround".to_string()),
            bid_id: id.to_string(),
            buyer: Address::new(buyer.to_string()),
            amount: n(amount),
            price: n(price),
            nonce,
            placed_block: BlockNumber::new(1),
        }
    }

    fn point(price: u64, nonce: u64, sold: u64) -> ClearingPoint {
        ClearingPoint {
            clearing_price: n(price),
            clearing_nonce: nonce,
            options_sold: n(sold),
        }
    }

    #[test]
    fn test_simple_auction_clearing() {
        let bids = vec![
            bid("1", "0xa", 10, 1, 5),
            bid("2", "0xb", 10, 2, 5),
            bid("3", "0xc", 8, 3, 10),
        ];
        let out = clear(&bids, &point(10, 1, 8));

        assert_eq!(out[0].class, BidClass::Above);
        assert_eq!(out[0].mintable, n(5));
        assert_eq!(out[0].refundable, n(0));

        assert_eq!(out[1].class, BidClass::Boundary);
        assert_eq!(out[1].mintable, n(3));
        assert_eq!(out[1].refundable, n(20));

        assert_eq!(out[2].class, BidClass::Below);
        assert_eq!(out[2].mintable, n(0));
        assert_eq!(out[2].refundable, n(80));
    }

    #[test]
    fn test_partition_is_complete_and_mintable_matches_sold() {
        let bids = vec![
            bid("1", "0xa", 12, 4, 2),
            bid("2", "0xb", 10, 1, 3),
            bid("3", "0xa", 10, 2, 4),
            bid("4", "0xc", 10, 5, 4),
            bid("5", "0xd", 10, 6, 4),
            bid("6", "0xe", 7, 3, 9),
        ];
        let out = clear(&bids, &point(10, 1, 8));

        assert_eq!(out.len(), bids.len());
        let minted: Amount = out.iter().map(|a| a.mintable.clone()).sum();
        assert_eq!(minted, n(8));

        let classes: Vec<BidClass> = out.iter().map(|a| a.class).collect();
        assert_eq!(
            classes,
            vec![
                BidClass::Above,
                BidClass::Above,
                BidClass::Boundary,
                BidClass::Below,
                BidClass::Below,
                BidClass::Below,
            ]
        );
        // bid 3 fills 3 of 4, refunds one option at the clearing price
        assert_eq!(out[2].refundable, n(10));
        // bids at the clearing price past exhaustion refund in full
        assert_eq!(out[3].refundable, n(40));
        assert_eq!(out[5].refundable, n(63));
    }

    #[test]
    fn test_exact_exhaustion_has_no_boundary() {
        let bids = vec![bid("1", "0xa", 10, 1, 5), bid("2", "0xb", 10, 2, 3)];
        let out = clear(&bids, &point(10, 1, 8));
        assert_eq!(out[1].class, BidClass::Above);
        assert_eq!(out[1].mintable, n(3));
        assert_eq!(out[1].refundable, n(0));
    }

    #[test]
    fn test_buyer_totals_aggregate_across_bids() {
        let bids = vec![
            bid("1", "0xa", 10, 1, 5),
            bid("2", "0xb", 10, 2, 5),
            bid("3", "0xa", 8, 3, 10),
        ];
        let totals = buyer_totals(&clear(&bids, &point(10, 1, 8)));
        assert_eq!(totals[&Address::new("0xa".to_string())], (n(5), n(80)));
        assert_eq!(totals[&Address::new("0xb".to_string())], (n(3), n(20)));
    }

    #[test]
    fn test_no_bids_clears_to_nothing() {
        assert!(clear(&[], &point(10, 0, 0)).is_empty());
    }
}
