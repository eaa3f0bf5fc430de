//! Canonical bid ordering for auction clearing.

use crate::domain::{Amount, Bid};
use std::cmp::{Ordering, Reverse};

/// Stable ordering key for bids.
///
/// Ordering: price descending -> nonce ascending -> bid_id. A lower nonce at
/// the same price was placed (or last raised) earlier and wins the tie.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BidOrderingKey {
    /// Price (primary sort, highest first).
    pub price: Reverse<Amount>,
    /// Sequence nonce (secondary sort).
    pub nonce: u64,
    /// Bid id (fallback sort).
    pub bid_id: String,
}

impl BidOrderingKey {
    /// Create an ordering key from a Bid.
    pub fn from_bid(bid: &Bid) -> Self {
        BidOrderingKey {
            price: Reverse(bid.price.clone()),
            nonce: bid.nonce,
            bid_id: bid.bid_id.clone(),
        }
    }

    /// Compare two bids in canonical order.
    pub fn compare(a: &Bid, b: &Bid) -> Ordering {
        Self::from_bid(a).cmp(&Self::from_bid(b))
    }
}

/// True if `bids` is already in canonical order.
pub fn is_canonical_order(bids: &[Bid]) -> bool {
    bids.windows(2)
        .all(|w| BidOrderingKey::compare(&w[0], &w[1]) != Ordering::Greater)
}
