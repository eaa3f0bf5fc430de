//! Pure computation for the settlement ledger: pro-rata arithmetic, auction
//! clearing and per-event state transitions.

pub mod bid_book;
pub mod settlement;
pub mod transitions;

pub use bid_book::{buyer_totals, clear, BidAllocation, BidClass, ClearingPoint};
pub use settlement::{
    auction_end_share, pro_rata, remaining_liquidity, settlement_share, AuctionEndShare,
    SettlementShare, ZeroDivisor,
};
pub use transitions::{AuctionOutcome, NewBid, RoundTerms, TransitionError};
