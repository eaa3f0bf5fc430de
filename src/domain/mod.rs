//! Domain types for the vault settlement ledger.
//!
//! This module provides:
//! - Arbitrary-precision unsigned quantities via the Amount wrapper
//! - Domain primitives: BlockNumber, Address
//! - Vault, liquidity provider, round, bid and buyer entities
//! - The closed set of ledger events
//! - Canonical bid ordering used by auction clearing

pub mod amount;
pub mod bid;
pub mod events;
pub mod ordering;
pub mod primitives;
pub mod round;
pub mod vault;

pub use amount::Amount;
pub use bid::{Bid, BuyerFlag, OptionBuyer};
pub use events::LedgerEvent;
pub use ordering::BidOrderingKey;
pub use primitives::{Address, AddressParseError, BlockNumber};
pub use round::{OptionRound, RoundState};
pub use vault::{LiquidityProvider, QueuedWithdrawal, Vault};
