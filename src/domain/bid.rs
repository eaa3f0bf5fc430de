//! Auction bids and per-round buyer positions.

use crate::domain::{Address, Amount, BlockNumber};
use serde::{Deserialize, Serialize};

/// A bid for options in one round's auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub round_address: Address,
    pub bid_id: String,
    pub buyer: Address,
    /// Number of options requested.
    pub amount: Amount,
    /// Price per option.
    pub price: Amount,
    /// Placement order within the round; only price increases advance it.
    pub nonce: u64,
    pub placed_block: BlockNumber,
}

/// What a buyer is owed after a round's auction clears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionBuyer {
    pub round_address: Address,
    pub address: Address,
    pub mintable_options: Amount,
    pub refundable_amount: Amount,
    pub has_minted: bool,
    pub has_refunded: bool,
    pub has_exercised: bool,
}

impl OptionBuyer {
    pub fn new(round_address: Address, address: Address) -> Self {
        Self {
            round_address,
            address,
            mintable_options: Amount::zero(),
            refundable_amount: Amount::zero(),
            has_minted: false,
            has_refunded: false,
            has_exercised: false,
        }
    }

    pub fn flag(&self, flag: BuyerFlag) -> bool {
        match flag {
            BuyerFlag::Minted => self.has_minted,
            BuyerFlag::Refunded => self.has_refunded,
            BuyerFlag::Exercised => self.has_exercised,
        }
    }

    pub fn set_flag(&mut self, flag: BuyerFlag, value: bool) {
        match flag {
            BuyerFlag::Minted => self.has_minted = value,
            BuyerFlag::Refunded => self.has_refunded = value,
            BuyerFlag::Exercised => self.has_exercised = value,
        }
    }
}

/// Set-once markers on a buyer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuyerFlag {
    Minted,
    Refunded,
    Exercised,
}

impl std::fmt::Display for BuyerFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuyerFlag::Minted => write!(f, "minted"),
            BuyerFlag::Refunded => write!(f, "refunded"),
            BuyerFlag::Exercised => write!(f, "exercised"),
        }
    }
}
