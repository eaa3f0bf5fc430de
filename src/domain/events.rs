//! Typed ledger events produced by the decoder.
//!
//! The set is closed: every variant has exactly one forward and one revert
//! handler in the ledger engine, and the exhaustive `match` there is what keeps
//! the two in step.

use crate::domain::{Address, Amount};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    VaultDeployed {
        vault: Address,
    },
    Deposit {
        vault: Address,
        provider: Address,
        provider_unlocked: Amount,
        vault_unlocked: Amount,
    },
    Withdraw {
        vault: Address,
        provider: Address,
        provider_unlocked: Amount,
        vault_unlocked: Amount,
    },
    WithdrawalQueued {
        vault: Address,
        provider: Address,
        round_id: u64,
        bps: u64,
        queued_before: Amount,
        queued_now: Amount,
        vault_queued_now: Amount,
    },
    StashWithdrawn {
        vault: Address,
        provider: Address,
        amount: Amount,
        vault_stashed_now: Amount,
    },
    RoundDeployed {
        vault: Address,
        round_id: u64,
        round: Address,
        auction_start_date: u64,
        auction_end_date: u64,
        settlement_date: u64,
        strike_price: Amount,
        cap_level: Amount,
        reserve_price: Amount,
    },
    AuctionStarted {
        round: Address,
        available_options: Amount,
        starting_liquidity: Amount,
    },
    AuctionEnded {
        round: Address,
        options_sold: Amount,
        clearing_price: Amount,
        unsold_liquidity: Amount,
        clearing_nonce: u64,
        premiums: Amount,
    },
    RoundSettled {
        round: Address,
        settlement_price: Amount,
        payout_per_option: Amount,
    },
    BidPlaced {
        round: Address,
        bid_id: String,
        buyer: Address,
        amount: Amount,
        price: Amount,
        nonce: u64,
    },
    BidUpdated {
        round: Address,
        bid_id: String,
        price_increase: Amount,
        nonce_before: u64,
        nonce_after: u64,
    },
    OptionsMinted {
        round: Address,
        buyer: Address,
    },
    OptionsExercised {
        round: Address,
        buyer: Address,
    },
    UnusedBidsRefunded {
        round: Address,
        buyer: Address,
    },
}

impl LedgerEvent {
    /// Event name as emitted on chain.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::VaultDeployed { .. } => "VaultDeployed",
            LedgerEvent::Deposit { .. } => "Deposit",
            LedgerEvent::Withdraw { .. } => "Withdraw",
            LedgerEvent::WithdrawalQueued { .. } => "WithdrawalQueued",
            LedgerEvent::StashWithdrawn { .. } => "StashWithdrawn",
            LedgerEvent::RoundDeployed { .. } => "OptionRoundDeployed",
            LedgerEvent::AuctionStarted { .. } => "AuctionStarted",
            LedgerEvent::AuctionEnded { .. } => "AuctionEnded",
            LedgerEvent::RoundSettled { .. } => "OptionRoundSettled",
            LedgerEvent::BidPlaced { .. } => "BidPlaced",
            LedgerEvent::BidUpdated { .. } => "BidUpdated",
            LedgerEvent::OptionsMinted { .. } => "OptionsMinted",
            LedgerEvent::OptionsExercised { .. } => "OptionsExercised",
            LedgerEvent::UnusedBidsRefunded { .. } => "UnusedBidsRefunded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_roundtrip_keeps_big_amounts() {
        let event = LedgerEvent::AuctionStarted {
            round: Address::new("0xabc".to_string()),
            available_options: Amount::from_u256_words(3, 7),
            starting_liquidity: Amount::from(1000u64),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"auction_started\""));
        let back: LedgerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
