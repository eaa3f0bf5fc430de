//! Option round entity and its lifecycle.

use crate::domain::{Address, Amount, BlockNumber};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of a round. Moves strictly forward when applying and
/// strictly backward, one step at a time, when reverting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoundState {
    Open,
    Auctioning,
    Running,
    Settled,
}

impl RoundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundState::Open => "Open",
            RoundState::Auctioning => "Auctioning",
            RoundState::Running => "Running",
            RoundState::Settled => "Settled",
        }
    }

    /// The only state reachable by applying one event.
    pub fn next(&self) -> Option<RoundState> {
        match self {
            RoundState::Open => Some(RoundState::Auctioning),
            RoundState::Auctioning => Some(RoundState::Running),
            RoundState::Running => Some(RoundState::Settled),
            RoundState::Settled => None,
        }
    }

    /// The only state reachable by reverting one event.
    pub fn previous(&self) -> Option<RoundState> {
        match self {
            RoundState::Open => None,
            RoundState::Auctioning => Some(RoundState::Open),
            RoundState::Running => Some(RoundState::Auctioning),
            RoundState::Settled => Some(RoundState::Running),
        }
    }
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(RoundState::Open),
            "Auctioning" => Ok(RoundState::Auctioning),
            "Running" => Ok(RoundState::Running),
            "Settled" => Ok(RoundState::Settled),
            other => Err(format!("unknown round state: {}", other)),
        }
    }
}

/// One auction/run/settle cycle of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionRound {
    pub address: Address,
    pub vault_address: Address,
    pub round_id: u64,
    pub state: RoundState,
    pub deployed_block: BlockNumber,

    // Schedule and pricing, fixed at deployment.
    pub auction_start_date: u64,
    pub auction_end_date: u64,
    pub settlement_date: u64,
    pub strike_price: Amount,
    pub cap_level: Amount,
    pub reserve_price: Amount,

    // Set when the auction starts.
    pub available_options: Amount,
    pub starting_liquidity: Amount,
    pub queued_liquidity: Amount,

    // Set when the auction ends.
    pub clearing_price: Amount,
    pub clearing_nonce: u64,
    pub options_sold: Amount,
    pub unsold_liquidity: Amount,
    pub premiums: Amount,

    // Set at settlement.
    pub settlement_price: Amount,
    pub payout_per_option: Amount,
    pub total_payout: Amount,
    pub remaining_liquidity: Amount,
}

impl OptionRound {
    /// Sold options times the per-option payout.
    pub fn compute_total_payout(&self, payout_per_option: &Amount) -> Amount {
        &self.options_sold * payout_per_option
    }
}
