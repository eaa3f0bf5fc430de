//! Vault and liquidity-provider balance entities.

use crate::domain::{Address, Amount, BlockNumber};
use serde::{Deserialize, Serialize};

/// Pooled liquidity of one deployed vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub address: Address,
    /// Round id of the most recently deployed round (0 before the first).
    pub current_round_id: u64,
    pub current_round_address: Option<Address>,
    pub unlocked_balance: Amount,
    pub locked_balance: Amount,
    pub stashed_balance: Amount,
    /// Block of the last mutation; also the key of its newest history row.
    pub latest_block: BlockNumber,
}

impl Vault {
    /// A freshly deployed vault with empty balances.
    pub fn new(address: Address, block: BlockNumber) -> Self {
        Self {
            address,
            current_round_id: 0,
            current_round_address: None,
            unlocked_balance: Amount::zero(),
            locked_balance: Amount::zero(),
            stashed_balance: Amount::zero(),
            latest_block: block,
        }
    }

    /// locked + unlocked + stashed.
    pub fn total_balance(&self) -> Amount {
        &(&self.locked_balance + &self.unlocked_balance) + &self.stashed_balance
    }
}

/// One provider's share of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityProvider {
    pub vault_address: Address,
    pub address: Address,
    pub unlocked_balance: Amount,
    pub locked_balance: Amount,
    pub stashed_balance: Amount,
    pub latest_block: BlockNumber,
}

impl LiquidityProvider {
    pub fn new(vault_address: Address, address: Address, block: BlockNumber) -> Self {
        Self {
            vault_address,
            address,
            unlocked_balance: Amount::zero(),
            locked_balance: Amount::zero(),
            stashed_balance: Amount::zero(),
            latest_block: block,
        }
    }

    pub fn total_balance(&self) -> Amount {
        &(&self.locked_balance + &self.unlocked_balance) + &self.stashed_balance
    }
}

/// Portion of a provider's locked liquidity queued to be stashed when the
/// round settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedWithdrawal {
    pub provider: Address,
    pub round_address: Address,
    pub bps: u64,
    pub queued_amount: Amount,
    pub latest_block: BlockNumber,
}
