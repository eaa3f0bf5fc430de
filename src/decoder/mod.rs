//! Raw chain events to typed [`LedgerEvent`]s.
//!
//! A raw event is a source address plus `keys` and `data` arrays of field
//! elements. `keys[0]` is the event selector; 256-bit quantities occupy two
//! consecutive data words, low word first.

pub mod dispatch;

pub use dispatch::Dispatcher;

use crate::domain::{Address, Amount, LedgerEvent};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown event selector {0}")]
    UnknownSelector(Felt),
    #[error("event has no keys")]
    NoSelector,
    #[error("{event}: missing key {index}")]
    MissingKey { event: &'static str, index: usize },
    #[error("{event}: missing data word {index}")]
    MissingData { event: &'static str, index: usize },
    #[error("{event}: field {field} out of range")]
    OutOfRange {
        event: &'static str,
        field: &'static str,
    },
    #[error("{event} is not emitted by this contract kind")]
    UnexpectedEvent { event: &'static str },
    #[error("malformed field element: {0}")]
    MalformedFelt(String),
}

/// A field element, held as an unsigned integer below 2^252.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Felt(BigUint);

impl Felt {
    pub fn from_hex(raw: &str) -> Result<Self, DecodeError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 64 {
            return Err(DecodeError::MalformedFelt(raw.to_string()));
        }
        let value = BigUint::parse_bytes(digits.as_bytes(), 16)
            .ok_or_else(|| DecodeError::MalformedFelt(raw.to_string()))?;
        if value.bits() > 252 {
            return Err(DecodeError::MalformedFelt(raw.to_string()));
        }
        Ok(Felt(value))
    }

    pub fn from_u64(value: u64) -> Self {
        Felt(BigUint::from(value))
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }

    pub fn to_u128(&self) -> Option<u128> {
        self.0.to_u128()
    }

    /// Lowercase `0x` hex without leading zeros.
    pub fn to_hex(&self) -> String {
        format!("0x{}", self.0.to_str_radix(16))
    }

    /// The felt itself as a quantity.
    pub fn to_amount(&self) -> Amount {
        Amount::new(self.0.clone())
    }

    /// Addresses are felts; the hex form is already canonical.
    pub fn to_address(&self) -> Address {
        Address::new(self.to_hex())
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Felt {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Felt::from_hex(s)
    }
}

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Felt::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// An event as delivered by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub from_address: Felt,
    #[serde(default)]
    pub keys: Vec<Felt>,
    #[serde(default)]
    pub data: Vec<Felt>,
}

/// `sn_keccak`: Keccak-256 of the name truncated to 250 bits.
pub fn selector(name: &str) -> Felt {
    let mut digest = Keccak256::digest(name.as_bytes());
    digest[0] &= 0x03;
    Felt(BigUint::from_bytes_be(&digest))
}

/// Rebuild a 256-bit quantity from its two 128-bit halves:
/// `high << 128 | low`. Either half wider than 128 bits is rejected.
pub fn combine_u256(high: &Felt, low: &Felt) -> Option<Amount> {
    Some(Amount::from_u256_words(high.to_u128()?, low.to_u128()?))
}

/// Events this ledger understands, keyed by selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Deposit,
    Withdraw,
    WithdrawalQueued,
    StashWithdrawn,
    OptionRoundDeployed,
    AuctionStarted,
    AuctionEnded,
    OptionRoundSettled,
    BidPlaced,
    BidUpdated,
    OptionsMinted,
    OptionsExercised,
    UnusedBidsRefunded,
    ContractDeployed,
}

impl EventKind {
    const NAMED: [(&'static str, EventKind); 15] = [
        ("Deposit", EventKind::Deposit),
        ("Withdraw", EventKind::Withdraw),
        ("WithdrawalQueued", EventKind::WithdrawalQueued),
        ("StashWithdrawn", EventKind::StashWithdrawn),
        ("OptionRoundDeployed", EventKind::OptionRoundDeployed),
        ("AuctionStarted", EventKind::AuctionStarted),
        ("AuctionEnded", EventKind::AuctionEnded),
        ("OptionRoundSettled", EventKind::OptionRoundSettled),
        ("BidPlaced", EventKind::BidPlaced),
        // older round contracts name the same event BidAccepted
        ("BidAccepted", EventKind::BidPlaced),
        ("BidUpdated", EventKind::BidUpdated),
        ("OptionsMinted", EventKind::OptionsMinted),
        ("OptionsExercised", EventKind::OptionsExercised),
        ("UnusedBidsRefunded", EventKind::UnusedBidsRefunded),
        ("ContractDeployed", EventKind::ContractDeployed),
    ];

    pub fn from_selector(selector: &Felt) -> Option<EventKind> {
        static TABLE: OnceLock<HashMap<Felt, EventKind>> = OnceLock::new();
        TABLE
            .get_or_init(|| {
                EventKind::NAMED
                    .iter()
                    .map(|(name, kind)| (self::selector(name), *kind))
                    .collect()
            })
            .get(selector)
            .copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Deposit => "Deposit",
            EventKind::Withdraw => "Withdraw",
            EventKind::WithdrawalQueued => "WithdrawalQueued",
            EventKind::StashWithdrawn => "StashWithdrawn",
            EventKind::OptionRoundDeployed => "OptionRoundDeployed",
            EventKind::AuctionStarted => "AuctionStarted",
            EventKind::AuctionEnded => "AuctionEnded",
            EventKind::OptionRoundSettled => "OptionRoundSettled",
            EventKind::BidPlaced => "BidPlaced",
            EventKind::BidUpdated => "BidUpdated",
            EventKind::OptionsMinted => "OptionsMinted",
            EventKind::OptionsExercised => "OptionsExercised",
            EventKind::UnusedBidsRefunded => "UnusedBidsRefunded",
            EventKind::ContractDeployed => "ContractDeployed",
        }
    }
}

/// Positional field access for one event.
struct Fields<'a> {
    event: &'static str,
    raw: &'a RawEvent,
}

impl<'a> Fields<'a> {
    fn new(kind: EventKind, raw: &'a RawEvent) -> Self {
        Self {
            event: kind.name(),
            raw,
        }
    }

    fn key(&self, index: usize) -> Result<&'a Felt, DecodeError> {
        self.raw.keys.get(index).ok_or(DecodeError::MissingKey {
            event: self.event,
            index,
        })
    }

    fn word(&self, index: usize) -> Result<&'a Felt, DecodeError> {
        self.raw.data.get(index).ok_or(DecodeError::MissingData {
            event: self.event,
            index,
        })
    }

    fn address_key(&self, index: usize) -> Result<Address, DecodeError> {
        Ok(self.key(index)?.to_address())
    }

    fn address(&self, index: usize) -> Result<Address, DecodeError> {
        Ok(self.word(index)?.to_address())
    }

    fn u64(&self, index: usize, field: &'static str) -> Result<u64, DecodeError> {
        self.word(index)?.to_u64().ok_or(DecodeError::OutOfRange {
            event: self.event,
            field,
        })
    }

    /// Stored nonces are one past the value the ledger orders by.
    fn nonce(&self, index: usize, field: &'static str) -> Result<u64, DecodeError> {
        self.u64(index, field)?
            .checked_sub(1)
            .ok_or(DecodeError::OutOfRange {
                event: self.event,
                field,
            })
    }

    /// 256-bit value at `index` (low) and `index + 1` (high).
    fn u256(&self, index: usize, field: &'static str) -> Result<Amount, DecodeError> {
        let low = self.word(index)?;
        let high = self.word(index + 1)?;
        combine_u256(high, low).ok_or(DecodeError::OutOfRange {
            event: self.event,
            field,
        })
    }
}

fn kind_of(raw: &RawEvent) -> Result<EventKind, DecodeError> {
    let selector = raw.keys.first().ok_or(DecodeError::NoSelector)?;
    EventKind::from_selector(selector).ok_or_else(|| DecodeError::UnknownSelector(selector.clone()))
}

/// Decode an event emitted by a vault contract.
pub fn decode_vault_event(vault: &Address, raw: &RawEvent) -> Result<LedgerEvent, DecodeError> {
    let kind = kind_of(raw)?;
    let f = Fields::new(kind, raw);
    let vault = vault.clone();
    match kind {
        EventKind::Deposit => Ok(LedgerEvent::Deposit {
            vault,
            provider: f.address_key(1)?,
            provider_unlocked: f.u256(2, "account_unlocked")?,
            vault_unlocked: f.u256(4, "vault_unlocked")?,
        }),
        EventKind::Withdraw => Ok(LedgerEvent::Withdraw {
            vault,
            provider: f.address_key(1)?,
            provider_unlocked: f.u256(2, "account_unlocked")?,
            vault_unlocked: f.u256(4, "vault_unlocked")?,
        }),
        EventKind::WithdrawalQueued => Ok(LedgerEvent::WithdrawalQueued {
            vault,
            provider: f.address_key(1)?,
            bps: f.u64(0, "bps")?,
            round_id: f.u64(1, "round_id")?,
            queued_before: f.u256(2, "account_queued_before")?,
            queued_now: f.u256(4, "account_queued_now")?,
            vault_queued_now: f.u256(6, "vault_queued_now")?,
        }),
        EventKind::StashWithdrawn => Ok(LedgerEvent::StashWithdrawn {
            vault,
            provider: f.address_key(1)?,
            amount: f.u256(0, "amount")?,
            vault_stashed_now: f.u256(2, "vault_stashed")?,
        }),
        EventKind::OptionRoundDeployed => Ok(LedgerEvent::RoundDeployed {
            vault,
            round_id: f.u64(0, "round_id")?,
            round: f.address(1)?,
            auction_start_date: f.u64(2, "auction_start_date")?,
            auction_end_date: f.u64(3, "auction_end_date")?,
            settlement_date: f.u64(4, "settlement_date")?,
            strike_price: f.u256(5, "strike_price")?,
            cap_level: f.word(7)?.to_amount(),
            reserve_price: f.u256(8, "reserve_price")?,
        }),
        other => Err(DecodeError::UnexpectedEvent {
            event: other.name(),
        }),
    }
}

/// Decode an event emitted by an option round contract.
pub fn decode_round_event(round: &Address, raw: &RawEvent) -> Result<LedgerEvent, DecodeError> {
    let kind = kind_of(raw)?;
    let f = Fields::new(kind, raw);
    let round = round.clone();
    match kind {
        EventKind::AuctionStarted => Ok(LedgerEvent::AuctionStarted {
            round,
            starting_liquidity: f.u256(0, "starting_liquidity")?,
            available_options: f.u256(2, "options_available")?,
        }),
        EventKind::AuctionEnded => {
            let options_sold = f.u256(0, "options_sold")?;
            let clearing_price = f.u256(2, "clearing_price")?;
            let premiums = &options_sold * &clearing_price;
            Ok(LedgerEvent::AuctionEnded {
                round,
                options_sold,
                clearing_price,
                unsold_liquidity: f.u256(4, "unsold_liquidity")?,
                clearing_nonce: f.u64(6, "clearing_nonce")?,
                premiums,
            })
        }
        EventKind::OptionRoundSettled => Ok(LedgerEvent::RoundSettled {
            round,
            settlement_price: f.u256(0, "settlement_price")?,
            payout_per_option: f.u256(2, "payout_per_option")?,
        }),
        EventKind::BidPlaced => Ok(LedgerEvent::BidPlaced {
            round,
            buyer: f.address_key(1)?,
            bid_id: f.word(0)?.to_hex(),
            amount: f.u256(1, "amount")?,
            price: f.u256(3, "price")?,
            nonce: f.nonce(5, "nonce")?,
        }),
        EventKind::BidUpdated => Ok(LedgerEvent::BidUpdated {
            round,
            bid_id: f.word(0)?.to_hex(),
            price_increase: f.u256(1, "price_increase")?,
            nonce_before: f.nonce(3, "nonce_before")?,
            nonce_after: f.nonce(4, "nonce_after")?,
        }),
        EventKind::OptionsMinted => Ok(LedgerEvent::OptionsMinted {
            round,
            buyer: f.address_key(1)?,
        }),
        EventKind::OptionsExercised => Ok(LedgerEvent::OptionsExercised {
            round,
            buyer: f.address_key(1)?,
        }),
        EventKind::UnusedBidsRefunded => Ok(LedgerEvent::UnusedBidsRefunded {
            round,
            buyer: f.address_key(1)?,
        }),
        other => Err(DecodeError::UnexpectedEvent {
            event: other.name(),
        }),
    }
}

/// A universal-deployer `ContractDeployed` event: `(address, class_hash)`.
pub fn decode_deployment(raw: &RawEvent) -> Result<Option<(Address, Felt)>, DecodeError> {
    if kind_of(raw)? != EventKind::ContractDeployed {
        return Ok(None);
    }
    let f = Fields::new(EventKind::ContractDeployed, raw);
    Ok(Some((f.address(0)?, f.word(3)?.clone())))
}
