//! Domain primitives: BlockNumber, Address.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Height of a block on the host chain.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// Create a BlockNumber from a height.
    pub fn new(n: u64) -> Self {
        BlockNumber(n)
    }

    /// Get the underlying height.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Height as SQLite's native integer type.
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    /// Convert back from a stored SQLite integer.
    pub fn from_i64(n: i64) -> Self {
        BlockNumber(n.max(0) as u64)
    }
}

impl std::fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract or account address, normalized to lowercase `0x` hex without
/// leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid address: {0}")]
pub struct AddressParseError(pub String);

impl Address {
    /// Create an Address from an already-normalized string.
    pub fn new(addr: String) -> Self {
        Address(addr)
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalize raw hex into canonical form.
    ///
    /// `0x00AbC` and `abc` both become `0xabc`; the zero address is `0x0`.
    pub fn parse(raw: &str) -> Result<Self, AddressParseError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError(raw.to_string()));
        }
        let stripped = digits.trim_start_matches('0').to_ascii_lowercase();
        if stripped.len() > 64 {
            return Err(AddressParseError(raw.to_string()));
        }
        if stripped.is_empty() {
            Ok(Address("0x0".to_string()))
        } else {
            Ok(Address(format!("0x{}", stripped)))
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalization() {
        assert_eq!(Address::parse("0x00AbC").unwrap().as_str(), "0xabc");
        assert_eq!(Address::parse("abc").unwrap().as_str(), "0xabc");
        assert_eq!(Address::parse("0x000").unwrap().as_str(), "0x0");
    }

    #[test]
    fn test_address_rejects_non_hex() {
        assert!(Address::parse("0xzz").is_err());
        assert!(Address::parse("").is_err());
        assert!(Address::parse("0x").is_err());
    }

    #[test]
    fn test_address_display() {
        let addr = Address::new("0x123abc".to_string());
        assert_eq!(addr.to_string(), "0x123abc");
    }

    #[test]
    fn test_block_number_ordering() {
        let b1 = BlockNumber::new(10);
        let b2 = BlockNumber::new(11);
        assert!(b1 < b2);
        assert_eq!(BlockNumber::from_i64(b2.as_i64()), b2);
    }
}
