//! Arbitrary-precision non-negative integer backed by num-bigint.
//!
//! Every balance, price and quantity in the ledger is an `Amount`. Subtraction
//! is only offered in checked form so an underflow can never wrap.

use num_bigint::BigUint;
use num_traits::{CheckedSub, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Lossless unsigned quantity for balances, prices and option counts.
///
/// Serializes to a JSON string of decimal digits so values wider than 64 bits
/// survive any client.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigUint);

impl Amount {
    /// Create an Amount from a BigUint.
    pub fn new(value: BigUint) -> Self {
        Amount(value)
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Amount(BigUint::zero())
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero()
    }

    /// Rebuild a 256-bit quantity from the two 128-bit words the chain emits.
    pub fn from_u256_words(high: u128, low: u128) -> Self {
        Amount((BigUint::from(high) << 128u32) | BigUint::from(low))
    }

    /// `self - rhs`, or None if the result would be negative.
    pub fn checked_sub(&self, rhs: &Amount) -> Option<Amount> {
        self.0.checked_sub(&rhs.0).map(Amount)
    }

    /// `floor(self * numerator / denominator)`, or None on a zero denominator.
    pub fn mul_div_floor(&self, numerator: &Amount, denominator: &Amount) -> Option<Amount> {
        if denominator.is_zero() {
            return None;
        }
        Some(Amount(&self.0 * &numerator.0 / &denominator.0))
    }

    /// Format as canonical decimal digits.
    pub fn to_canonical_string(&self) -> String {
        self.0.to_str_radix(10)
    }

    /// Length-prefixed digits whose lexicographic order matches numeric order.
    ///
    /// Used as the SQL sort column for prices, since TEXT columns holding plain
    /// digits would sort "9" above "10".
    pub fn sort_key(&self) -> String {
        let digits = self.to_canonical_string();
        format!("{:04}{}", digits.len(), digits)
    }

    /// Get the underlying BigUint.
    pub fn inner(&self) -> &BigUint {
        &self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Amount {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigUint::from_str(s.trim()).map(Amount)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(BigUint::from(value))
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Amount(BigUint::from(value))
    }
}

impl From<BigUint> for Amount {
    fn from(value: BigUint) -> Self {
        Amount(value)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// Arithmetic operations. Addition and multiplication cannot overflow.
impl std::ops::Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl<'a> std::ops::Add<&'a Amount> for &'a Amount {
    type Output = Amount;

    fn add(self, rhs: &'a Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl std::ops::AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl std::ops::Mul for Amount {
    type Output = Amount;

    fn mul(self, rhs: Amount) -> Amount {
        Amount(self.0 * rhs.0)
    }
}

impl<'a> std::ops::Mul<&'a Amount> for &'a Amount {
    type Output = Amount;

    fn mul(self, rhs: &'a Amount) -> Amount {
        Amount(&self.0 * &rhs.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::zero(), |acc, x| acc + x)
    }
}
