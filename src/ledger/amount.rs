use num::{BigUint, Num, ToPrimitive, Zero};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::{
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
    str::FromStr,
};
use thiserror::Error;

/// Unsigned arbitrary-precision token amount in the chain's smallest unit.
///
/// Subtraction saturates at zero: ledger balances are clamped rather than
/// allowed to underflow.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Default, Hash)]
pub struct Amount(pub BigUint);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountParseError {
    #[error("empty amount")]
    Empty,
    #[error("negative amount {0:?}")]
    Negative(String),
    #[error("non-numeric amount {0:?}")]
    NotANumber(String),
}

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.0.is_zero()
    }

    pub fn saturating_sub(&self, rhs: &Amount) -> Amount {
        if self.0 > rhs.0 {
            Amount(&self.0 - &rhs.0)
        } else {
            Amount::zero()
        }
    }

    pub fn to_u128(&self) -> Option<u128> {
        self.0.to_u128()
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    /// Accepts decimal digits or a `0x`-prefixed hex string
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountParseError::Empty);
        }
        if s.starts_with('-') {
            return Err(AmountParseError::Negative(s.to_string()));
        }

        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) if !hex.is_empty() => BigUint::from_str_radix(hex, 16),
            Some(_) => return Err(AmountParseError::NotANumber(s.to_string())),
            None => BigUint::from_str_radix(s.strip_prefix('+').unwrap_or(s), 10),
        };
        parsed
            .map(Amount)
            .map_err(|_| AmountParseError::NotANumber(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
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

impl Add<&Amount> for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Self::Output {
        Amount(&self.0 + &rhs.0)
    }
}

impl Add<Amount> for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl Sub<&Amount> for &Amount {
    type Output = Amount;

    fn sub(self, rhs: &Amount) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl SubAssign<&Amount> for Amount {
    fn sub_assign(&mut self, rhs: &Amount) {
        *self = self.saturating_sub(rhs);
    }
}

impl<'a> std::iter::Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |acc, x| &acc + x)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

/// JSON integers keep every digit (serde_json `arbitrary_precision`), so
/// amounts above `u64::MAX` parse exactly
impl TryFrom<&Value> for Amount {
    type Error = AmountParseError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(number) => number.to_string().parse(),
            Value::String(s) => s.parse(),
            other => Err(AmountParseError::NotANumber(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Amount::try_from(&value).map_err(de::Error::custom)
    }
}
