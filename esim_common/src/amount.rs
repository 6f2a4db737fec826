use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{de, de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const CURRENCY_CODE: &str = "USDT";
/// Number of fractional digits carried by [`Amount`].
pub const AMOUNT_DECIMALS: u32 = 8;
/// Number of internal units in one whole currency unit.
pub const AMOUNT_SCALE: i64 = 100_000_000;

//--------------------------------------       Amount        ---------------------------------------------------------
/// A signed fixed-point money value with 8 fractional digits, stored as an integer count of 10⁻⁸ units.
///
/// On the wire amounts are decimal strings ("100.1234"). They are parsed exactly once at the boundary and all
/// arithmetic happens on the integer representation.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, PartialEq, Eq, Hash)]
#[sqlx(transparent)]
pub struct Amount(i64);

op!(binary Amount, Add, add);
op!(binary Amount, Sub, sub);
op!(inplace Amount, AddAssign, add_assign);
op!(inplace Amount, SubAssign, sub_assign);
op!(unary Amount, Neg, neg);

impl Mul<i64> for Amount {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Not a valid amount: {0}")]
pub struct AmountParseError(String);

impl From<i64> for Amount {
    fn from(units: i64) -> Self {
        Self(units)
    }
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// The raw number of 10⁻⁸ units.
    pub fn value(&self) -> i64 {
        self.0
    }

    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    pub fn from_whole(whole: i64) -> Self {
        Self(whole * AMOUNT_SCALE)
    }

    /// Builds an amount from an integer count of `10^-decimals` units, e.g. `from_scaled(1234, 4)` is 0.1234.
    pub fn from_scaled(value: i64, decimals: u32) -> Self {
        let decimals = decimals.min(AMOUNT_DECIMALS);
        Self(value * 10i64.pow(AMOUNT_DECIMALS - decimals))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn checked_mul(&self, rhs: i64) -> Option<Self> {
        self.0.checked_mul(rhs).map(Self)
    }

    /// True if the value has no significant digits beyond `decimals` fractional places.
    pub fn has_at_most_decimals(&self, decimals: u32) -> bool {
        let decimals = decimals.min(AMOUNT_DECIMALS);
        self.0 % 10i64.pow(AMOUNT_DECIMALS - decimals) == 0
    }

    /// Formats the value with exactly `decimals` fractional digits. Extra digits are truncated.
    pub fn format_dp(&self, decimals: u32) -> String {
        let decimals = decimals.min(AMOUNT_DECIMALS);
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = AMOUNT_SCALE.unsigned_abs();
        let whole = abs / scale;
        if decimals == 0 {
            return format!("{sign}{whole}");
        }
        let frac = (abs % scale) / 10u64.pow(AMOUNT_DECIMALS - decimals);
        format!("{sign}{whole}.{frac:0width$}", width = decimals as usize)
    }

    /// Parses a JSON float via its shortest round-trip representation, so that `100.1234` yields exactly 100.1234.
    pub fn from_f64(value: f64) -> Result<Self, AmountParseError> {
        if !value.is_finite() {
            return Err(AmountParseError(value.to_string()));
        }
        value.to_string().parse()
    }
}

impl Display for Amount {
    /// Prints the shortest exact representation with at least two fractional digits.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let full = self.format_dp(AMOUNT_DECIMALS);
        let (head, frac) = full.split_at(full.len() - AMOUNT_DECIMALS as usize);
        let trimmed = frac.trim_end_matches('0');
        if trimmed.len() < 2 {
            write!(f, "{head}{trimmed:0<2}")
        } else {
            write!(f, "{head}{trimmed}")
        }
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AmountParseError(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        if frac.len() > AMOUNT_DECIMALS as usize {
            return Err(err());
        }
        let whole_units = if whole.is_empty() { 0 } else { whole.parse::<i64>().map_err(|_| err())? };
        let frac_units = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = AMOUNT_DECIMALS as usize);
            padded.parse::<i64>().map_err(|_| err())?
        };
        let units = whole_units.checked_mul(AMOUNT_SCALE).and_then(|w| w.checked_add(frac_units)).ok_or_else(err)?;
        Ok(Self(if negative { -units } else { units }))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a decimal amount as a string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        v.checked_mul(AMOUNT_SCALE).map(Amount).ok_or_else(|| E::custom(format!("amount {v} is out of range")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .ok()
            .and_then(|v| v.checked_mul(AMOUNT_SCALE))
            .map(Amount)
            .ok_or_else(|| E::custom(format!("amount {v} is out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Amount::from_f64(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}
