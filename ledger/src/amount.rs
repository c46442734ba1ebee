// ledger/src/amount.rs
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::LedgerError;

/// A positive settlement amount in minor currency units (paisa).
///
/// Settlement records store amounts in a 32-bit column, so the upper bound
/// is `i32::MAX` minor units. Balances are plain `i64` minor units and
/// never pass through floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub const MAX: i64 = i32::MAX as i64;
    /// Minor units per major currency unit.
    pub const SCALE: i64 = 100;

    pub fn new(minor: i64) -> Result<Self, LedgerError> {
        if minor <= 0 || minor > Self::MAX {
            return Err(LedgerError::InvalidAmount);
        }
        Ok(Self(minor))
    }

    /// Parse an amount as received from the rail: a JSON integer or a
    /// string of decimal digits. Fractions, signs other than a leading
    /// minus, and non-numeric input are rejected.
    pub fn parse(raw: &Value) -> Result<Self, LedgerError> {
        Self::new(Self::parse_integer(raw)?)
    }

    /// The integer step of [`Amount::parse`] without the bounds check, for
    /// callers that must order other checks between the two.
    pub fn parse_integer(raw: &Value) -> Result<i64, LedgerError> {
        match raw {
            Value::Number(n) => n.as_i64().ok_or(LedgerError::InvalidAmount),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| LedgerError::InvalidAmount),
            _ => Err(LedgerError::InvalidAmount),
        }
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    /// Signed delta for a credit to the merchant.
    pub fn credit(&self) -> i64 {
        self.0
    }

    /// Signed delta for a debit from the merchant.
    pub fn debit(&self) -> i64 {
        -self.0
    }

    /// Render minor units as major units with two decimals. Presentation only.
    pub fn to_display(minor: i64) -> String {
        let sign = if minor < 0 { "-" } else { "" };
        let abs = minor.unsigned_abs();
        let scale = Self::SCALE as u64;
        format!("{sign}{}.{:02}", abs / scale, abs % scale)
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
