//! Virtual currency amounts and percentages.
//!
//! Balances are kept as integer hundredths so arithmetic on coins, stars and
//! donation buckets is exact. On the wire they travel as plain JSON numbers
//! with at most two decimals.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Signed amount in hundredths of a unit (coins, stars, rupees).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Amount(cents)
    }

    /// Whole units, e.g. `Amount::from_major(1000)` is 1000.00.
    pub const fn from_major(units: i64) -> Self {
        Amount(units * 100)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Round a float to the nearest hundredth. `None` for NaN/infinite or
    /// out-of-range input.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let cents = (value * 100.0).round();
        if cents.abs() > i64::MAX as f64 / 2.0 {
            return None;
        }
        Some(Amount(cents as i64))
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Floor of `self * bps / 10_000`.
    pub fn percent(self, bps: Bps) -> Amount {
        let v = (self.0 as i128 * bps.0 as i128).div_euclid(10_000);
        Amount(v as i64)
    }

    pub fn times(self, n: u32) -> Amount {
        Amount(self.0.saturating_mul(n as i64))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let (major, minor) = (abs / 100, abs % 100);
        if minor == 0 {
            write!(f, "{sign}{major}")
        } else if minor % 10 == 0 {
            write!(f, "{sign}{major}.{}", minor / 10)
        } else {
            write!(f, "{sign}{major}.{minor:02}")
        }
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Neg for Amount {
    type Output = Amount;
    fn neg(self) -> Amount {
        Amount(self.0.saturating_neg())
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 % 100 == 0 {
            serializer.serialize_i64(self.0 / 100)
        } else {
            serializer.serialize_f64(self.as_f64())
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = f64::deserialize(deserializer)?;
        Amount::from_f64(v).ok_or_else(|| de::Error::custom("amount must be a finite number"))
    }
}

/// Basis points: 10_000 = 100 %.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bps(pub u32);

impl Bps {
    pub const FULL: Bps = Bps(10_000);

    pub const fn percent(p: u32) -> Bps {
        Bps(p * 100)
    }

    pub fn as_percent(self) -> f64 {
        self.0 as f64 / 100.0
    }
}
