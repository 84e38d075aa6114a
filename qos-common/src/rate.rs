use std::{
    fmt,
    iter::Sum,
    ops::{Add, Sub},
};

use crate::constants::{Gbit, Mbit};

/// A link or class rate, stored in kbit/s.
///
/// Rates render in the unit `tc` understands, picking the largest unit that represents the
/// value exactly (`95mbit`, `47500kbit`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(u64);

impl Rate {
    /// No bandwidth.
    pub const ZERO: Rate = Rate(0);

    #[inline]
    pub const fn kbit(kbit: u64) -> Self {
        Self(kbit)
    }

    #[inline]
    pub const fn mbit(mbit: u64) -> Self {
        Self(mbit * Mbit)
    }

    /// Converts a possibly fractional Mbit/s value, rounding to the nearest kbit/s.
    /// Negative and non-finite values saturate to zero.
    pub fn from_mbit_f64(mbit: f64) -> Self {
        if !mbit.is_finite() || mbit <= 0.0 {
            return Self::ZERO;
        }
        Self((mbit * Mbit as f64).round() as u64)
    }

    #[inline]
    pub const fn as_kbit(self) -> u64 {
        self.0
    }

    /// The rate in Mbit/s, for display and configuration round trips.
    pub fn as_mbit_f64(self) -> f64 {
        self.0 as f64 / Mbit as f64
    }

    /// Returns `percent`% of this rate, rounded down to the kbit/s.
    pub const fn percent(self, percent: u8) -> Self {
        Self(self.0 * percent as u64 / 100)
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for Rate {
    type Output = Rate;

    fn add(self, rhs: Self) -> Self::Output {
        Rate(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Rate {
    type Output = Rate;

    fn sub(self, rhs: Self) -> Self::Output {
        Rate(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Rate {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Rate::ZERO, Add::add)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 != 0 && self.0 % Gbit == 0 {
            write!(f, "{}gbit", self.0 / Gbit)
        } else if self.0 != 0 && self.0 % Mbit == 0 {
            write!(f, "{}mbit", self.0 / Mbit)
        } else {
            write!(f, "{}kbit", self.0)
        }
    }
}
