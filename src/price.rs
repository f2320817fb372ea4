//! Exact rational prices.
//!
//! A price is a pair of asset amounts. Its value reads as "quote units per
//! one base unit" and all comparisons and conversions are exact integer
//! arithmetic with 128-bit intermediates. Nothing in the matching path is
//! allowed to lose precision except through an explicit rounding mode.

use crate::types::{AssetAmount, AssetId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Rounding direction for amount conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("amount asset does not match either side of the price")]
    AssetMismatch,
    #[error("conversion overflowed a 64-bit amount")]
    Overflow,
    #[error("price has a zero or negative component")]
    NotPositive,
}

/// `quote.amount` units of `quote.asset` per `base.amount` units of
/// `base.asset`. For a limit order the base is what the order pays; for a
/// feed the base is the debt asset and the quote the backing collateral,
/// so the value is collateral-per-debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub base: AssetAmount,
    pub quote: AssetAmount,
}

impl Price {
    #[must_use]
    pub fn new(base: AssetAmount, quote: AssetAmount) -> Option<Self> {
        if base.amount > 0 && quote.amount > 0 && base.asset != quote.asset {
            Some(Self { base, quote })
        } else {
            None
        }
    }

    /// Build a price from wide intermediates, reducing by gcd and halving
    /// both sides until they fit back into 64 bits. Derived prices (squeeze,
    /// maintenance) are produced this way so scaling can never overflow.
    pub fn from_ratio(
        base_amount: i128,
        base_asset: AssetId,
        quote_amount: i128,
        quote_asset: AssetId,
    ) -> Self {
        let (b, q) = reduce(base_amount.max(1), quote_amount.max(1));
        Self {
            base: AssetAmount::new(b, base_asset),
            quote: AssetAmount::new(q, quote_asset),
        }
    }

    /// Swap the two sides.
    pub fn invert(&self) -> Self {
        Self {
            base: self.quote,
            quote: self.base,
        }
    }

    pub fn base_asset(&self) -> AssetId {
        self.base.asset
    }

    pub fn quote_asset(&self) -> AssetId {
        self.quote.asset
    }

    /// Value comparison. Both prices must quote the same pair in the same
    /// orientation; the indices and the match loop guarantee this.
    pub fn cmp_value(&self, other: &Price) -> Ordering {
        debug_assert_eq!(self.base.asset, other.base.asset);
        debug_assert_eq!(self.quote.asset, other.quote.asset);
        let lhs = self.quote.amount as i128 * other.base.amount as i128;
        let rhs = other.quote.amount as i128 * self.base.amount as i128;
        lhs.cmp(&rhs)
    }

    pub fn lt_value(&self, other: &Price) -> bool {
        self.cmp_value(other) == Ordering::Less
    }

    pub fn le_value(&self, other: &Price) -> bool {
        self.cmp_value(other) != Ordering::Greater
    }

    /// Multiply the value by `num/den` (e.g. a per-mille ratio).
    pub fn scaled(&self, num: i128, den: i128) -> Self {
        Self::from_ratio(
            self.base.amount as i128 * den,
            self.base.asset,
            self.quote.amount as i128 * num,
            self.quote.asset,
        )
    }

    /// Convert an amount of one side into the other at this price.
    pub fn convert(&self, amount: AssetAmount, rounding: Rounding) -> Result<AssetAmount, PriceError> {
        let (num, den, out_asset) = if amount.asset == self.base.asset {
            (self.quote.amount, self.base.amount, self.quote.asset)
        } else if amount.asset == self.quote.asset {
            (self.base.amount, self.quote.amount, self.base.asset)
        } else {
            return Err(PriceError::AssetMismatch);
        };
        if num <= 0 || den <= 0 || amount.amount < 0 {
            return Err(PriceError::NotPositive);
        }
        let wide = amount.amount as i128 * num as i128;
        let out = match rounding {
            Rounding::Down => wide / den as i128,
            Rounding::Up => (wide + den as i128 - 1) / den as i128,
        };
        if out > i64::MAX as i128 {
            return Err(PriceError::Overflow);
        }
        Ok(AssetAmount::new(out as i64, out_asset))
    }
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn reduce(mut base: i128, mut quote: i128) -> (i64, i64) {
    let g = gcd(base, quote);
    if g > 1 {
        base /= g;
        quote /= g;
    }
    while base > i64::MAX as i128 || quote > i64::MAX as i128 {
        base = (base / 2).max(1);
        quote = (quote / 2).max(1);
    }
    (base as i64, quote as i64)
}

/// Two orders on opposite sides cross when the product of what each side
/// demands does not exceed the product of what each side offers.
pub fn orders_cross(ask: &Price, opposite: &Price) -> bool {
    debug_assert_eq!(ask.base.asset, opposite.quote.asset);
    debug_assert_eq!(ask.quote.asset, opposite.base.asset);
    let demands = ask.quote.amount as i128 * opposite.quote.amount as i128;
    let offers = ask.base.amount as i128 * opposite.base.amount as i128;
    demands <= offers
}
