// Shared primitives: ids, integer amounts, per-mille ratios, chain time.
// Every id is its own newtype so an account handle can never stand in for
// an order or a position.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettlementId(pub u64);

/// An integer amount of a specific asset. All engine amounts are exact
/// integers; fractional quantities do not exist at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub amount: i64,
    pub asset: AssetId,
}

impl AssetAmount {
    pub fn new(amount: i64, asset: AssetId) -> Self {
        Self { amount, asset }
    }
}

impl fmt::Display for AssetAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.amount, self.asset.0)
    }
}

// per-mille ratio. 1750 = 175.0%. used for MCR, MSSR, TCR and the
// margin-call fee ratio (same scale as MSSR, see feed.rs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ratio(pub u16);

impl Ratio {
    pub const ONE: Ratio = Ratio(1000);

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}%", self.0 / 10, self.0 % 10)
    }
}

// fee rate in parts per 10000. 100 = 1%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate(pub u16);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);

    pub fn value(&self) -> u16 {
        self.0
    }

    /// Fee taken out of `amount`, rounded down so small fills pay nothing.
    pub fn apply(&self, amount: i64) -> i64 {
        ((amount as i128 * self.0 as i128) / 10_000) as i64
    }
}

// chain timestamp in seconds. the engine never reads the wall clock;
// time is injected by the block applier. `now()` exists for the demo binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp())
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn never() -> Self {
        Self(i64::MAX)
    }

    pub fn plus(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}
