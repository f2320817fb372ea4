//! Asset records.
//!
//! An asset is either plain (the backing collateral, fee-only state) or a
//! collateralized stable asset carrying the full bitasset-style record:
//! feed table, current median feed, settlement latch and fee pools.

use crate::feed::{median_feed, PriceFeed, ProducerFeed};
use crate::price::Price;
use crate::types::{AccountId, AssetId, FeeRate, Ratio, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub symbol: String,
    /// Market fee charged on trade proceeds in this asset.
    pub market_fee: FeeRate,
    /// Accumulated market fees, denominated in this asset.
    pub accumulated_fees: i64,
    pub stable: Option<StableAssetData>,
}

impl Asset {
    pub fn plain(id: AssetId, symbol: &str) -> Self {
        Self {
            id,
            symbol: symbol.to_string(),
            market_fee: FeeRate::ZERO,
            accumulated_fees: 0,
            stable: None,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.stable.is_some()
    }
}

/// Issuer-set parameters of a stable asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableAssetOptions {
    pub backing_asset: AssetId,
    pub feed_lifetime_secs: i64,
    pub minimum_feeds: usize,
    pub settle_delay_secs: i64,
    /// Margin-call fee ratio, per-mille on the same scale as MSSR.
    /// Zero disables the fee.
    pub margin_call_fee_ratio: Ratio,
}

impl StableAssetOptions {
    pub fn new(backing_asset: AssetId) -> Self {
        Self {
            backing_asset,
            feed_lifetime_secs: 86_400,
            minimum_feeds: 1,
            settle_delay_secs: 86_400,
            margin_call_fee_ratio: Ratio(0),
        }
    }
}

/// Frozen outcome of a global settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettlement {
    /// Fund-to-debt ratio at close-out: base = debt asset (total debt
    /// settled), quote = backing (fund at that moment). Payouts use this
    /// price forever after, regardless of how the fund drains.
    pub price: Price,
    /// Remaining seized collateral backing unredeemed debt.
    pub fund: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableAssetData {
    pub options: StableAssetOptions,
    pub feed_producers: BTreeSet<AccountId>,
    pub feeds: BTreeMap<AccountId, ProducerFeed>,
    /// Median over live producer feeds; None while the aggregate is
    /// undefined (too few producers or everything expired).
    pub current_feed: Option<PriceFeed>,
    pub settlement: Option<GlobalSettlement>,
    /// Accumulated margin-call fees, denominated in the backing asset.
    /// A sink: nothing in the core pays out of it.
    pub collateral_fees: i64,
}

impl StableAssetData {
    pub fn new(options: StableAssetOptions) -> Self {
        Self {
            options,
            feed_producers: BTreeSet::new(),
            feeds: BTreeMap::new(),
            current_feed: None,
            settlement: None,
            collateral_fees: 0,
        }
    }

    pub fn has_settlement(&self) -> bool {
        self.settlement.is_some()
    }

    /// Recompute the median feed. Returns true when the effective feed
    /// changed, which is what forces a margin-call reconsideration.
    pub fn update_current_feed(&mut self, now: Timestamp) -> bool {
        let next = median_feed(
            &self.feeds,
            now,
            self.options.feed_lifetime_secs,
            self.options.minimum_feeds,
        );
        let changed = next != self.current_feed;
        self.current_feed = next;
        changed
    }
}
