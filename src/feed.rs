// Price feed aggregation.
//
// Each stable asset keeps one feed per authorized producer. The effective
// feed is the per-field median over feeds that have not outlived the
// asset's feed lifetime; when fewer than the minimum number of producers
// have live feeds the asset has no current feed at all, matching still
// runs but margin-call detection is suspended.

use crate::price::Price;
use crate::types::{AccountId, Ratio, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One producer's view of the market: the settlement price (base = debt
/// asset, quote = backing collateral, value = collateral-per-debt) plus
/// the two protocol ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeed {
    pub settlement_price: Price,
    pub maintenance_collateral_ratio: Ratio,
    pub max_short_squeeze_ratio: Ratio,
}

impl PriceFeed {
    /// The most collateral a margin call pays per unit of debt:
    /// feed value times MSSR.
    pub fn max_short_squeeze_price(&self) -> Price {
        self.settlement_price
            .scaled(self.max_short_squeeze_ratio.value() as i128, 1000)
    }

    /// Squeeze price net of the margin-call fee. With a zero fee this is
    /// exactly the squeeze price.
    pub fn margin_call_pays_price(&self, fee_ratio: Ratio) -> Price {
        let net = self
            .max_short_squeeze_ratio
            .value()
            .saturating_sub(fee_ratio.value())
            .max(1);
        self.settlement_price.scaled(net as i128, 1000)
    }

    /// Collateralization below which a position is margin-called:
    /// feed value times MCR.
    pub fn maintenance_collateralization(&self) -> Price {
        self.settlement_price
            .scaled(self.maintenance_collateral_ratio.value() as i128, 1000)
    }
}

/// A feed as published, with its publication time for expiry tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerFeed {
    pub feed: PriceFeed,
    pub published_at: Timestamp,
}

impl ProducerFeed {
    pub fn is_live(&self, now: Timestamp, lifetime_secs: i64) -> bool {
        self.published_at.plus(lifetime_secs) > now
    }
}

/// Per-field median over the live feeds. Settlement prices are ordered by
/// value; with an even count the upper-middle element wins. Returns None
/// when fewer than `minimum_feeds` producers are live.
pub fn median_feed(
    feeds: &BTreeMap<AccountId, ProducerFeed>,
    now: Timestamp,
    lifetime_secs: i64,
    minimum_feeds: usize,
) -> Option<PriceFeed> {
    let live: Vec<&PriceFeed> = feeds
        .values()
        .filter(|f| f.is_live(now, lifetime_secs))
        .map(|f| &f.feed)
        .collect();
    if live.is_empty() || live.len() < minimum_feeds {
        return None;
    }

    let mid = live.len() / 2;

    let mut prices: Vec<Price> = live.iter().map(|f| f.settlement_price).collect();
    prices.sort_by(|a, b| a.cmp_value(b));

    let mut mcrs: Vec<Ratio> = live.iter().map(|f| f.maintenance_collateral_ratio).collect();
    mcrs.sort();

    let mut mssrs: Vec<Ratio> = live.iter().map(|f| f.max_short_squeeze_ratio).collect();
    mssrs.sort();

    Some(PriceFeed {
        settlement_price: prices[mid],
        maintenance_collateral_ratio: mcrs[mid],
        max_short_squeeze_ratio: mssrs[mid],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetAmount, AssetId};

    const USD: AssetId = AssetId(1);
    const CORE: AssetId = AssetId(0);

    fn feed(debt: i64, coll: i64) -> PriceFeed {
        PriceFeed {
            settlement_price: Price::new(
                AssetAmount::new(debt, USD),
                AssetAmount::new(coll, CORE),
            )
            .unwrap(),
            maintenance_collateral_ratio: Ratio(1750),
            max_short_squeeze_ratio: Ratio(1100),
        }
    }

    fn published(f: PriceFeed, at: i64) -> ProducerFeed {
        ProducerFeed {
            feed: f,
            published_at: Timestamp::from_secs(at),
        }
    }

    #[test]
    fn squeeze_price_derivation() {
        let f = feed(1, 10);
        let mssp = f.max_short_squeeze_price();
        let eleven = Price::new(AssetAmount::new(1, USD), AssetAmount::new(11, CORE)).unwrap();
        assert_eq!(mssp.cmp_value(&eleven), std::cmp::Ordering::Equal);
    }

    #[test]
    fn pays_price_includes_fee() {
        let f = feed(1, 18);
        // MSSR 1100, fee 80 => 18 * 1020/1000 = 18.36 collateral per debt
        let pays = f.margin_call_pays_price(Ratio(80));
        let reference =
            Price::new(AssetAmount::new(1000, USD), AssetAmount::new(18360, CORE)).unwrap();
        assert_eq!(pays.cmp_value(&reference), std::cmp::Ordering::Equal);
        // zero fee collapses to the squeeze price
        let no_fee = f.margin_call_pays_price(Ratio(0));
        assert_eq!(
            no_fee.cmp_value(&f.max_short_squeeze_price()),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn maintenance_threshold() {
        let f = feed(1, 10);
        let maint = f.maintenance_collateralization();
        let seventeen_five =
            Price::new(AssetAmount::new(10, USD), AssetAmount::new(175, CORE)).unwrap();
        assert_eq!(maint.cmp_value(&seventeen_five), std::cmp::Ordering::Equal);
    }

    #[test]
    fn median_picks_middle_feed() {
        let mut feeds = BTreeMap::new();
        feeds.insert(AccountId(1), published(feed(1, 5), 100));
        feeds.insert(AccountId(2), published(feed(1, 10), 100));
        feeds.insert(AccountId(3), published(feed(1, 20), 100));
        let m = median_feed(&feeds, Timestamp::from_secs(200), 86_400, 1).unwrap();
        assert_eq!(
            m.settlement_price.cmp_value(&feed(1, 10).settlement_price),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn expired_feeds_drop_out() {
        let mut feeds = BTreeMap::new();
        feeds.insert(AccountId(1), published(feed(1, 5), 0));
        feeds.insert(AccountId(2), published(feed(1, 20), 90_000));
        // producer 1 expired, only producer 2 counts
        let m = median_feed(&feeds, Timestamp::from_secs(100_000), 86_400, 1).unwrap();
        assert_eq!(
            m.settlement_price.cmp_value(&feed(1, 20).settlement_price),
            std::cmp::Ordering::Equal
        );
        // minimum of two cannot be met
        assert!(median_feed(&feeds, Timestamp::from_secs(100_000), 86_400, 2).is_none());
        // everything expired
        assert!(median_feed(&feeds, Timestamp::from_secs(500_000), 86_400, 1).is_none());
    }
}
