//! Collateralized debt positions and their indices.
//!
//! A call order owes `debt` of the stable asset against `collateral` of
//! the backing asset. The table maintains three orderings: live
//! collateralization ascending (the margin-call queue), the stored legacy
//! `call_price` ascending (pre-revision replay only), and owner lookup.
//! A position exists only while both sides are positive; it dies by full
//! cover, full fill, or global settlement.

use crate::feed::PriceFeed;
use crate::price::{Price, Rounding};
use crate::types::{AccountId, AssetAmount, AssetId, CallId, Ratio};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOrder {
    pub id: CallId,
    pub owner: AccountId,
    pub debt_asset: AssetId,
    pub collateral_asset: AssetId,
    pub debt: i64,
    pub collateral: i64,
    /// Optional target: bound forced covers so the position is only
    /// deleveraged back to this ratio. None covers up to full debt.
    pub target_ratio: Option<Ratio>,
    /// Legacy sort and detection key: collateralization divided by the
    /// MCR in force at the last position update. Goes stale when the MCR
    /// moves, which is exactly the historical behavior the revision gate
    /// preserves. Never authoritative after the live-MCR revision.
    pub call_price: Price,
}

impl CallOrder {
    /// Live collateral-per-debt ratio as an exact price.
    pub fn collateralization(&self) -> Price {
        Price::from_ratio(
            self.debt as i128,
            self.debt_asset,
            self.collateral as i128,
            self.collateral_asset,
        )
    }

    pub fn refresh_call_price(&mut self, mcr: Ratio) {
        self.call_price = Price::from_ratio(
            self.debt as i128 * mcr.value().max(1) as i128,
            self.debt_asset,
            self.collateral as i128 * 1000,
            self.collateral_asset,
        );
    }

    /// The most debt a forced fill may cover at `match_price`, honoring
    /// the target collateral ratio. Returns full debt when no target is
    /// set or when no partial cover can reach the target. Exact integer
    /// derivation of: find least x with
    /// (collateral - ceil(x * match)) / (debt - x) >= T * feed.
    pub fn max_debt_to_cover(&self, match_price: &Price, feed: &PriceFeed) -> i64 {
        let Some(target) = self.target_ratio else {
            return self.debt;
        };
        let t = target
            .value()
            .max(feed.maintenance_collateral_ratio.value()) as i128;
        let f_b = feed.settlement_price.base.amount as i128;
        let f_q = feed.settlement_price.quote.amount as i128;
        let m_b = match_price.base.amount as i128;
        let m_q = match_price.quote.amount as i128;
        let d = self.debt as i128;
        let c = self.collateral as i128;

        let num = match t
            .checked_mul(f_q)
            .and_then(|v| v.checked_mul(m_b))
            .and_then(|v| v.checked_mul(d))
            .and_then(|v| {
                let sub = 1000i128.checked_mul(c)?.checked_mul(f_b)?.checked_mul(m_b)?;
                v.checked_sub(sub)
            }) {
            Some(v) => v,
            None => return self.debt,
        };
        let den = match t
            .checked_mul(f_q)
            .and_then(|v| v.checked_mul(m_b))
            .and_then(|v| {
                let sub = 1000i128.checked_mul(f_b)?.checked_mul(m_q)?;
                v.checked_sub(sub)
            }) {
            Some(v) => v,
            None => return self.debt,
        };

        if den <= 0 {
            // match price at or above the target line: covering cannot
            // restore the ratio, take the whole position
            return self.debt;
        }
        if num <= 0 {
            return 0;
        }

        let mut x = ((num + den - 1) / den).clamp(0, d);
        // integer rounding of the collateral leg can leave the position a
        // hair under target; bump at most twice, then concede full cover
        for _ in 0..2 {
            if x >= d || self.cover_reaches_target(x, t, match_price, feed) {
                return x as i64;
            }
            x += 1;
        }
        if self.cover_reaches_target(x, t, match_price, feed) {
            x as i64
        } else {
            self.debt
        }
    }

    fn cover_reaches_target(&self, x: i128, t: i128, match_price: &Price, feed: &PriceFeed) -> bool {
        let pay = AssetAmount::new(x as i64, self.debt_asset);
        let y = match match_price.convert(pay, Rounding::Up) {
            Ok(out) => out.amount as i128,
            Err(_) => return false,
        };
        let c_left = self.collateral as i128 - y;
        let d_left = self.debt as i128 - x;
        if c_left < 0 || d_left <= 0 {
            return false;
        }
        let f_b = feed.settlement_price.base.amount as i128;
        let f_q = feed.settlement_price.quote.amount as i128;
        // c_left / d_left >= (t/1000) * (f_q/f_b)
        match (
            c_left.checked_mul(1000).and_then(|v| v.checked_mul(f_b)),
            t.checked_mul(d_left).and_then(|v| v.checked_mul(f_q)),
        ) {
            (Some(lhs), Some(rhs)) => lhs >= rhs,
            _ => false,
        }
    }
}

/// Sort key for the two ratio-ordered indices: ascending quote/base with
/// the id as the deterministic tiebreaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioKey {
    pub base: i64,
    pub quote: i64,
    pub id: CallId,
}

impl Ord for RatioKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.quote as i128 * other.base as i128;
        let rhs = other.quote as i128 * self.base as i128;
        lhs.cmp(&rhs).then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for RatioKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallTable {
    calls: BTreeMap<CallId, CallOrder>,
    by_ratio: BTreeMap<AssetId, BTreeSet<RatioKey>>,
    by_call_price: BTreeMap<AssetId, BTreeSet<RatioKey>>,
    by_owner: BTreeMap<(AccountId, AssetId), CallId>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn ratio_key(call: &CallOrder) -> RatioKey {
        RatioKey {
            base: call.debt,
            quote: call.collateral,
            id: call.id,
        }
    }

    fn price_key(call: &CallOrder) -> RatioKey {
        RatioKey {
            base: call.call_price.base.amount,
            quote: call.call_price.quote.amount,
            id: call.id,
        }
    }

    pub fn insert(&mut self, call: CallOrder) {
        self.by_ratio
            .entry(call.debt_asset)
            .or_default()
            .insert(Self::ratio_key(&call));
        self.by_call_price
            .entry(call.debt_asset)
            .or_default()
            .insert(Self::price_key(&call));
        self.by_owner.insert((call.owner, call.debt_asset), call.id);
        self.calls.insert(call.id, call);
    }

    pub fn remove(&mut self, id: CallId) -> Option<CallOrder> {
        let call = self.calls.remove(&id)?;
        if let Some(set) = self.by_ratio.get_mut(&call.debt_asset) {
            set.remove(&Self::ratio_key(&call));
        }
        if let Some(set) = self.by_call_price.get_mut(&call.debt_asset) {
            set.remove(&Self::price_key(&call));
        }
        self.by_owner.remove(&(call.owner, call.debt_asset));
        Some(call)
    }

    pub fn get(&self, id: CallId) -> Option<&CallOrder> {
        self.calls.get(&id)
    }

    pub fn owner_call(&self, owner: AccountId, debt_asset: AssetId) -> Option<&CallOrder> {
        self.by_owner
            .get(&(owner, debt_asset))
            .and_then(|id| self.calls.get(id))
    }

    /// Mutate a position through the table so both indices stay true.
    pub fn update<F: FnOnce(&mut CallOrder)>(&mut self, id: CallId, f: F) -> bool {
        let Some(mut call) = self.remove(id) else {
            return false;
        };
        f(&mut call);
        self.insert(call);
        true
    }

    pub fn least_collateralized(&self, debt_asset: AssetId) -> Option<&CallOrder> {
        self.by_ratio
            .get(&debt_asset)?
            .iter()
            .next()
            .and_then(|k| self.calls.get(&k.id))
    }

    /// Position ids ordered for margin-call processing. `legacy_order`
    /// selects the stale call-price index instead of live
    /// collateralization.
    pub fn ids_in_call_order(&self, debt_asset: AssetId, legacy_order: bool) -> Vec<CallId> {
        let index = if legacy_order {
            self.by_call_price.get(&debt_asset)
        } else {
            self.by_ratio.get(&debt_asset)
        };
        index
            .map(|set| set.iter().map(|k| k.id).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, debt_asset: AssetId) -> usize {
        self.by_ratio.get(&debt_asset).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USD: AssetId = AssetId(1);
    const CORE: AssetId = AssetId(0);

    fn calls_with_tcr(
        id: u64,
        owner: u64,
        debt: i64,
        collateral: i64,
        tcr: Option<u16>,
    ) -> CallOrder {
        let mut c = CallOrder {
            id: CallId(id),
            owner: AccountId(owner),
            debt_asset: USD,
            collateral_asset: CORE,
            debt,
            collateral,
            target_ratio: tcr.map(Ratio),
            call_price: Price::from_ratio(1, USD, 1, CORE),
        };
        c.refresh_call_price(Ratio(1750));
        c
    }

    fn call(id: u64, owner: u64, debt: i64, collateral: i64) -> CallOrder {
        calls_with_tcr(id, owner, debt, collateral, None)
    }

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

    #[test]
    fn ratio_index_orders_least_collateralized_first() {
        let mut table = CallTable::new();
        table.insert(call(1, 1, 310, 7410)); // 23.9
        table.insert(call(2, 2, 1000, 15500)); // 15.5
        table.insert(call(3, 3, 1000, 16000)); // 16.0
        assert_eq!(table.least_collateralized(USD).unwrap().id, CallId(2));
        assert_eq!(
            table.ids_in_call_order(USD, false),
            vec![CallId(2), CallId(3), CallId(1)]
        );
    }

    #[test]
    fn update_reindexes() {
        let mut table = CallTable::new();
        table.insert(call(1, 1, 1000, 15000)); // 15.0
        table.insert(call(2, 2, 1000, 15500)); // 15.5
        // cover most of position 1: it becomes the best collateralized
        table.update(CallId(1), |c| {
            c.debt = 310;
            c.collateral = 7410;
            c.refresh_call_price(Ratio(1750));
        });
        assert_eq!(table.least_collateralized(USD).unwrap().id, CallId(2));
        assert_eq!(table.owner_call(AccountId(1), USD).unwrap().debt, 310);
    }

    #[test]
    fn stale_call_price_order_differs_from_live_order() {
        let mut table = CallTable::new();
        let mut a = call(1, 1, 1000, 15000);
        a.refresh_call_price(Ratio(1750));
        let mut b = call(2, 2, 1000, 15500);
        // b's key was refreshed under a much higher MCR, pushing it first
        b.refresh_call_price(Ratio(2500));
        table.insert(a);
        table.insert(b);
        assert_eq!(table.ids_in_call_order(USD, false)[0], CallId(1));
        assert_eq!(table.ids_in_call_order(USD, true)[0], CallId(2));
    }

    #[test]
    fn target_ratio_bounds_cover() {
        // debt 1000, collateral 15000, TCR 170% (below MCR, so MCR wins)
        let c = calls_with_tcr(1, 1, 1000, 15000, Some(1700));
        let f = feed(1, 10);
        let mssp = Price::new(AssetAmount::new(1, USD), AssetAmount::new(11, CORE)).unwrap();
        let cover = c.max_debt_to_cover(&mssp, &f);
        assert_eq!(cover, 385);
        // covering 385 at 11 leaves 615 debt / 10765 collateral = 17.504
        assert!(cover < c.debt);

        // TCR 200% demands a deeper cover
        let c2 = calls_with_tcr(2, 2, 1000, 15500, Some(2000));
        assert_eq!(c2.max_debt_to_cover(&mssp, &f), 500);
    }

    #[test]
    fn no_target_covers_full_debt() {
        let c = call(1, 1, 1000, 16000);
        let f = feed(1, 10);
        let mssp = Price::new(AssetAmount::new(1, USD), AssetAmount::new(11, CORE)).unwrap();
        assert_eq!(c.max_debt_to_cover(&mssp, &f), 1000);
    }
}
