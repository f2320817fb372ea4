//! Limit orders and the per-pair book.
//!
//! Each directed pair (pay asset, receive asset) is one side of a market.
//! Orders sort by demanded price ascending, then age, then id, so the
//! first order of a side is always the next to fill and ties break
//! deterministically.

use crate::price::Price;
use crate::types::{AccountId, AssetId, OrderId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: OrderId,
    pub owner: AccountId,
    /// Remaining escrowed amount of the pay asset.
    pub for_sale: i64,
    /// base = pay asset, quote = receive asset; the value is what the
    /// order demands per unit paid. Fixed for the order's lifetime.
    pub sell_price: Price,
    pub created_at: Timestamp,
    pub expiration: Timestamp,
}

impl LimitOrder {
    pub fn pay_asset(&self) -> AssetId {
        self.sell_price.base.asset
    }

    pub fn receive_asset(&self) -> AssetId {
        self.sell_price.quote.asset
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration <= now
    }
}

/// Price-time-id priority key. Lower demanded value first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    base: i64,
    quote: i64,
    created_at: Timestamp,
    id: OrderId,
}

impl OrderKey {
    fn of(order: &LimitOrder) -> Self {
        Self {
            base: order.sell_price.base.amount,
            quote: order.sell_price.quote.amount,
            created_at: order.created_at,
            id: order.id,
        }
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.quote as i128 * other.base as i128;
        let rhs = other.quote as i128 * self.base as i128;
        lhs.cmp(&rhs)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type Pair = (AssetId, AssetId);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    sides: BTreeMap<Pair, BTreeMap<OrderKey, LimitOrder>>,
    #[serde(skip)]
    index: HashMap<OrderId, (Pair, OrderKey)>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: LimitOrder) {
        let pair = (order.pay_asset(), order.receive_asset());
        let key = OrderKey::of(&order);
        self.index.insert(order.id, (pair, key));
        self.sides.entry(pair).or_default().insert(key, order);
    }

    pub fn remove(&mut self, id: OrderId) -> Option<LimitOrder> {
        let (pair, key) = self.index.remove(&id)?;
        let side = self.sides.get_mut(&pair)?;
        let order = side.remove(&key);
        if side.is_empty() {
            self.sides.remove(&pair);
        }
        order
    }

    pub fn get(&self, id: OrderId) -> Option<&LimitOrder> {
        let (pair, key) = self.index.get(&id)?;
        self.sides.get(pair)?.get(key)
    }

    /// Best order selling `pay` for `receive`: lowest demanded price.
    pub fn best(&self, pay: AssetId, receive: AssetId) -> Option<&LimitOrder> {
        self.sides
            .get(&(pay, receive))?
            .values()
            .next()
    }

    /// Reduce a resting order's remainder in place. The price component of
    /// its key never changes, so the position in the side is stable.
    pub fn fill(&mut self, id: OrderId, pay_amount: i64) -> Option<i64> {
        let (pair, key) = self.index.get(&id)?;
        let side = self.sides.get_mut(pair)?;
        let order = side.get_mut(key)?;
        debug_assert!(pay_amount <= order.for_sale);
        order.for_sale -= pay_amount;
        Some(order.for_sale)
    }

    /// Pop every order that has expired as of `now`. Runs at block
    /// boundaries before any matching observes the book.
    pub fn drain_expired(&mut self, now: Timestamp) -> Vec<LimitOrder> {
        let expired: Vec<OrderId> = self
            .sides
            .values()
            .flat_map(|side| side.values())
            .filter(|o| o.is_expired(now))
            .map(|o| o.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sides.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sides.values().all(|s| s.is_empty())
    }

    pub fn orders(&self) -> impl Iterator<Item = &LimitOrder> {
        self.sides.values().flat_map(|s| s.values())
    }

    /// Rebuild the id index, e.g. after deserialization.
    pub fn reindex(&mut self) {
        self.index = self
            .sides
            .iter()
            .flat_map(|(pair, side)| side.keys().map(move |k| (k.id, (*pair, *k))))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetAmount;

    const USD: AssetId = AssetId(1);
    const CORE: AssetId = AssetId(0);

    fn sell(id: u64, pay: i64, receive: i64, at: i64) -> LimitOrder {
        LimitOrder {
            id: OrderId(id),
            owner: AccountId(1),
            for_sale: pay,
            sell_price: Price::new(
                AssetAmount::new(pay, USD),
                AssetAmount::new(receive, CORE),
            )
            .unwrap(),
            created_at: Timestamp::from_secs(at),
            expiration: Timestamp::never(),
        }
    }

    #[test]
    fn price_then_time_then_id() {
        let mut book = OrderBook::new();
        book.insert(sell(1, 7, 60, 100));
        book.insert(sell(2, 7, 59, 200)); // cheapest
        book.insert(sell(3, 7, 60, 50)); // same price as 1, earlier
        let best = book.best(USD, CORE).unwrap();
        assert_eq!(best.id, OrderId(2));
        book.remove(OrderId(2));
        assert_eq!(book.best(USD, CORE).unwrap().id, OrderId(3));
    }

    #[test]
    fn partial_fill_keeps_position() {
        let mut book = OrderBook::new();
        book.insert(sell(1, 1100, 15451, 0));
        assert_eq!(book.fill(OrderId(1), 1000), Some(100));
        assert_eq!(book.best(USD, CORE).unwrap().for_sale, 100);
    }

    #[test]
    fn expiry_drains_orders() {
        let mut book = OrderBook::new();
        let mut o = sell(1, 7, 59, 0);
        o.expiration = Timestamp::from_secs(300);
        book.insert(o);
        book.insert(sell(2, 7, 78, 0));
        let gone = book.drain_expired(Timestamp::from_secs(300));
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].id, OrderId(1));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn sides_are_directed() {
        let mut book = OrderBook::new();
        book.insert(sell(1, 7, 60, 0));
        assert!(book.best(CORE, USD).is_none());
        assert!(book.best(USD, CORE).is_some());
    }
}
