//! Core engine struct and basic operations.

use super::results::EngineError;
use super::settle::SettlementRequest;
use crate::asset::{Asset, StableAssetData, StableAssetOptions};
use crate::book::{LimitOrder, OrderBook};
use crate::call::{CallOrder, CallTable};
use crate::events::{
    CancelReason, Event, EventId, EventPayload, FeedPublishedEvent, OrderCanceledEvent,
};
use crate::feed::{PriceFeed, ProducerFeed};
use crate::revision::{Revision, RevisionSchedule};
use crate::types::{AccountId, AssetId, CallId, FeeRate, OrderId, SettlementId, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

/// Engine tuning knobs. Everything market-related lives on the asset
/// records instead; this only controls the host-facing surface.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Event-log retention cap.
    pub max_events: usize,
    /// Print every event as it is emitted.
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            verbose: false,
        }
    }
}

/// The core matching engine. Owns the book, the debt-position table and
/// per-asset stable records; balances stand in for the external store the
/// block applier would normally provide.
#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) rules: RevisionSchedule,
    pub(super) assets: BTreeMap<AssetId, Asset>,
    pub(super) balances: BTreeMap<(AccountId, AssetId), i64>,
    pub(super) book: OrderBook,
    pub(super) calls: CallTable,
    pub(super) settlements: BTreeMap<SettlementId, SettlementRequest>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) next_order_id: u64,
    pub(super) next_call_id: u64,
    pub(super) next_settlement_id: u64,
    pub(super) next_asset_id: u32,
    pub(super) next_account_id: u64,
    pub(super) current_time: Timestamp,
}

impl Engine {
    /// Create a new engine with current rules (every revision active).
    pub fn new(config: EngineConfig) -> Self {
        Self::with_rules(config, RevisionSchedule::all_active())
    }

    /// Create an engine pinned to a replay schedule.
    pub fn with_rules(config: EngineConfig, rules: RevisionSchedule) -> Self {
        Self {
            config,
            rules,
            assets: BTreeMap::new(),
            balances: BTreeMap::new(),
            book: OrderBook::new(),
            calls: CallTable::new(),
            settlements: BTreeMap::new(),
            events: Vec::new(),
            next_event_id: 1,
            next_order_id: 1,
            next_call_id: 1,
            next_settlement_id: 1,
            next_asset_id: 0,
            next_account_id: 1,
            current_time: Timestamp::from_secs(0),
        }
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn advance_time(&mut self, secs: i64) {
        self.current_time = self.current_time.plus(secs);
    }

    pub(super) fn active(&self, rev: Revision) -> bool {
        self.rules.is_active(rev, self.current_time)
    }

    // ---- accounts and balances -------------------------------------------

    pub fn create_account(&mut self) -> AccountId {
        let id = AccountId(self.next_account_id);
        self.next_account_id += 1;
        id
    }

    pub fn balance_of(&self, account: AccountId, asset: AssetId) -> i64 {
        self.balances.get(&(account, asset)).copied().unwrap_or(0)
    }

    /// Credit an account from outside the engine (the external balance
    /// store's deposit path).
    pub fn deposit(
        &mut self,
        account: AccountId,
        asset: AssetId,
        amount: i64,
    ) -> Result<(), EngineError> {
        if amount <= 0 {
            return Err(EngineError::ZeroAmount);
        }
        self.asset_ref(asset)?;
        self.credit(account, asset, amount);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        asset: AssetId,
        amount: i64,
    ) -> Result<(), EngineError> {
        if amount <= 0 {
            return Err(EngineError::ZeroAmount);
        }
        self.debit(from, asset, amount)?;
        self.credit(to, asset, amount);
        Ok(())
    }

    pub(super) fn credit(&mut self, account: AccountId, asset: AssetId, amount: i64) {
        if amount == 0 {
            return;
        }
        *self.balances.entry((account, asset)).or_insert(0) += amount;
    }

    pub(super) fn debit(
        &mut self,
        account: AccountId,
        asset: AssetId,
        amount: i64,
    ) -> Result<(), EngineError> {
        let entry = self.balances.entry((account, asset)).or_insert(0);
        if *entry < amount {
            return Err(EngineError::InsufficientBalance {
                asset,
                needed: amount,
                available: *entry,
            });
        }
        *entry -= amount;
        Ok(())
    }

    // ---- assets ----------------------------------------------------------

    pub fn create_asset(&mut self, symbol: &str) -> AssetId {
        let id = AssetId(self.next_asset_id);
        self.next_asset_id += 1;
        self.assets.insert(id, Asset::plain(id, symbol));
        id
    }

    pub fn create_stable_asset(
        &mut self,
        symbol: &str,
        market_fee: FeeRate,
        options: StableAssetOptions,
    ) -> Result<AssetId, EngineError> {
        if !self.assets.contains_key(&options.backing_asset) {
            return Err(EngineError::AssetNotFound(options.backing_asset));
        }
        let id = AssetId(self.next_asset_id);
        self.next_asset_id += 1;
        let mut asset = Asset::plain(id, symbol);
        asset.market_fee = market_fee;
        asset.stable = Some(StableAssetData::new(options));
        self.assets.insert(id, asset);
        Ok(id)
    }

    pub fn set_feed_producers(
        &mut self,
        asset: AssetId,
        producers: &[AccountId],
    ) -> Result<(), EngineError> {
        let keep: BTreeSet<AccountId> = producers.iter().copied().collect();
        let now = self.current_time;
        let stable = self.stable_mut(asset)?;
        stable.feed_producers = keep.clone();
        stable.feeds.retain(|producer, _| keep.contains(producer));
        stable.update_current_feed(now);
        Ok(())
    }

    pub fn asset_ref(&self, id: AssetId) -> Result<&Asset, EngineError> {
        self.assets.get(&id).ok_or(EngineError::AssetNotFound(id))
    }

    pub fn stable_data(&self, id: AssetId) -> Result<&StableAssetData, EngineError> {
        self.asset_ref(id)?
            .stable
            .as_ref()
            .ok_or(EngineError::NotStableAsset(id))
    }

    pub(super) fn stable_mut(&mut self, id: AssetId) -> Result<&mut StableAssetData, EngineError> {
        self.assets
            .get_mut(&id)
            .ok_or(EngineError::AssetNotFound(id))?
            .stable
            .as_mut()
            .ok_or(EngineError::NotStableAsset(id))
    }

    /// Effective median feed, if any.
    pub fn current_feed(&self, id: AssetId) -> Option<PriceFeed> {
        self.stable_data(id).ok()?.current_feed
    }

    pub fn has_settlement(&self, id: AssetId) -> bool {
        self.stable_data(id)
            .map(|s| s.has_settlement())
            .unwrap_or(false)
    }

    pub fn settlement_fund(&self, id: AssetId) -> i64 {
        self.stable_data(id)
            .ok()
            .and_then(|s| s.settlement.as_ref().map(|g| g.fund))
            .unwrap_or(0)
    }

    pub fn collateral_fees(&self, id: AssetId) -> i64 {
        self.stable_data(id).map(|s| s.collateral_fees).unwrap_or(0)
    }

    pub fn accumulated_market_fees(&self, id: AssetId) -> i64 {
        self.asset_ref(id).map(|a| a.accumulated_fees).unwrap_or(0)
    }

    // ---- lookups used by tests and observers -----------------------------

    pub fn order(&self, id: OrderId) -> Option<&LimitOrder> {
        self.book.get(id)
    }

    pub fn call_position(&self, owner: AccountId, debt_asset: AssetId) -> Option<&CallOrder> {
        self.calls.owner_call(owner, debt_asset)
    }

    pub fn call_by_id(&self, id: CallId) -> Option<&CallOrder> {
        self.calls.get(id)
    }

    pub fn open_call_count(&self, debt_asset: AssetId) -> usize {
        self.calls.count(debt_asset)
    }

    pub fn open_order_count(&self) -> usize {
        self.book.len()
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    // ---- feeds -----------------------------------------------------------

    /// Publish one producer's feed and reconsider the market.
    pub fn publish_feed(
        &mut self,
        producer: AccountId,
        asset: AssetId,
        feed: PriceFeed,
    ) -> Result<(), EngineError> {
        {
            let stable = self.stable_data(asset)?;
            if !stable.feed_producers.contains(&producer) {
                return Err(EngineError::NotFeedProducer);
            }
            let price = feed.settlement_price;
            if price.base.asset != asset
                || price.quote.asset != stable.options.backing_asset
                || price.base.amount <= 0
                || price.quote.amount <= 0
            {
                return Err(EngineError::BadFeed);
            }
            if feed.maintenance_collateral_ratio.value() < 1000
                || feed.max_short_squeeze_ratio.value() < 1000
            {
                return Err(EngineError::BadFeed);
            }
        }
        let now = self.current_time;
        let feed_is_valid = {
            let stable = self.stable_mut(asset)?;
            stable.feeds.insert(
                producer,
                ProducerFeed {
                    feed,
                    published_at: now,
                },
            );
            stable.update_current_feed(now);
            stable.current_feed.is_some()
        };
        self.emit_event(EventPayload::FeedPublished(FeedPublishedEvent {
            asset,
            producer,
            feed_is_valid,
        }));
        self.process_market(asset)
    }

    // ---- block boundary --------------------------------------------------

    /// The per-block tick: expire orders, expire feeds, execute due
    /// settlements, then reconsider every touched asset. Expiry runs
    /// before matching so no pass ever observes a dead order.
    pub fn on_block_end(&mut self, now: Timestamp) -> Result<(), EngineError> {
        self.current_time = now;
        let mut touched: BTreeSet<AssetId> = BTreeSet::new();

        for order in self.book.drain_expired(now) {
            self.credit(order.owner, order.pay_asset(), order.for_sale);
            if self.asset_ref(order.pay_asset())?.is_stable() {
                touched.insert(order.pay_asset());
            }
            if self.asset_ref(order.receive_asset())?.is_stable() {
                touched.insert(order.receive_asset());
            }
            self.emit_event(EventPayload::OrderCanceled(OrderCanceledEvent {
                order_id: order.id,
                owner: order.owner,
                refunded: order.for_sale,
                reason: CancelReason::Expired,
            }));
        }

        if self.active(Revision::FeedExpiry) {
            let stable_ids: Vec<AssetId> = self
                .assets
                .values()
                .filter(|a| a.is_stable())
                .map(|a| a.id)
                .collect();
            for id in stable_ids {
                let stable = self.stable_mut(id)?;
                let lifetime = stable.options.feed_lifetime_secs;
                stable
                    .feeds
                    .retain(|_, feed| feed.is_live(now, lifetime));
                if stable.update_current_feed(now) {
                    touched.insert(id);
                }
            }
        }

        self.execute_due_settlements(now, &mut touched)?;

        for id in touched {
            self.process_market(id)?;
        }
        Ok(())
    }

    // ---- events ----------------------------------------------------------

    pub(super) fn mint_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    pub(super) fn mint_call_id(&mut self) -> CallId {
        let id = CallId(self.next_call_id);
        self.next_call_id += 1;
        id
    }

    pub(super) fn mint_settlement_id(&mut self) -> SettlementId {
        let id = SettlementId(self.next_settlement_id);
        self.next_settlement_id += 1;
        id
    }

    /// Emit an event and add it to the event log.
    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if self.config.verbose {
            println!("[Event {}] {:?}", event.id.0, event.payload);
        }

        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }
}
