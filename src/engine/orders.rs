//! Order placement and the taker matching loop.
//!
//! An incoming order matches, in precedence order: resting opposite
//! limits priced strictly better than the short-squeeze price, then
//! margin-called debt positions at the squeeze price, then the remaining
//! opposite limits. Every fill executes at the resting side's price and
//! the resting side is never underpaid; the incoming side absorbs
//! rounding. Historical variants of each rule sit behind the revision
//! schedule.

use super::core::Engine;
use super::results::{EngineError, OrderOutcome};
use crate::book::LimitOrder;
use crate::call::CallOrder;
use crate::events::{
    CancelReason, EventPayload, LimitFillEvent, OrderCanceledEvent, OrderPlacedEvent,
};
use crate::feed::PriceFeed;
use crate::price::{orders_cross, Price, Rounding};
use crate::revision::Revision;
use crate::types::{AccountId, AssetAmount, AssetId, OrderId, Ratio, Timestamp};

/// Margin-call matching context for an order selling a stable asset into
/// its backing collateral.
pub(super) struct CallContext {
    pub feed: PriceFeed,
    pub fee_ratio: Ratio,
}

enum Counterparty {
    Limit(OrderId),
    Call(crate::types::CallId),
    /// A margin-called position cannot pay its way out even at the best
    /// available price: the asset must settle globally.
    Insolvent,
}

impl Engine {
    pub fn place_limit_order(
        &mut self,
        owner: AccountId,
        for_sale: AssetAmount,
        min_to_receive: AssetAmount,
        expiration: Timestamp,
    ) -> Result<OrderOutcome, EngineError> {
        if for_sale.amount <= 0 || min_to_receive.amount <= 0 {
            return Err(EngineError::ZeroAmount);
        }
        let sell_price = Price::new(for_sale, min_to_receive).ok_or(EngineError::BadPrice)?;
        self.asset_ref(for_sale.asset)?;
        self.asset_ref(min_to_receive.asset)?;
        if expiration <= self.current_time {
            return Err(EngineError::ExpirationInPast);
        }
        for asset in [for_sale.asset, min_to_receive.asset] {
            if self
                .asset_ref(asset)?
                .stable
                .as_ref()
                .is_some_and(|s| s.has_settlement())
            {
                return Err(EngineError::GloballySettled(asset));
            }
        }

        self.debit(owner, for_sale.asset, for_sale.amount)?;
        let order = LimitOrder {
            id: self.mint_order_id(),
            owner,
            for_sale: for_sale.amount,
            sell_price,
            created_at: self.current_time,
            expiration,
        };
        self.emit_event(EventPayload::OrderPlaced(OrderPlacedEvent {
            order_id: order.id,
            owner,
            for_sale: order.for_sale,
            sell_price,
        }));
        self.apply_limit_order(order)
    }

    pub fn cancel_limit_order(
        &mut self,
        owner: AccountId,
        order_id: OrderId,
    ) -> Result<(), EngineError> {
        let order = self
            .book
            .get(order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;
        if order.owner != owner {
            return Err(EngineError::NotOwner);
        }
        let order = self.book.remove(order_id).expect("order existed");
        self.credit(order.owner, order.pay_asset(), order.for_sale);
        self.emit_event(EventPayload::OrderCanceled(OrderCanceledEvent {
            order_id,
            owner,
            refunded: order.for_sale,
            reason: CancelReason::UserRequested,
        }));
        Ok(())
    }

    /// Match an incoming order to a fixpoint, then post any viable
    /// remainder.
    fn apply_limit_order(&mut self, mut order: LimitOrder) -> Result<OrderOutcome, EngineError> {
        let pay_asset = order.pay_asset();
        let receive_asset = order.receive_asset();
        let mut paid = 0i64;
        let mut received = 0i64;

        while order.for_sale > 0 {
            match self.pick_counterparty(&order)? {
                None => break,
                Some(Counterparty::Insolvent) => {
                    self.globally_settle(pay_asset)?;
                    break;
                }
                Some(Counterparty::Call(call_id)) => {
                    let Some((pays, gets)) = self.fill_order_against_call(&mut order, call_id)?
                    else {
                        break;
                    };
                    paid += pays;
                    received += gets;
                }
                Some(Counterparty::Limit(maker_id)) => {
                    let Some((pays, gets)) = self.fill_order_against_limit(&mut order, maker_id)?
                    else {
                        break;
                    };
                    paid += pays;
                    received += gets;
                }
            }
        }

        let remaining = order.for_sale;
        let is_posted = if remaining > 0 {
            // a remainder that can no longer buy a single unit is dust
            let dust = order
                .sell_price
                .convert(AssetAmount::new(remaining, pay_asset), Rounding::Down)
                .map(|out| out.amount == 0)
                .unwrap_or(true);
            if dust {
                self.credit(order.owner, pay_asset, remaining);
                self.emit_event(EventPayload::OrderCanceled(OrderCanceledEvent {
                    order_id: order.id,
                    owner: order.owner,
                    refunded: remaining,
                    reason: CancelReason::Unfillable,
                }));
                false
            } else {
                self.book.insert(order.clone());
                true
            }
        } else {
            false
        };

        // the book changed shape: give both stable sides of the pair a
        // chance to match or settle against the new state
        for asset in [pay_asset, receive_asset] {
            if self
                .assets
                .get(&asset)
                .map(|a| a.is_stable())
                .unwrap_or(false)
            {
                self.process_market(asset)?;
            }
        }

        Ok(OrderOutcome {
            order_id: order.id,
            paid,
            received,
            remaining,
            is_posted,
        })
    }

    /// Decide what the incoming order trades with next.
    fn pick_counterparty(&self, order: &LimitOrder) -> Result<Option<Counterparty>, EngineError> {
        let pay_asset = order.pay_asset();
        let receive_asset = order.receive_asset();

        let limit_candidate = self
            .book
            .best(receive_asset, pay_asset)
            .filter(|opp| orders_cross(&order.sell_price, &opp.sell_price));

        let call_candidate = self.callable_position(order)?;

        match (call_candidate, limit_candidate) {
            (None, None) => Ok(None),
            (None, Some(limit)) => Ok(Some(Counterparty::Limit(limit.id))),
            (Some(pick), None) => Ok(Some(pick)),
            (Some(pick), Some(limit)) => {
                if !self.active(Revision::LimitPriority) {
                    // margin calls historically pre-empted every resting
                    // limit, even better-priced ones
                    return Ok(Some(pick));
                }
                let ctx = self
                    .order_call_context(order)
                    .expect("call candidate implies context");
                let squeeze = ctx.feed.max_short_squeeze_price();
                let offered = limit.sell_price.invert();
                if squeeze.lt_value(&offered) {
                    Ok(Some(Counterparty::Limit(limit.id)))
                } else {
                    Ok(Some(pick))
                }
            }
        }
    }

    /// The first margin-called position the incoming order may trade
    /// with, or the insolvency marker when that position cannot pay.
    fn callable_position(&self, order: &LimitOrder) -> Result<Option<Counterparty>, EngineError> {
        let Some(ctx) = self.order_call_context(order) else {
            return Ok(None);
        };
        let pay_asset = order.pay_asset();
        let squeeze = ctx.feed.max_short_squeeze_price();

        // the order must be willing to sell at or below the squeeze price
        if squeeze.lt_value(&order.sell_price) {
            return Ok(None);
        }

        let legacy_order = !self.active(Revision::CollateralOrder);
        let mut first_called: Option<&CallOrder> = None;
        for id in self.calls.ids_in_call_order(pay_asset, legacy_order) {
            let call = self.calls.get(id).expect("indexed call exists");
            if self.is_margin_called(call, &ctx.feed) {
                first_called = Some(call);
                break;
            }
        }
        let Some(call) = first_called else {
            return Ok(None);
        };

        if !self.active(Revision::UnblockedMatching) {
            // historical blocker: when the cheapest standing ask is below
            // the position's stored call price, nothing matches at all
            let mut best_ask = order.sell_price;
            if let Some(resting) = self.book.best(pay_asset, order.receive_asset()) {
                if resting.sell_price.lt_value(&best_ask) {
                    best_ask = resting.sell_price;
                }
            }
            if best_ask.lt_value(&call.call_price) {
                return Ok(None);
            }
        }

        if self.active(Revision::InstantSettlement) {
            let threshold = ctx.feed.margin_call_pays_price(ctx.fee_ratio);
            if call.collateralization().lt_value(&threshold) {
                return Ok(Some(Counterparty::Insolvent));
            }
        }
        Ok(Some(Counterparty::Call(call.id)))
    }

    pub(super) fn order_call_context(&self, order: &LimitOrder) -> Option<CallContext> {
        let asset = self.assets.get(&order.pay_asset())?;
        let stable = asset.stable.as_ref()?;
        if stable.has_settlement() || stable.options.backing_asset != order.receive_asset() {
            return None;
        }
        let feed = stable.current_feed?;
        let fee_ratio = if self.active(Revision::CollateralFee) {
            stable.options.margin_call_fee_ratio
        } else {
            Ratio(0)
        };
        Some(CallContext { feed, fee_ratio })
    }

    /// Fill the incoming order against a margin-called position. The call
    /// is the maker: the fill price is the squeeze price (or, before the
    /// squeeze-price revision, the order's own price — the historical
    /// underpay). Returns None when the fill would round to nothing.
    fn fill_order_against_call(
        &mut self,
        order: &mut LimitOrder,
        call_id: crate::types::CallId,
    ) -> Result<Option<(i64, i64)>, EngineError> {
        let ctx = self
            .order_call_context(order)
            .expect("caller checked context");
        let match_price = if self.active(Revision::SqueezePrice) {
            ctx.feed.max_short_squeeze_price()
        } else {
            order.sell_price
        };
        let call = self.calls.get(call_id).expect("call exists").clone();

        let cover_bound = if self.active(Revision::TargetRatioCover) {
            call.max_debt_to_cover(&match_price, &ctx.feed)
        } else {
            call.debt
        }
        .clamp(0, call.debt);
        if cover_bound == 0 {
            return Ok(None);
        }

        let (debt_x, receives) = if cover_bound >= order.for_sale {
            // incoming side exhausted: it absorbs the rounding
            let out = match_price.convert(
                AssetAmount::new(order.for_sale, order.pay_asset()),
                Rounding::Down,
            )?;
            (order.for_sale, out.amount)
        } else {
            // position side exhausted (full cover or target-bounded):
            // the exiting side absorbs the rounding
            let out = match_price.convert(
                AssetAmount::new(cover_bound, order.pay_asset()),
                Rounding::Up,
            )?;
            (cover_bound, out.amount)
        };
        if receives == 0 {
            return Ok(None);
        }

        let Some((call_pays, fee)) = margin_call_payout(&call, receives, &ctx.feed, ctx.fee_ratio)
        else {
            // cannot even pay the counterparty: forced close-out
            self.globally_settle(order.pay_asset())?;
            return Ok(None);
        };

        order.for_sale -= debt_x;
        self.apply_call_cover(
            call.id,
            debt_x,
            call_pays,
            fee,
            match_price,
            ctx.feed.maintenance_collateral_ratio,
        )?;
        let (net, market_fee) = self.trade_credit(order.owner, order.receive_asset(), receives);
        self.emit_event(EventPayload::LimitFill(LimitFillEvent {
            order_id: order.id,
            owner: order.owner,
            pays: debt_x,
            pay_asset: order.pay_asset(),
            receives: net,
            receive_asset: order.receive_asset(),
            market_fee,
            is_maker: false,
        }));
        Ok(Some((debt_x, net)))
    }

    /// Fill the incoming order against the best resting opposite limit at
    /// the resting order's price.
    fn fill_order_against_limit(
        &mut self,
        order: &mut LimitOrder,
        maker_id: OrderId,
    ) -> Result<Option<(i64, i64)>, EngineError> {
        let maker = self.book.get(maker_id).expect("maker exists").clone();
        let pay_asset = order.pay_asset();
        let receive_asset = order.receive_asset();

        // how much of the incoming asset takes the maker out completely
        let maker_wants = maker.sell_price.convert(
            AssetAmount::new(maker.for_sale, receive_asset),
            Rounding::Up,
        )?;

        let (taker_pays, taker_receives) = if maker_wants.amount <= order.for_sale {
            (maker_wants.amount, maker.for_sale)
        } else {
            let out = maker.sell_price.convert(
                AssetAmount::new(order.for_sale, pay_asset),
                Rounding::Down,
            )?;
            if out.amount == 0 {
                return Ok(None);
            }
            (order.for_sale, out.amount)
        };

        order.for_sale -= taker_pays;
        let maker_left = self
            .book
            .fill(maker_id, taker_receives)
            .expect("maker still on book");

        let (taker_net, taker_fee) = self.trade_credit(order.owner, receive_asset, taker_receives);
        let (maker_net, maker_fee) = self.trade_credit(maker.owner, pay_asset, taker_pays);

        self.emit_event(EventPayload::LimitFill(LimitFillEvent {
            order_id: order.id,
            owner: order.owner,
            pays: taker_pays,
            pay_asset,
            receives: taker_net,
            receive_asset,
            market_fee: taker_fee,
            is_maker: false,
        }));
        self.emit_event(EventPayload::LimitFill(LimitFillEvent {
            order_id: maker_id,
            owner: maker.owner,
            pays: taker_receives,
            pay_asset: receive_asset,
            receives: maker_net,
            receive_asset: pay_asset,
            market_fee: maker_fee,
            is_maker: true,
        }));

        if maker_left == 0 {
            self.book.remove(maker_id);
        } else {
            self.cull_if_dust(maker_id)?;
        }
        Ok(Some((taker_pays, taker_net)))
    }

    /// Cancel and refund a resting order whose remainder can no longer
    /// produce a non-zero fill at its own price.
    pub(super) fn cull_if_dust(&mut self, order_id: OrderId) -> Result<(), EngineError> {
        let Some(order) = self.book.get(order_id) else {
            return Ok(());
        };
        let wants = order.sell_price.convert(
            AssetAmount::new(order.for_sale, order.pay_asset()),
            Rounding::Down,
        );
        let dust = wants.map(|out| out.amount == 0).unwrap_or(true);
        if dust {
            let order = self.book.remove(order_id).expect("order existed");
            self.credit(order.owner, order.pay_asset(), order.for_sale);
            self.emit_event(EventPayload::OrderCanceled(OrderCanceledEvent {
                order_id,
                owner: order.owner,
                refunded: order.for_sale,
                reason: CancelReason::Unfillable,
            }));
        }
        Ok(())
    }

    /// Credit trade proceeds net of the receiving asset's market fee.
    pub(super) fn trade_credit(
        &mut self,
        account: AccountId,
        asset: AssetId,
        amount: i64,
    ) -> (i64, i64) {
        let fee = self
            .assets
            .get(&asset)
            .map(|a| a.market_fee.apply(amount))
            .unwrap_or(0);
        if fee > 0 {
            if let Some(a) = self.assets.get_mut(&asset) {
                a.accumulated_fees += fee;
            }
        }
        let net = amount - fee;
        self.credit(account, asset, net);
        (net, fee)
    }
}

/// Split a margin-call payout into what the counterparty receives and the
/// collateral fee. Returns None when the position cannot cover even the
/// counterparty's side.
pub(super) fn margin_call_payout(
    call: &CallOrder,
    counterparty_receives: i64,
    feed: &PriceFeed,
    fee_ratio: Ratio,
) -> Option<(i64, i64)> {
    if counterparty_receives > call.collateral {
        return None;
    }
    if fee_ratio.is_zero() {
        return Some((counterparty_receives, 0));
    }
    let mssr = feed.max_short_squeeze_ratio.value() as i128;
    let net_ratio = (mssr - fee_ratio.value() as i128).max(1);
    let gross = (counterparty_receives as i128 * mssr / net_ratio) as i64;
    let call_pays = gross.min(call.collateral);
    Some((call_pays, call_pays - counterparty_receives))
}
