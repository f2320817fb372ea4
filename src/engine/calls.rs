//! Debt-position operations and feed-driven margin-call matching.

use super::core::Engine;
use super::orders::margin_call_payout;
use super::results::{EngineError, PositionOutcome};
use crate::call::CallOrder;
use crate::events::{
    CloseReason, EventPayload, LimitFillEvent, PositionClosedEvent, PositionUpdatedEvent,
};
use crate::feed::PriceFeed;
use crate::price::{Price, PriceError, Rounding};
use crate::revision::Revision;
use crate::types::{AccountId, AssetAmount, AssetId, CallId, Ratio};

/// Margin-call context of a stable asset with a live feed.
pub(super) struct AssetCallContext {
    pub feed: PriceFeed,
    pub fee_ratio: Ratio,
    pub backing: AssetId,
}

impl Engine {
    /// Open, grow, cover or close a debt position. Positive `debt_delta`
    /// borrows (crediting the stable asset), negative covers; positive
    /// `collateral_delta` locks backing collateral, negative withdraws
    /// it. `target_ratio` is stored as given, so callers keep a target by
    /// repeating it. A margin-called position accepts only updates that
    /// leave it healthy or closed.
    pub fn adjust_debt_position(
        &mut self,
        owner: AccountId,
        asset: AssetId,
        debt_delta: i64,
        collateral_delta: i64,
        target_ratio: Option<Ratio>,
    ) -> Result<PositionOutcome, EngineError> {
        let (backing, settled) = {
            let stable = self.stable_data(asset)?;
            (stable.options.backing_asset, stable.has_settlement())
        };
        if settled {
            return Err(EngineError::GloballySettled(asset));
        }

        let existing = self.calls.owner_call(owner, asset).cloned();
        if existing.is_none() && debt_delta <= 0 {
            return Err(EngineError::NoSuchPosition);
        }
        let (old_debt, old_coll) = existing
            .as_ref()
            .map(|c| (c.debt, c.collateral))
            .unwrap_or((0, 0));

        let new_debt = old_debt
            .checked_add(debt_delta)
            .ok_or(EngineError::Price(PriceError::Overflow))?;
        let new_coll = old_coll
            .checked_add(collateral_delta)
            .ok_or(EngineError::Price(PriceError::Overflow))?;
        if new_debt < 0 || new_coll < 0 {
            return Err(EngineError::ZeroAmount);
        }
        let closing = new_debt == 0;
        if closing && new_coll != 0 {
            // a closed position keeps nothing in escrow
            return Err(EngineError::ZeroAmount);
        }
        if !closing && new_coll == 0 {
            return Err(EngineError::ZeroAmount);
        }

        // affordability, before any mutation
        if debt_delta < 0 && self.balance_of(owner, asset) < -debt_delta {
            return Err(EngineError::InsufficientBalance {
                asset,
                needed: -debt_delta,
                available: self.balance_of(owner, asset),
            });
        }
        if collateral_delta > 0 && self.balance_of(owner, backing) < collateral_delta {
            return Err(EngineError::InsufficientBalance {
                asset: backing,
                needed: collateral_delta,
                available: self.balance_of(owner, backing),
            });
        }

        let feed = self.current_feed(asset);
        if !closing {
            if (debt_delta > 0 || collateral_delta < 0) && feed.is_none() {
                // growing debt or freeing collateral needs a live feed
                return Err(EngineError::NoValidFeed(asset));
            }
            if let Some(feed) = feed.as_ref() {
                let maintenance = feed.maintenance_collateralization();
                let new_ratio =
                    Price::from_ratio(new_debt as i128, asset, new_coll as i128, backing);
                let new_called = new_ratio.lt_value(&maintenance);
                let old_called = existing
                    .as_ref()
                    .map(|c| self.is_margin_called(c, feed))
                    .unwrap_or(false);
                if old_called && new_called {
                    return Err(EngineError::MarginCalledPosition);
                }
                if !old_called && new_called {
                    return Err(EngineError::BelowMaintenance);
                }
            }
        }

        if debt_delta < 0 {
            self.debit(owner, asset, -debt_delta)?;
        }
        if collateral_delta > 0 {
            self.debit(owner, backing, collateral_delta)?;
        }
        if debt_delta > 0 {
            self.credit(owner, asset, debt_delta);
        }
        if collateral_delta < 0 {
            self.credit(owner, backing, -collateral_delta);
        }

        let mcr = feed
            .map(|f| f.maintenance_collateral_ratio)
            .unwrap_or(Ratio(1750));
        let outcome = if closing {
            let call = existing.expect("closing requires a position");
            self.calls.remove(call.id);
            self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                call_id: call.id,
                owner,
                collateral_returned: old_coll,
                reason: CloseReason::Covered,
            }));
            PositionOutcome {
                call_id: None,
                debt: 0,
                collateral: 0,
            }
        } else if let Some(call) = existing {
            self.calls.update(call.id, |c| {
                c.debt = new_debt;
                c.collateral = new_coll;
                c.target_ratio = target_ratio;
                c.refresh_call_price(mcr);
            });
            self.emit_event(EventPayload::PositionUpdated(PositionUpdatedEvent {
                call_id: call.id,
                owner,
                debt: new_debt,
                collateral: new_coll,
            }));
            PositionOutcome {
                call_id: Some(call.id),
                debt: new_debt,
                collateral: new_coll,
            }
        } else {
            let id = self.mint_call_id();
            let mut call = CallOrder {
                id,
                owner,
                debt_asset: asset,
                collateral_asset: backing,
                debt: new_debt,
                collateral: new_coll,
                target_ratio,
                call_price: Price::from_ratio(new_debt as i128, asset, new_coll as i128, backing),
            };
            call.refresh_call_price(mcr);
            self.calls.insert(call);
            self.emit_event(EventPayload::PositionUpdated(PositionUpdatedEvent {
                call_id: id,
                owner,
                debt: new_debt,
                collateral: new_coll,
            }));
            PositionOutcome {
                call_id: Some(id),
                debt: new_debt,
                collateral: new_coll,
            }
        };

        self.process_market(asset)?;
        Ok(outcome)
    }

    /// Margin-call detection. Live collateralization against the current
    /// maintenance ratio, or the stale stored call price against the
    /// feed for pre-revision replay.
    pub(super) fn is_margin_called(&self, call: &CallOrder, feed: &PriceFeed) -> bool {
        if self.active(Revision::LiveMaintenanceRatio) {
            call.collateralization()
                .lt_value(&feed.maintenance_collateralization())
        } else {
            call.call_price.lt_value(&feed.settlement_price)
        }
    }

    pub(super) fn asset_call_context(&self, asset: AssetId) -> Option<AssetCallContext> {
        let record = self.assets.get(&asset)?;
        let stable = record.stable.as_ref()?;
        if stable.has_settlement() {
            return None;
        }
        let feed = stable.current_feed?;
        let fee_ratio = if self.active(Revision::CollateralFee) {
            stable.options.margin_call_fee_ratio
        } else {
            Ratio(0)
        };
        Some(AssetCallContext {
            feed,
            fee_ratio,
            backing: stable.options.backing_asset,
        })
    }

    /// First margin-called position in processing order, if any.
    pub(super) fn first_margin_called(&self, asset: AssetId, feed: &PriceFeed) -> Option<CallOrder> {
        let legacy_order = !self.active(Revision::CollateralOrder);
        for id in self.calls.ids_in_call_order(asset, legacy_order) {
            let call = self.calls.get(id).expect("indexed call exists");
            if self.is_margin_called(call, feed) {
                return Some(call.clone());
            }
        }
        None
    }

    /// One feed-driven fill: the most endangered margin-called position
    /// takes the best resting stable-seller at the seller's price.
    /// Returns true when a fill happened; the reconsideration loop drives
    /// repetition (or not, before the multi-match revision).
    pub(super) fn check_call_orders(&mut self, asset: AssetId) -> Result<bool, EngineError> {
        let Some(ctx) = self.asset_call_context(asset) else {
            return Ok(false);
        };
        let mssp = ctx.feed.max_short_squeeze_price();

        let Some(call) = self.first_margin_called(asset, &ctx.feed) else {
            return Ok(false);
        };
        let Some(maker) = self.book.best(asset, ctx.backing) else {
            return Ok(false);
        };
        if mssp.lt_value(&maker.sell_price) {
            // the cheapest seller demands more than the squeeze price
            return Ok(false);
        }
        if !self.active(Revision::UnblockedMatching)
            && maker.sell_price.lt_value(&call.call_price)
        {
            // historical blocker: a seller below the stored call price
            // stops the whole pass
            return Ok(false);
        }

        let match_price = maker.sell_price;
        let maker_id = maker.id;
        let maker_owner = maker.owner;
        let maker_for_sale = maker.for_sale;

        let cover_bound = if self.active(Revision::TargetRatioCover) {
            call.max_debt_to_cover(&match_price, &ctx.feed)
        } else {
            call.debt
        }
        .clamp(0, call.debt);
        if cover_bound == 0 {
            return Ok(false);
        }

        let debt_x = cover_bound.min(maker_for_sale);
        let receives = match_price.convert(AssetAmount::new(debt_x, asset), Rounding::Up)?;
        if receives.amount == 0 {
            return Ok(false);
        }
        let Some((call_pays, fee)) = margin_call_payout(&call, receives.amount, &ctx.feed, ctx.fee_ratio)
        else {
            self.globally_settle(asset)?;
            return Ok(true);
        };

        let maker_left = self.book.fill(maker_id, debt_x).expect("maker on book");
        self.apply_call_cover(
            call.id,
            debt_x,
            call_pays,
            fee,
            match_price,
            ctx.feed.maintenance_collateral_ratio,
        )?;
        let (net, market_fee) = self.trade_credit(maker_owner, ctx.backing, receives.amount);
        self.emit_event(EventPayload::LimitFill(LimitFillEvent {
            order_id: maker_id,
            owner: maker_owner,
            pays: debt_x,
            pay_asset: asset,
            receives: net,
            receive_asset: ctx.backing,
            market_fee,
            is_maker: true,
        }));
        if maker_left == 0 {
            self.book.remove(maker_id);
        } else {
            self.cull_if_dust(maker_id)?;
        }
        Ok(true)
    }

    /// Mutate a position for a forced cover, accrue the collateral fee,
    /// and close the position when its debt reaches zero.
    pub(super) fn apply_call_cover(
        &mut self,
        call_id: CallId,
        debt_covered: i64,
        call_pays: i64,
        fee: i64,
        fill_price: Price,
        mcr: Ratio,
    ) -> Result<(), EngineError> {
        let call = self
            .calls
            .get(call_id)
            .expect("call exists during cover")
            .clone();
        debug_assert!(debt_covered <= call.debt);
        debug_assert!(call_pays <= call.collateral);

        if fee > 0 {
            self.stable_mut(call.debt_asset)?.collateral_fees += fee;
        }
        self.emit_event(EventPayload::CallFill(crate::events::CallFillEvent {
            call_id,
            owner: call.owner,
            debt_covered,
            collateral_paid: call_pays,
            margin_call_fee: fee,
            fill_price,
        }));

        if debt_covered == call.debt {
            self.calls.remove(call_id);
            let leftover = call.collateral - call_pays;
            if leftover > 0 {
                self.credit(call.owner, call.collateral_asset, leftover);
            }
            self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                call_id,
                owner: call.owner,
                collateral_returned: leftover,
                reason: CloseReason::Filled,
            }));
        } else {
            // forced covers only refresh the stored call price once the
            // collateral-order revision is active; before it the key goes
            // stale on fills, which is what the legacy index replays
            let refresh = self.active(Revision::CollateralOrder);
            self.calls.update(call_id, |c| {
                c.debt -= debt_covered;
                c.collateral -= call_pays;
                if refresh {
                    c.refresh_call_price(mcr);
                }
            });
        }
        Ok(())
    }

    /// The reconsideration loop: while the asset is live, either a
    /// settlement trigger fires, or one margin-call fill happens, or
    /// there is nothing left to do. Each iteration strictly reduces open
    /// debt or the book, so it terminates.
    pub(super) fn process_market(&mut self, asset: AssetId) -> Result<(), EngineError> {
        if self.stable_data(asset).is_err() {
            return Ok(());
        }
        let multi = self.active(Revision::MultiMatch);
        loop {
            if self.has_settlement(asset) {
                break;
            }
            if self.settlement_trigger(asset)? {
                self.globally_settle(asset)?;
                break;
            }
            if !self.check_call_orders(asset)? {
                break;
            }
            if !multi {
                break;
            }
        }
        Ok(())
    }
}
