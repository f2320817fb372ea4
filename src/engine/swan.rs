//! Global settlement: detection and execution.
//!
//! When the least-collateralized position can no longer cover its debt at
//! the best price the protocol could obtain for it, the whole asset is
//! closed out: every position's collateral moves into a settlement fund
//! (minus per-era fees), the positions are deleted, and the asset latches
//! a frozen redemption price. Detection and the fund arithmetic both
//! changed across revisions and every variant is preserved here.

use super::core::Engine;
use super::results::EngineError;
use crate::asset::GlobalSettlement;
use crate::events::{CloseReason, EventPayload, GlobalSettlementEvent, PositionClosedEvent};
use crate::price::{Price, Rounding};
use crate::revision::Revision;
use crate::types::{AssetAmount, AssetId};

impl Engine {
    /// Should the asset settle right now?
    ///
    /// Until the feed-triggered revision there is no automatic check at
    /// all (the historical missed detection). After it, the least
    /// collateralization is measured against the squeeze price, improved
    /// by the best resting seller (fee-adjusted once the collateral fee
    /// exists). Once instant settlement is active the book no longer
    /// helps: the test is strictly against the fee-inclusive squeeze
    /// price, because a resting seller cannot always cover the fee.
    pub(super) fn settlement_trigger(&self, asset: AssetId) -> Result<bool, EngineError> {
        if !self.active(Revision::FeedTriggeredSettlement) {
            return Ok(false);
        }
        let Some(ctx) = self.asset_call_context(asset) else {
            return Ok(false);
        };
        let Some(least) = self.calls.least_collateralized(asset) else {
            return Ok(false);
        };
        let ratio = least.collateralization();

        if self.active(Revision::InstantSettlement) {
            let threshold = ctx.feed.margin_call_pays_price(ctx.fee_ratio);
            return Ok(ratio.lt_value(&threshold));
        }

        let mut effective = ctx.feed.max_short_squeeze_price();
        if let Some(best) = self.book.best(asset, ctx.backing) {
            let mut ask = best.sell_price;
            if !ctx.fee_ratio.is_zero() {
                let mssr = ctx.feed.max_short_squeeze_ratio.value() as i128;
                let net = (mssr - ctx.fee_ratio.value() as i128).max(1);
                ask = ask.scaled(mssr, net);
            }
            if ask.lt_value(&effective) {
                effective = ask;
            }
        }
        Ok(ratio.le_value(&effective))
    }

    /// Close out every position of the asset into the settlement fund.
    pub(super) fn globally_settle(&mut self, asset: AssetId) -> Result<(), EngineError> {
        let (backing, feed) = {
            let stable = self.stable_data(asset)?;
            if stable.has_settlement() {
                return Ok(());
            }
            let Some(feed) = stable.current_feed else {
                return Ok(());
            };
            (stable.options.backing_asset, feed)
        };
        let Some(least) = self.calls.least_collateralized(asset) else {
            return Ok(());
        };
        let least_ratio = least.collateralization();
        let feed_price = feed.settlement_price;

        let squeeze_era = self.active(Revision::SqueezePrice);
        let fee_era = self.active(Revision::CollateralFee);
        let instant = self.active(Revision::InstantSettlement);

        // the close-out price moved between eras: the raw feed, then the
        // lesser of feed and least collateralization, then (during the
        // fee era only) the feed again with a per-position cap
        let gs_price = if !squeeze_era || (fee_era && !instant) {
            feed_price
        } else if least_ratio.lt_value(&feed_price) {
            least_ratio
        } else {
            feed_price
        };

        let mssr = feed.max_short_squeeze_ratio.value() as i128;
        let mut fund = 0i64;
        let mut fees = 0i64;
        let mut total_debt = 0i64;
        let mut closed = 0usize;

        for id in self.calls.ids_in_call_order(asset, false) {
            let call = self.calls.remove(id).expect("indexed call exists");
            let owed = gs_price
                .convert(AssetAmount::new(call.debt, asset), Rounding::Up)?
                .amount;
            let obligation = owed.min(call.collateral);

            let (pays, fund_credit, fee) = if instant {
                let fund_credit = ((obligation as i128 * 1000 + mssr - 1) / mssr) as i64;
                if self.is_margin_called(&call, &feed) {
                    // called positions pay the squeeze premium; the part
                    // the fund does not keep is the margin-call fee
                    (obligation, fund_credit, obligation - fund_credit)
                } else {
                    (fund_credit, fund_credit, 0)
                }
            } else {
                (obligation, obligation, 0)
            };

            let refund = call.collateral - pays;
            if refund > 0 {
                self.credit(call.owner, backing, refund);
            }
            fund += fund_credit;
            fees += fee;
            total_debt += call.debt;
            closed += 1;
            self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                call_id: id,
                owner: call.owner,
                collateral_returned: refund,
                reason: CloseReason::GlobalSettlement,
            }));
        }

        // the frozen price reflects what the fund actually holds, which
        // can differ from the close-out price through rounding
        let settlement_price = Price::from_ratio(
            (total_debt as i128).max(1),
            asset,
            (fund as i128).max(1),
            backing,
        );
        {
            let stable = self.stable_mut(asset)?;
            stable.settlement = Some(GlobalSettlement {
                price: settlement_price,
                fund,
            });
            stable.collateral_fees += fees;
        }
        self.emit_event(EventPayload::GlobalSettlement(GlobalSettlementEvent {
            asset,
            settlement_price,
            fund,
            positions_closed: closed,
        }));
        Ok(())
    }
}
