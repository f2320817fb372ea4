//! Forced settlement of stable-asset debt.
//!
//! A holder may redeem stable units against the debt positions backing
//! them. Requests queue for the asset's settle delay and execute at the
//! feed price against the least-collateralized position. Once instant
//! settlement is active, margin-called positions are taken immediately at
//! the squeeze price and only the remainder queues. After a global
//! settlement, redemptions pay straight from the fund at the frozen
//! price.

use super::core::Engine;
use super::orders::margin_call_payout;
use super::results::{EngineError, SettleOutcome};
use crate::events::{
    EventPayload, SettlementCanceledEvent, SettlementExecutedEvent, SettlementRequestedEvent,
};
use crate::price::Rounding;
use crate::revision::Revision;
use crate::types::{AccountId, AssetAmount, AssetId, SettlementId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A queued redemption. The stable amount is escrowed at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub id: SettlementId,
    pub owner: AccountId,
    pub asset: AssetId,
    pub amount: i64,
    pub due: Timestamp,
}

impl Engine {
    pub fn force_settle(
        &mut self,
        owner: AccountId,
        asset: AssetId,
        amount: i64,
    ) -> Result<SettleOutcome, EngineError> {
        if amount <= 0 {
            return Err(EngineError::ZeroAmount);
        }
        let (backing, delay, settled, has_feed) = {
            let stable = self.stable_data(asset)?;
            (
                stable.options.backing_asset,
                stable.options.settle_delay_secs,
                stable.has_settlement(),
                stable.current_feed.is_some(),
            )
        };

        if settled {
            let received = self.pay_from_fund(owner, asset, backing, amount)?;
            self.emit_event(EventPayload::SettlementExecuted(SettlementExecutedEvent {
                settlement_id: None,
                owner,
                asset,
                paid: amount,
                received,
            }));
            return Ok(SettleOutcome {
                settlement_id: None,
                paid: amount,
                received,
            });
        }

        if !has_feed {
            return Err(EngineError::NoValidFeed(asset));
        }
        self.debit(owner, asset, amount)?;

        let mut remaining = amount;
        let mut received = 0i64;

        if self.active(Revision::InstantSettlement) {
            received = self.settle_against_margin_calls(owner, asset, &mut remaining)?;
            if received > 0 {
                self.emit_event(EventPayload::SettlementExecuted(SettlementExecutedEvent {
                    settlement_id: None,
                    owner,
                    asset,
                    paid: amount - remaining,
                    received,
                }));
                self.process_market(asset)?;
            }
        }

        let settlement_id = if remaining > 0 {
            let id = self.mint_settlement_id();
            let due = self.current_time.plus(delay);
            self.settlements.insert(
                id,
                SettlementRequest {
                    id,
                    owner,
                    asset,
                    amount: remaining,
                    due,
                },
            );
            self.emit_event(EventPayload::SettlementRequested(SettlementRequestedEvent {
                settlement_id: id,
                owner,
                asset,
                amount: remaining,
                due,
            }));
            Some(id)
        } else {
            None
        };

        Ok(SettleOutcome {
            settlement_id,
            paid: amount,
            received,
        })
    }

    /// Immediate redemption against margin-called positions at the
    /// squeeze price. Consumes `remaining` as it fills.
    fn settle_against_margin_calls(
        &mut self,
        owner: AccountId,
        asset: AssetId,
        remaining: &mut i64,
    ) -> Result<i64, EngineError> {
        let mut received = 0i64;
        while *remaining > 0 {
            let Some(ctx) = self.asset_call_context(asset) else {
                break;
            };
            let Some(call) = self.first_margin_called(asset, &ctx.feed) else {
                break;
            };
            let squeeze = ctx.feed.max_short_squeeze_price();
            let pay = (*remaining).min(call.debt);
            let out = squeeze.convert(AssetAmount::new(pay, asset), Rounding::Down)?;
            if out.amount == 0 {
                break;
            }
            let Some((call_pays, fee)) =
                margin_call_payout(&call, out.amount, &ctx.feed, ctx.fee_ratio)
            else {
                self.globally_settle(asset)?;
                break;
            };
            self.apply_call_cover(
                call.id,
                pay,
                call_pays,
                fee,
                squeeze,
                ctx.feed.maintenance_collateral_ratio,
            )?;
            self.credit(owner, ctx.backing, out.amount);
            *remaining -= pay;
            received += out.amount;
        }
        Ok(received)
    }

    /// Redeem against the frozen settlement fund. The stable amount is
    /// destroyed; the payout is capped by what is left in the fund.
    fn pay_from_fund(
        &mut self,
        owner: AccountId,
        asset: AssetId,
        backing: AssetId,
        amount: i64,
    ) -> Result<i64, EngineError> {
        let (price, fund) = {
            let gs = self
                .stable_data(asset)?
                .settlement
                .expect("caller checked settlement");
            (gs.price, gs.fund)
        };
        let received = price
            .convert(AssetAmount::new(amount, asset), Rounding::Down)?
            .amount
            .min(fund);
        if received == 0 {
            return Err(EngineError::ZeroFill);
        }
        self.debit(owner, asset, amount)?;
        self.stable_mut(asset)?
            .settlement
            .as_mut()
            .expect("settlement persists")
            .fund -= received;
        self.credit(owner, backing, received);
        Ok(received)
    }

    /// Execute every due settlement request at the feed price against the
    /// least-collateralized positions. Requests against a dead market
    /// (no feed, no positions) cancel with a refund.
    pub(super) fn execute_due_settlements(
        &mut self,
        now: Timestamp,
        touched: &mut BTreeSet<AssetId>,
    ) -> Result<(), EngineError> {
        let due: Vec<SettlementId> = self
            .settlements
            .values()
            .filter(|r| r.due <= now)
            .map(|r| r.id)
            .collect();

        for id in due {
            let request = self.settlements.remove(&id).expect("request existed");
            let asset = request.asset;

            if self.has_settlement(asset) {
                let backing = self.stable_data(asset)?.options.backing_asset;
                // release the escrow taken at request time, then redeem
                // through the normal fund path
                self.credit(request.owner, asset, request.amount);
                match self.pay_from_fund(request.owner, asset, backing, request.amount) {
                    Ok(received) => {
                        self.emit_event(EventPayload::SettlementExecuted(
                            SettlementExecutedEvent {
                                settlement_id: Some(id),
                                owner: request.owner,
                                asset,
                                paid: request.amount,
                                received,
                            },
                        ));
                    }
                    Err(_) => {
                        self.emit_event(EventPayload::SettlementCanceled(
                            SettlementCanceledEvent {
                                settlement_id: id,
                                owner: request.owner,
                                asset,
                                refunded: request.amount,
                            },
                        ));
                    }
                }
                continue;
            }

            let Some(ctx) = self.asset_call_context(asset) else {
                self.cancel_settlement(&request);
                continue;
            };
            let price = ctx.feed.settlement_price;
            let mut remaining = request.amount;
            let mut received = 0i64;

            // settlements always redeem against the position with the
            // least live collateralization, in every era
            while remaining > 0 {
                let Some(call_id) = self.calls.least_collateralized(asset).map(|c| c.id) else {
                    break;
                };
                let call = self.calls.get(call_id).expect("indexed call").clone();
                let pay = remaining.min(call.debt);
                let out = price.convert(AssetAmount::new(pay, asset), Rounding::Down)?;
                if out.amount == 0 || out.amount > call.collateral {
                    break;
                }
                self.apply_call_cover(
                    call_id,
                    pay,
                    out.amount,
                    0,
                    price,
                    ctx.feed.maintenance_collateral_ratio,
                )?;
                self.credit(request.owner, ctx.backing, out.amount);
                remaining -= pay;
                received += out.amount;
                touched.insert(asset);
            }

            if remaining > 0 {
                // nothing left to settle against, refund the rest
                self.credit(request.owner, asset, remaining);
            }
            self.emit_event(EventPayload::SettlementExecuted(SettlementExecutedEvent {
                settlement_id: Some(id),
                owner: request.owner,
                asset,
                paid: request.amount - remaining,
                received,
            }));
        }
        Ok(())
    }

    fn cancel_settlement(&mut self, request: &SettlementRequest) {
        self.credit(request.owner, request.asset, request.amount);
        self.emit_event(EventPayload::SettlementCanceled(SettlementCanceledEvent {
            settlement_id: request.id,
            owner: request.owner,
            asset: request.asset,
            refunded: request.amount,
        }));
    }

    pub fn settlement_request(&self, id: SettlementId) -> Option<&SettlementRequest> {
        self.settlements.get(&id)
    }

    pub fn pending_settlements(&self) -> impl Iterator<Item = &SettlementRequest> {
        self.settlements.values()
    }
}
