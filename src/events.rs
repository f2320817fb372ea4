// Every state change produces an event: fills, cancels, feed updates,
// settlements, close-outs. External observers consume this log; replay
// tests compare it byte for byte.

use crate::price::Price;
use crate::types::{AccountId, AssetId, CallId, OrderId, SettlementId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Book events
    OrderPlaced(OrderPlacedEvent),
    OrderCanceled(OrderCanceledEvent),
    LimitFill(LimitFillEvent),

    // Debt position events
    CallFill(CallFillEvent),
    PositionUpdated(PositionUpdatedEvent),
    PositionClosed(PositionClosedEvent),

    // Feed events
    FeedPublished(FeedPublishedEvent),

    // Settlement events
    SettlementRequested(SettlementRequestedEvent),
    SettlementExecuted(SettlementExecutedEvent),
    SettlementCanceled(SettlementCanceledEvent),
    GlobalSettlement(GlobalSettlementEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub order_id: OrderId,
    pub owner: AccountId,
    pub for_sale: i64,
    pub sell_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCanceledEvent {
    pub order_id: OrderId,
    pub owner: AccountId,
    pub refunded: i64,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserRequested,
    Expired,
    /// Remainder too small to ever produce a non-zero fill.
    Unfillable,
}

/// One side of a limit-vs-limit or limit-vs-call execution, seen from the
/// limit order's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitFillEvent {
    pub order_id: OrderId,
    pub owner: AccountId,
    pub pays: i64,
    pub pay_asset: AssetId,
    pub receives: i64,
    pub receive_asset: AssetId,
    pub market_fee: i64,
    pub is_maker: bool,
}

/// A margin-called position forcibly covered against a limit order or a
/// settlement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFillEvent {
    pub call_id: CallId,
    pub owner: AccountId,
    pub debt_covered: i64,
    pub collateral_paid: i64,
    /// Portion of `collateral_paid` skimmed into the collateral-fee pool.
    pub margin_call_fee: i64,
    pub fill_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdatedEvent {
    pub call_id: CallId,
    pub owner: AccountId,
    pub debt: i64,
    pub collateral: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub call_id: CallId,
    pub owner: AccountId,
    pub collateral_returned: i64,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Covered,
    Filled,
    GlobalSettlement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPublishedEvent {
    pub asset: AssetId,
    pub producer: AccountId,
    /// Whether the asset has an effective median feed after this publish.
    pub feed_is_valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequestedEvent {
    pub settlement_id: SettlementId,
    pub owner: AccountId,
    pub asset: AssetId,
    pub amount: i64,
    pub due: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementExecutedEvent {
    pub settlement_id: Option<SettlementId>,
    pub owner: AccountId,
    pub asset: AssetId,
    pub paid: i64,
    pub received: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementCanceledEvent {
    pub settlement_id: SettlementId,
    pub owner: AccountId,
    pub asset: AssetId,
    pub refunded: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettlementEvent {
    pub asset: AssetId,
    pub settlement_price: Price,
    pub fund: i64,
    pub positions_closed: usize,
}
