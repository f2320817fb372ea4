// Outcome structs and the engine error enum. Every operation either
// returns one of these or leaves no trace.

use crate::price::PriceError;
use crate::types::{AccountId, AssetId, CallId, OrderId, SettlementId};

/// Outcome of placing a limit order: what matched immediately and whether
/// a remainder went on the book.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order_id: OrderId,
    pub paid: i64,
    pub received: i64,
    pub remaining: i64,
    pub is_posted: bool,
}

/// Outcome of a force-settle request. `settlement_id` is present when a
/// remainder was queued for delayed execution.
#[derive(Debug, Clone)]
pub struct SettleOutcome {
    pub settlement_id: Option<SettlementId>,
    pub paid: i64,
    pub received: i64,
}

/// Outcome of a debt position adjustment.
#[derive(Debug, Clone)]
pub struct PositionOutcome {
    pub call_id: Option<CallId>,
    pub debt: i64,
    pub collateral: i64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("asset {0:?} not found")]
    AssetNotFound(AssetId),

    #[error("account {0:?} not found")]
    AccountNotFound(AccountId),

    #[error("order {0:?} not found")]
    OrderNotFound(OrderId),

    #[error("settlement {0:?} not found")]
    SettlementNotFound(SettlementId),

    #[error("caller does not own the target object")]
    NotOwner,

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("expiration is not in the future")]
    ExpirationInPast,

    #[error("malformed order or price")]
    BadPrice,

    #[error("asset {0:?} is not a collateralized stable asset")]
    NotStableAsset(AssetId),

    #[error("account is not an authorized feed producer")]
    NotFeedProducer,

    #[error("feed is malformed for this asset")]
    BadFeed,

    #[error("asset {0:?} has no valid price feed")]
    NoValidFeed(AssetId),

    #[error("asset {0:?} is globally settled")]
    GloballySettled(AssetId),

    #[error("insufficient balance: need {needed} of asset {asset:?}, have {available}")]
    InsufficientBalance {
        asset: AssetId,
        needed: i64,
        available: i64,
    },

    #[error("no debt position for this owner and asset")]
    NoSuchPosition,

    #[error("position would fall below the maintenance ratio")]
    BelowMaintenance,

    #[error("margin-called position may only be covered or recollateralized")]
    MarginCalledPosition,

    #[error("conversion would produce a zero receive amount")]
    ZeroFill,

    #[error("price arithmetic error: {0}")]
    Price(#[from] PriceError),
}
