//! Collateralized-Stablecoin DEX Core Engine.
//!
//! Deterministic matching core for a market-pegged stable asset: a limit
//! order book, a table of collateralized debt positions, a median price
//! feed, forced settlement, and a global close-out when collateral can no
//! longer cover debt. Margin and settlement logic take priority over
//! liquidity concerns. All computation is exact integer arithmetic and
//! pure with no external I/O dependencies; historical rule changes stay
//! replayable behind the revision schedule.

pub mod asset;
pub mod book;
pub mod call;
pub mod engine;
pub mod events;
pub mod feed;
pub mod price;
pub mod revision;
pub mod types;

pub use asset::{Asset, GlobalSettlement, StableAssetData, StableAssetOptions};
pub use book::{LimitOrder, OrderBook};
pub use call::{CallOrder, CallTable};
pub use engine::{
    Engine, EngineConfig, EngineError, OrderOutcome, PositionOutcome, SettleOutcome,
    SettlementRequest,
};
pub use events::*;
pub use feed::{PriceFeed, ProducerFeed};
pub use price::{orders_cross, Price, PriceError, Rounding};
pub use revision::{Revision, RevisionSchedule};
pub use types::*;
