//! Rule revisions.
//!
//! The engine's behavior changed at a series of named chain-time
//! thresholds and every historical variant must stay replayable. The
//! schedule below is the only mechanism that selects between variants;
//! no behavior flag exists anywhere else.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Engine rule revisions, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Revision {
    /// Margin calls fill at the short-squeeze price instead of the
    /// incoming order's own price (the historical underpay).
    SqueezePrice,
    /// Forced covers take positions in ascending live collateralization
    /// instead of the stale stored call price.
    CollateralOrder,
    /// A matching pass runs to fixpoint instead of stopping after the
    /// first fill.
    MultiMatch,
    /// A cheap resting ask no longer blocks call matching outright.
    UnblockedMatching,
    /// Producer feeds expire passively at block boundaries.
    FeedExpiry,
    /// Resting limits priced strictly better than the squeeze price fill
    /// before margin calls do.
    LimitPriority,
    /// Insolvency is checked on every feed move, not only inside
    /// matching.
    FeedTriggeredSettlement,
    /// Forced covers honor a position's target collateral ratio.
    TargetRatioCover,
    /// Margin-call detection uses live collateralization against the
    /// current MCR instead of the stored call price.
    LiveMaintenanceRatio,
    /// Margin calls pay a collateral fee on top of what the counterparty
    /// receives.
    CollateralFee,
    /// Force-settles match margin calls immediately; the settlement check
    /// ignores resting limits and the fund split is fee-aware.
    InstantSettlement,
}

impl Revision {
    pub const ALL: [Revision; 11] = [
        Revision::SqueezePrice,
        Revision::CollateralOrder,
        Revision::MultiMatch,
        Revision::UnblockedMatching,
        Revision::FeedExpiry,
        Revision::LimitPriority,
        Revision::FeedTriggeredSettlement,
        Revision::TargetRatioCover,
        Revision::LiveMaintenanceRatio,
        Revision::CollateralFee,
        Revision::InstantSettlement,
    ];
}

/// Activation times for each revision. Revisions not present never
/// activate, which is how replay schedules freeze history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevisionSchedule {
    activations: BTreeMap<Revision, Timestamp>,
}

impl RevisionSchedule {
    /// Everything active from the beginning of time: current behavior.
    pub fn all_active() -> Self {
        let mut s = Self::default();
        for rev in Revision::ALL {
            s.activations.insert(rev, Timestamp::from_secs(0));
        }
        s
    }

    /// Nothing active: the oldest replayable behavior.
    pub fn none_active() -> Self {
        Self::default()
    }

    /// Everything up to and including `last` active from time zero.
    pub fn active_through(last: Revision) -> Self {
        let mut s = Self::default();
        for rev in Revision::ALL {
            if rev <= last {
                s.activations.insert(rev, Timestamp::from_secs(0));
            }
        }
        s
    }

    pub fn activate(mut self, rev: Revision, at: Timestamp) -> Self {
        self.activations.insert(rev, at);
        self
    }

    pub fn is_active(&self, rev: Revision, now: Timestamp) -> bool {
        self.activations.get(&rev).is_some_and(|at| *at <= now)
    }
}
