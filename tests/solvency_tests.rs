//! Global settlement: trigger conditions, fund arithmetic, fee splits,
//! and redemption at the frozen price.

use pegged_core::*;

const INIT_CORE: i64 = 1_000_000;

struct Market {
    engine: Engine,
    core: AssetId,
    usd: AssetId,
    feeder: AccountId,
}

fn market(rules: RevisionSchedule, margin_call_fee: u16) -> Market {
    let mut engine = Engine::with_rules(EngineConfig::default(), rules);
    let core = engine.create_asset("CORE");
    let mut options = StableAssetOptions::new(core);
    options.feed_lifetime_secs = 1_000_000;
    options.margin_call_fee_ratio = Ratio(margin_call_fee);
    let usd = engine
        .create_stable_asset("STABLE", FeeRate(100), options)
        .unwrap();
    let feeder = engine.create_account();
    engine.set_feed_producers(usd, &[feeder]).unwrap();
    Market {
        engine,
        core,
        usd,
        feeder,
    }
}

impl Market {
    fn publish(&mut self, debt: i64, collateral: i64) {
        let feed = PriceFeed {
            settlement_price: Price::new(
                AssetAmount::new(debt, self.usd),
                AssetAmount::new(collateral, self.core),
            )
            .unwrap(),
            maintenance_collateral_ratio: Ratio(1750),
            max_short_squeeze_ratio: Ratio(1100),
        };
        self.engine.publish_feed(self.feeder, self.usd, feed).unwrap();
    }

    fn funded_account(&mut self) -> AccountId {
        let id = self.engine.create_account();
        self.engine.deposit(id, self.core, INIT_CORE).unwrap();
        id
    }

    fn borrow(&mut self, who: AccountId, debt: i64, collateral: i64) {
        self.engine
            .adjust_debt_position(who, self.usd, debt, collateral, None)
            .unwrap();
    }

    fn sell(&mut self, who: AccountId, usd: i64, core: i64) -> OrderOutcome {
        self.engine
            .place_limit_order(
                who,
                AssetAmount::new(usd, self.usd),
                AssetAmount::new(core, self.core),
                Timestamp::never(),
            )
            .unwrap()
    }
}

/// Before the feed-triggered revision nothing checks for insolvency
/// automatically: a crash leaves underwater positions standing.
#[test]
fn no_automatic_settlement_before_feed_trigger() {
    let mut m = market(
        RevisionSchedule::active_through(Revision::LimitPriority),
        0,
    );
    let b1 = m.funded_account();
    m.publish(1, 5);
    m.borrow(b1, 1000, 15_000);

    m.publish(1, 20);
    assert!(!m.engine.has_settlement(m.usd));
    assert!(m.engine.call_position(b1, m.usd).is_some());
}

/// A matching resting seller keeps the asset alive while the fee is
/// zero: the weakest position fills instead of settling, and positions
/// it cannot reach stay open.
#[test]
fn matching_limit_averts_settlement_without_fee() {
    let mut m = market(
        RevisionSchedule::active_through(Revision::FeedTriggeredSettlement),
        0,
    );
    let b1 = m.funded_account();
    let b2 = m.funded_account();
    let seller = m.engine.create_account();

    m.publish(1, 5);
    m.borrow(b1, 1000, 15_000);
    m.borrow(b2, 1000, 20_000);
    for b in [b1, b2] {
        m.engine.transfer(b, seller, m.usd, 1000).unwrap();
    }
    let sell_mid = m.sell(seller, 1000, 14_900);
    assert!(sell_mid.is_posted);

    m.publish(1, 18);

    assert!(!m.engine.has_settlement(m.usd));
    assert!(m.engine.call_position(b1, m.usd).is_none());
    // the position paid ceil(1000 * 14.9) and returned the rest
    assert_eq!(m.engine.balance_of(seller, m.core), 14_900);
    assert_eq!(m.engine.balance_of(b1, m.core), INIT_CORE - 15_000 + 100);
    // the second position is called but nothing matches it
    assert!(m.engine.call_position(b2, m.usd).is_some());
}

/// With a margin-call fee the same resting seller is no longer enough:
/// the weakest position cannot pay the fee on top, so the asset settles
/// at the feed price with per-position caps and no fee skim.
#[test]
fn fee_makes_matching_limit_insufficient() {
    let mut m = market(
        RevisionSchedule::active_through(Revision::CollateralFee),
        80,
    );
    let b1 = m.funded_account();
    let b2 = m.funded_account();
    let seller = m.engine.create_account();

    m.publish(1, 5);
    m.borrow(b1, 1000, 15_000);
    m.borrow(b2, 1000, 20_000);
    for b in [b1, b2] {
        m.engine.transfer(b, seller, m.usd, 1000).unwrap();
    }
    let sell_mid = m.sell(seller, 1000, 14_900);
    assert!(sell_mid.is_posted);

    m.publish(1, 18);

    assert!(m.engine.has_settlement(m.usd));
    assert_eq!(m.engine.open_call_count(m.usd), 0);
    // close-out at the feed price 18, capped by each position's
    // collateral: 15000 (capped) + 18000
    assert_eq!(m.engine.settlement_fund(m.usd), 15_000 + 18_000);
    assert_eq!(m.engine.collateral_fees(m.usd), 0);
    assert_eq!(m.engine.balance_of(b2, m.core), INIT_CORE - 20_000 + 2000);
    // the resting seller is untouched
    assert_eq!(m.engine.order(sell_mid.order_id).unwrap().for_sale, 1000);
}

/// Instant-settlement era: the close-out price is the lesser of feed and
/// least collateralization, the fund keeps the squeeze-discounted share,
/// called positions pay the premium into the fee pool, healthy ones pay
/// only the fund share.
#[test]
fn instant_era_fund_split_with_fee() {
    let mut m = market(RevisionSchedule::all_active(), 80);
    let b1 = m.funded_account();
    let b2 = m.funded_account();
    let b3 = m.funded_account();
    let seller = m.engine.create_account();

    m.publish(1, 5);
    m.borrow(b1, 1000, 15_000);
    m.borrow(b2, 1000, 20_000);
    m.borrow(b3, 1000, 40_000);
    for b in [b1, b2, b3] {
        m.engine.transfer(b, seller, m.usd, 1000).unwrap();
    }
    let sell_mid = m.sell(seller, 1000, 14_900);
    assert!(sell_mid.is_posted);

    m.publish(1, 18);

    assert!(m.engine.has_settlement(m.usd));
    assert_eq!(m.engine.open_call_count(m.usd), 0);
    // close-out price = least collateralization 15; every obligation is
    // 15000; the fund keeps ceil(15000 / 1.1) of each
    let per_call_fund = 13_637;
    assert_eq!(m.engine.settlement_fund(m.usd), per_call_fund * 3);
    // the two called positions pay the premium as the fee
    assert_eq!(
        m.engine.collateral_fees(m.usd),
        (15_000 - per_call_fund) * 2
    );
    assert_eq!(m.engine.balance_of(b1, m.core), INIT_CORE - 15_000);
    assert_eq!(m.engine.balance_of(b2, m.core), INIT_CORE - 20_000 + 5000);
    assert_eq!(
        m.engine.balance_of(b3, m.core),
        INIT_CORE - 40_000 + (40_000 - per_call_fund)
    );
    assert_eq!(m.engine.order(sell_mid.order_id).unwrap().for_sale, 1000);
}

/// The frozen price reflects the actual fund-to-debt ratio including
/// rounding, and redemptions drain the fund at exactly that price.
#[test]
fn settlement_price_and_fund_redemption() {
    let mut m = market(
        RevisionSchedule::active_through(Revision::FeedTriggeredSettlement),
        0,
    );
    let b1 = m.funded_account();
    let b2 = m.funded_account();
    let seller = m.engine.create_account();

    m.publish(1, 5);
    m.borrow(b1, 1000, 15_000);
    m.borrow(b2, 1000, 15_500);
    for b in [b1, b2] {
        m.engine.transfer(b, seller, m.usd, 1000).unwrap();
    }

    m.publish(1, 10);
    // partially cover the weakest position so the ratios diverge
    m.sell(seller, 700, 5900);
    assert_eq!(m.engine.call_position(b1, m.usd).unwrap().debt, 310);

    // crash: least collateralization 15.5 beats the feed price 20
    m.publish(1, 20);
    assert!(m.engine.has_settlement(m.usd));
    // fund = 15500 (all of the weakest) + ceil(310 * 15.5)
    let fund = 15_500 + 4805;
    assert_eq!(m.engine.settlement_fund(m.usd), fund);

    let frozen = m.engine.stable_data(m.usd).unwrap().settlement.unwrap();
    let reference = Price::new(
        AssetAmount::new(1310, m.usd),
        AssetAmount::new(fund, m.core),
    )
    .unwrap();
    assert_eq!(
        frozen.price.cmp_value(&reference),
        std::cmp::Ordering::Equal
    );

    // seller redeems at the frozen ratio, rounded down
    let before = m.engine.balance_of(seller, m.core);
    let outcome = m.engine.force_settle(seller, m.usd, 131).unwrap();
    // 131 * 20305 / 1310 = 2030.5
    assert_eq!(outcome.received, 2030);
    assert_eq!(m.engine.balance_of(seller, m.core), before + 2030);
    assert_eq!(m.engine.settlement_fund(m.usd), fund - 2030);

    // a queued request from before the close-out also pays from the fund
    let queued = m.engine.force_settle(seller, m.usd, 131).unwrap();
    assert!(queued.settlement_id.is_none());
}

/// After the close-out every position is gone, the latch stays set, and
/// the fund never goes negative.
#[test]
fn settlement_is_complete_and_latched() {
    let mut m = market(RevisionSchedule::all_active(), 0);
    let b1 = m.funded_account();
    let b2 = m.funded_account();
    let holder = m.engine.create_account();

    m.publish(1, 5);
    m.borrow(b1, 1000, 15_000);
    m.borrow(b2, 1000, 30_000);
    m.engine.transfer(b1, holder, m.usd, 1000).unwrap();
    m.engine.transfer(b2, holder, m.usd, 1000).unwrap();

    m.publish(1, 18);
    assert!(m.engine.has_settlement(m.usd));
    assert_eq!(m.engine.open_call_count(m.usd), 0);

    // a later feed publish changes nothing
    m.publish(1, 5);
    assert!(m.engine.has_settlement(m.usd));

    // redeem everything: the fund drains to zero but never below
    let fund = m.engine.settlement_fund(m.usd);
    let outcome = m.engine.force_settle(holder, m.usd, 2000).unwrap();
    assert!(outcome.received <= fund);
    assert!(m.engine.settlement_fund(m.usd) >= 0);
}
