//! Property-based tests for the matching core.
//!
//! These verify the universal invariants under random inputs: exact
//! conversion bounds, value conservation across matching, the squeeze
//! price cap on forced covers, maker protection, and determinism.

use pegged_core::*;
use proptest::prelude::*;

const CORE_ID: AssetId = AssetId(0);
const USD_ID: AssetId = AssetId(1);

fn price(base: i64, quote: i64) -> Price {
    Price::new(
        AssetAmount::new(base, USD_ID),
        AssetAmount::new(quote, CORE_ID),
    )
    .unwrap()
}

proptest! {
    /// Down- and up-rounded conversions bracket the exact rational and
    /// differ by at most one unit.
    #[test]
    fn conversion_rounding_brackets_exact_value(
        base in 1i64..1_000_000,
        quote in 1i64..1_000_000,
        amount in 0i64..1_000_000,
    ) {
        let p = price(base, quote);
        let a = AssetAmount::new(amount, USD_ID);
        let down = p.convert(a, Rounding::Down).unwrap().amount;
        let up = p.convert(a, Rounding::Up).unwrap().amount;
        prop_assert!(down <= up);
        prop_assert!(up - down <= 1);
        // down * base <= amount * quote < (down + 1) * base
        prop_assert!(down as i128 * base as i128 <= amount as i128 * quote as i128);
        prop_assert!((down as i128 + 1) * base as i128 > amount as i128 * quote as i128);
        // converting the rounded-down result back never manufactures value
        let round_trip = p
            .convert(AssetAmount::new(down, CORE_ID), Rounding::Up)
            .unwrap()
            .amount;
        prop_assert!(round_trip <= amount);
    }

    /// Price comparison agrees with exact cross-multiplication.
    #[test]
    fn comparison_is_cross_multiplication(
        b1 in 1i64..100_000,
        q1 in 1i64..100_000,
        b2 in 1i64..100_000,
        q2 in 1i64..100_000,
    ) {
        let lhs = price(b1, q1);
        let rhs = price(b2, q2);
        let expect = (q1 as i128 * b2 as i128).cmp(&(q2 as i128 * b1 as i128));
        prop_assert_eq!(lhs.cmp_value(&rhs), expect);
    }

    /// The crossing test is symmetric between the two sides.
    #[test]
    fn crossing_is_symmetric(
        ask_pay in 1i64..10_000,
        ask_want in 1i64..10_000,
        bid_pay in 1i64..10_000,
        bid_want in 1i64..10_000,
    ) {
        let ask = price(ask_pay, ask_want);
        let bid = Price::new(
            AssetAmount::new(bid_pay, CORE_ID),
            AssetAmount::new(bid_want, USD_ID),
        )
        .unwrap();
        prop_assert_eq!(orders_cross(&ask, &bid), orders_cross(&bid, &ask));
    }
}

struct Scenario {
    engine: Engine,
    core: AssetId,
    usd: AssetId,
    accounts: Vec<AccountId>,
    deposited_core: i64,
}

/// One stable asset over one backing asset, three borrowers whose
/// collateralization stays above the squeeze price so the asset never
/// settles, a resting buy side, then a burst of seller orders against
/// buyers and margin calls.
fn run_scenario(
    ratios: [i64; 3],
    debts: [i64; 3],
    buys: Vec<(i64, i64)>,
    sales: Vec<(i64, i64)>,
) -> Scenario {
    let mut engine = Engine::with_rules(
        EngineConfig::default(),
        RevisionSchedule::active_through(Revision::FeedTriggeredSettlement),
    );
    let core = engine.create_asset("CORE");
    let mut options = StableAssetOptions::new(core);
    options.feed_lifetime_secs = 1_000_000;
    let usd = engine
        .create_stable_asset("STABLE", FeeRate(100), options)
        .unwrap();
    let feeder = engine.create_account();
    engine.set_feed_producers(usd, &[feeder]).unwrap();

    let publish = |engine: &mut Engine, debt: i64, coll: i64| {
        let feed = PriceFeed {
            settlement_price: Price::new(
                AssetAmount::new(debt, usd),
                AssetAmount::new(coll, core),
            )
            .unwrap(),
            maintenance_collateral_ratio: Ratio(1750),
            max_short_squeeze_ratio: Ratio(1100),
        };
        engine.publish_feed(feeder, usd, feed).unwrap();
    };

    publish(&mut engine, 1, 5);

    let mut accounts = vec![feeder];
    let mut deposited_core = 0i64;
    let seller = engine.create_account();
    accounts.push(seller);

    for (i, debt) in debts.iter().enumerate() {
        let who = engine.create_account();
        engine.deposit(who, core, 100_000).unwrap();
        deposited_core += 100_000;
        engine
            .adjust_debt_position(who, usd, *debt, debt * ratios[i], None)
            .unwrap();
        engine.transfer(who, seller, usd, *debt).unwrap();
        accounts.push(who);
    }

    let buyer = engine.create_account();
    engine.deposit(buyer, core, 500_000).unwrap();
    deposited_core += 500_000;
    accounts.push(buyer);

    publish(&mut engine, 1, 10);

    for (core_amount, usd_amount) in buys {
        let _ = engine.place_limit_order(
            buyer,
            AssetAmount::new(core_amount, core),
            AssetAmount::new(usd_amount, usd),
            Timestamp::never(),
        );
    }

    for (usd_amount, core_amount) in sales {
        let _ = engine.place_limit_order(
            seller,
            AssetAmount::new(usd_amount, usd),
            AssetAmount::new(core_amount, core),
            Timestamp::never(),
        );
    }

    Scenario {
        engine,
        core,
        usd,
        accounts,
        deposited_core,
    }
}

impl Scenario {
    fn total_core(&self) -> i64 {
        let balances: i64 = self
            .accounts
            .iter()
            .map(|a| self.engine.balance_of(*a, self.core))
            .sum();
        let escrow: i64 = self
            .engine
            .book()
            .orders()
            .filter(|o| o.pay_asset() == self.core)
            .map(|o| o.for_sale)
            .sum();
        let collateral: i64 = self
            .accounts
            .iter()
            .filter_map(|a| self.engine.call_position(*a, self.usd))
            .map(|c| c.collateral)
            .sum();
        balances
            + escrow
            + collateral
            + self.engine.settlement_fund(self.usd)
            + self.engine.collateral_fees(self.usd)
            + self.engine.accumulated_market_fees(self.core)
    }

    fn total_usd(&self) -> i64 {
        let balances: i64 = self
            .accounts
            .iter()
            .map(|a| self.engine.balance_of(*a, self.usd))
            .sum();
        let escrow: i64 = self
            .engine
            .book()
            .orders()
            .filter(|o| o.pay_asset() == self.usd)
            .map(|o| o.for_sale)
            .sum();
        balances + escrow + self.engine.accumulated_market_fees(self.usd)
    }

    fn total_debt(&self) -> i64 {
        self.accounts
            .iter()
            .filter_map(|a| self.engine.call_position(*a, self.usd))
            .map(|c| c.debt)
            .sum()
    }
}

fn ratio_strategy() -> impl Strategy<Value = [i64; 3]> {
    [12i64..17, 12i64..17, 12i64..17]
}

fn debt_strategy() -> impl Strategy<Value = [i64; 3]> {
    [500i64..1500, 500i64..1500, 500i64..1500]
}

fn sales_strategy() -> impl Strategy<Value = Vec<(i64, i64)>> {
    proptest::collection::vec((1i64..400, 8i64..14), 1..6)
        .prop_map(|v| v.into_iter().map(|(u, c)| (u, u * c)).collect())
}

fn buys_strategy() -> impl Strategy<Value = Vec<(i64, i64)>> {
    // buyer offers between 9 and 12 units of backing per stable unit
    proptest::collection::vec((1i64..200, 9i64..13), 0..4)
        .prop_map(|v| v.into_iter().map(|(u, c)| (u * c, u)).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The backing asset is conserved across matching: balances, order
    /// escrow, locked collateral and the fee pools always add back up to
    /// what was deposited.
    #[test]
    fn backing_asset_is_conserved(
        ratios in ratio_strategy(),
        debts in debt_strategy(),
        buys in buys_strategy(),
        sales in sales_strategy(),
    ) {
        let s = run_scenario(ratios, debts, buys, sales);
        prop_assert!(!s.engine.has_settlement(s.usd));
        prop_assert_eq!(s.total_core(), s.deposited_core);
    }

    /// Every circulating stable unit is a debt unit: balances plus
    /// escrow plus fees equal the open debt.
    #[test]
    fn stable_supply_matches_open_debt(
        ratios in ratio_strategy(),
        debts in debt_strategy(),
        buys in buys_strategy(),
        sales in sales_strategy(),
    ) {
        let s = run_scenario(ratios, debts, buys, sales);
        prop_assert_eq!(s.total_usd(), s.total_debt());
    }

    /// No forced cover ever pays the counterparty more than the squeeze
    /// price allows.
    #[test]
    fn no_fill_above_squeeze_payout(
        ratios in ratio_strategy(),
        debts in debt_strategy(),
        buys in buys_strategy(),
        sales in sales_strategy(),
    ) {
        let s = run_scenario(ratios, debts, buys, sales);
        let mssp = price(1, 11);
        for event in s.engine.events() {
            if let EventPayload::CallFill(fill) = &event.payload {
                let received = fill.collateral_paid - fill.margin_call_fee;
                let cap = mssp
                    .convert(AssetAmount::new(fill.debt_covered, s.usd), Rounding::Up)
                    .unwrap()
                    .amount;
                prop_assert!(
                    received <= cap,
                    "cover of {} received {} above cap {}",
                    fill.debt_covered,
                    received,
                    cap
                );
            }
        }
    }

    /// A resting maker is never underpaid relative to its own price.
    #[test]
    fn maker_is_never_underpaid(
        ratios in ratio_strategy(),
        debts in debt_strategy(),
        buys in buys_strategy(),
        sales in sales_strategy(),
    ) {
        let s = run_scenario(ratios, debts, buys, sales);
        for event in s.engine.events() {
            if let EventPayload::LimitFill(fill) = &event.payload {
                if !fill.is_maker {
                    continue;
                }
                // gross receive (before the market fee) must be worth at
                // least what was paid at the maker's own price
                let gross = fill.receives + fill.market_fee;
                let order_events: Vec<_> = s
                    .engine
                    .events()
                    .iter()
                    .filter_map(|e| match &e.payload {
                        EventPayload::OrderPlaced(p) if p.order_id == fill.order_id => Some(p),
                        _ => None,
                    })
                    .collect();
                prop_assert_eq!(order_events.len(), 1);
                let sell_price = order_events[0].sell_price;
                prop_assert!(
                    gross as i128 * sell_price.base.amount as i128
                        >= fill.pays as i128 * sell_price.quote.amount as i128
                );
            }
        }
    }

    /// The same input stream always produces the identical event log.
    #[test]
    fn matching_is_deterministic(
        ratios in ratio_strategy(),
        debts in debt_strategy(),
        buys in buys_strategy(),
        sales in sales_strategy(),
    ) {
        let a = run_scenario(ratios, debts, buys.clone(), sales.clone());
        let b = run_scenario(ratios, debts, buys, sales);
        prop_assert_eq!(
            format!("{:?}", a.engine.events()),
            format!("{:?}", b.engine.events())
        );
    }
}
