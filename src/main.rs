//! Stablecoin DEX Core Simulation.
//!
//! Demonstrates the matching core end to end: borrowing against
//! collateral, margin calls filling against the book, forced settlement,
//! and a full global close-out with fund redemption.

use pegged_core::*;

fn main() {
    println!("Stablecoin DEX Core Engine Simulation");
    println!("One stable asset, one backing asset, full lifecycle\n");

    scenario_1_margin_call_fill();
    scenario_2_forced_settlement();
    scenario_3_global_settlement();

    println!("\nAll simulations completed successfully.");
}

struct Market {
    engine: Engine,
    core: AssetId,
    usd: AssetId,
    feeder: AccountId,
}

fn setup() -> Market {
    let mut engine = Engine::new(EngineConfig::default());
    let core = engine.create_asset("CORE");
    let usd = engine
        .create_stable_asset("STABLE", FeeRate(0), StableAssetOptions::new(core))
        .expect("backing asset exists");
    let feeder = engine.create_account();
    engine.set_feed_producers(usd, &[feeder]).unwrap();
    Market {
        engine,
        core,
        usd,
        feeder,
    }
}

fn feed(usd: AssetId, core: AssetId, debt: i64, collateral: i64) -> PriceFeed {
    PriceFeed {
        settlement_price: Price::new(
            AssetAmount::new(debt, usd),
            AssetAmount::new(collateral, core),
        )
        .expect("well-formed feed"),
        maintenance_collateral_ratio: Ratio(1750),
        max_short_squeeze_ratio: Ratio(1100),
    }
}

/// A price drop margin-calls a borrower; an incoming seller fills the
/// position at the squeeze price.
fn scenario_1_margin_call_fill() {
    println!("Scenario 1: Margin Call Against The Book\n");

    let mut m = setup();
    let borrower = m.engine.create_account();
    let seller = m.engine.create_account();

    m.engine.deposit(borrower, m.core, 100_000).unwrap();
    m.engine
        .publish_feed(m.feeder, m.usd, feed(m.usd, m.core, 1, 5))
        .unwrap();
    m.engine
        .adjust_debt_position(borrower, m.usd, 1000, 15_000, None)
        .unwrap();
    m.engine.transfer(borrower, seller, m.usd, 1000).unwrap();
    println!("  Borrower locks 15000 CORE against 1000 STABLE at feed 1/5");

    m.engine
        .publish_feed(m.feeder, m.usd, feed(m.usd, m.core, 1, 10))
        .unwrap();
    println!("  Feed drops to 1/10, maintenance needs 17.5 CORE per STABLE");

    let outcome = m
        .engine
        .place_limit_order(
            seller,
            AssetAmount::new(700, m.usd),
            AssetAmount::new(5900, m.core),
            Timestamp::never(),
        )
        .unwrap();
    println!(
        "  Seller offers 700 STABLE, fills {} for {} CORE at the squeeze price",
        outcome.paid, outcome.received
    );

    let call = m.engine.call_position(borrower, m.usd).unwrap();
    println!(
        "  Position now owes {} against {} CORE\n",
        call.debt, call.collateral
    );
}

/// A holder redeems stable units at the feed price after the settle
/// delay.
fn scenario_2_forced_settlement() {
    println!("Scenario 2: Forced Settlement\n");

    let mut m = setup();
    let borrower = m.engine.create_account();
    let holder = m.engine.create_account();

    m.engine.deposit(borrower, m.core, 100_000).unwrap();
    m.engine
        .publish_feed(m.feeder, m.usd, feed(m.usd, m.core, 1, 5))
        .unwrap();
    m.engine
        .adjust_debt_position(borrower, m.usd, 1000, 16_000, None)
        .unwrap();
    m.engine.transfer(borrower, holder, m.usd, 500).unwrap();

    let outcome = m.engine.force_settle(holder, m.usd, 100).unwrap();
    println!(
        "  Holder queues 100 STABLE for settlement (request {:?})",
        outcome.settlement_id
    );

    // keep the feed alive past the settle delay
    m.engine.set_time(Timestamp::from_secs(86_000));
    m.engine
        .publish_feed(m.feeder, m.usd, feed(m.usd, m.core, 1, 5))
        .unwrap();
    m.engine.on_block_end(Timestamp::from_secs(86_500)).unwrap();

    println!(
        "  After the delay the holder holds {} CORE, borrower owes {}\n",
        m.engine.balance_of(holder, m.core),
        m.engine.call_position(borrower, m.usd).unwrap().debt
    );
}

/// A crash leaves the least-collateralized position under water: every
/// position closes into the settlement fund and redemptions pay from it.
fn scenario_3_global_settlement() {
    println!("Scenario 3: Global Settlement\n");

    let mut m = setup();
    let borrower = m.engine.create_account();
    let borrower2 = m.engine.create_account();
    let holder = m.engine.create_account();

    m.engine.deposit(borrower, m.core, 100_000).unwrap();
    m.engine.deposit(borrower2, m.core, 100_000).unwrap();
    m.engine
        .publish_feed(m.feeder, m.usd, feed(m.usd, m.core, 1, 5))
        .unwrap();
    m.engine
        .adjust_debt_position(borrower, m.usd, 1000, 15_000, None)
        .unwrap();
    m.engine
        .adjust_debt_position(borrower2, m.usd, 1000, 40_000, None)
        .unwrap();
    m.engine.transfer(borrower, holder, m.usd, 1000).unwrap();

    m.engine
        .publish_feed(m.feeder, m.usd, feed(m.usd, m.core, 1, 18))
        .unwrap();
    println!("  Feed crashes to 1/18, least collateralization is 15");
    println!(
        "  Globally settled: {}, fund holds {} CORE",
        m.engine.has_settlement(m.usd),
        m.engine.settlement_fund(m.usd)
    );

    let outcome = m.engine.force_settle(holder, m.usd, 1000).unwrap();
    println!(
        "  Holder redeems 1000 STABLE for {} CORE from the fund",
        outcome.received
    );
    println!(
        "  Fund remaining: {} CORE, open positions: {}\n",
        m.engine.settlement_fund(m.usd),
        m.engine.open_call_count(m.usd)
    );
}
