//! Profitability gate scenarios: the literal keep-alive skip case, the
//! loss-tolerance boundary, and determinism across repeated evaluation.

use hub_agent::gate::{evaluate, GateVerdict, DEFAULT_GAS_BUFFER_PCT, DEFAULT_LOSS_TOLERANCE_UNITS};

#[test]
fn keepalive_skip_scenario_is_unprofitable() {
    // 800k simulated gas at 0.1 gwei => 8e13 wei cost. ETH at $3000
    // (3_000_000_000 in 6-dec units) makes the usdc cost 240_000 ($0.24);
    // the subscription reimburses 100_000 ($0.10).
    let report = evaluate(
        800_000,
        100_000_000,
        3_000_000_000,
        100_000,
        100,
        DEFAULT_LOSS_TOLERANCE_UNITS,
    );
    assert_eq!(report.wei_cost, 80_000_000_000_000);
    assert_eq!(report.usdc_cost_units, 240_000);
    assert_eq!(report.profit_units, -140_000);
    assert_eq!(report.verdict, GateVerdict::Unprofitable);
}

#[test]
fn happy_path_fulfillment_is_profitable() {
    // Reimbursement $0.012 against an estimated cost of $0.009.
    // 150k gas (buffered to 180k) at 0.05 gwei = 9e12 wei; ETH at $1000
    // => usdc cost 9_000.
    let report = evaluate(
        150_000,
        50_000_000,
        1_000_000_000,
        12_000,
        DEFAULT_GAS_BUFFER_PCT,
        DEFAULT_LOSS_TOLERANCE_UNITS,
    );
    assert_eq!(report.gas_limit, 180_000);
    assert_eq!(report.usdc_cost_units, 9_000);
    assert_eq!(report.profit_units, 3_000);
    assert_eq!(report.verdict, GateVerdict::Profitable);
}

#[test]
fn loss_tolerance_boundary_is_inclusive() {
    // Construct profit exactly at -lossTolerance: still profitable.
    let at_boundary = evaluate(105_000, 1_000_000_000, 1_000_000_000, 100_000, 100, 5_000);
    assert_eq!(at_boundary.profit_units, -5_000);
    assert_eq!(at_boundary.verdict, GateVerdict::Profitable);

    // One unit past the boundary flips the verdict.
    let past_boundary = evaluate(105_001, 1_000_000_000, 1_000_000_000, 100_000, 100, 5_000);
    assert_eq!(past_boundary.profit_units, -5_001);
    assert_eq!(past_boundary.verdict, GateVerdict::Unprofitable);
}

#[test]
fn oracle_failure_fails_open() {
    // Price 0 is the degraded-oracle path; the gate is an optimizer, not a
    // safety property, so the attempt proceeds.
    let report = evaluate(800_000, 100_000_000, 0, 0, DEFAULT_GAS_BUFFER_PCT, 5_000);
    assert_eq!(report.verdict, GateVerdict::Profitable);
    assert_eq!(report.usdc_cost_units, 0);
}

#[test]
fn verdict_is_a_pure_function_of_numeric_inputs() {
    let inputs = [
        (800_000u64, 100_000_000u128, 3_000_000_000u128, 100_000u128),
        (21_000, 1_000_000_000, 2_500_000_000, 50_000),
        (5_000_000, 10_000_000, 4_000_000_000, 9_999_999),
        (0, 0, 0, 0),
    ];
    for (gas, gas_price, eth_price, reimbursement) in inputs {
        let a = evaluate(gas, gas_price, eth_price, reimbursement, 120, 5_000);
        let b = evaluate(gas, gas_price, eth_price, reimbursement, 120, 5_000);
        assert_eq!(a.verdict, b.verdict);
        assert_eq!(a.gas_limit, b.gas_limit);
        assert_eq!(a.wei_cost, b.wei_cost);
        assert_eq!(a.usdc_cost_units, b.usdc_cost_units);
        assert_eq!(a.profit_units, b.profit_units);
    }
}
