//! Pre-flight profitability gate.
//!
//! Decides whether submitting a write will pay more than it costs. The
//! numeric core is a pure function of its inputs so the decision is
//! reproducible from a log line. The gate is an optimizer, not a safety
//! property: when the price oracle fails, callers proceed fail-open rather
//! than stall the pipeline.

use crate::chain::ChainAdapter;
use crate::error::ChainError;
use alloy::primitives::{Address, Bytes};
use alloy::providers::Provider;

/// $0.005 at 6 decimals. Global, not per-endpoint.
pub const DEFAULT_LOSS_TOLERANCE_UNITS: u64 = 5_000;
/// 20% safety margin on the raw estimate (L2 L1-data-cost variance).
pub const DEFAULT_GAS_BUFFER_PCT: u64 = 120;

const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Profitable,
    Unprofitable,
    /// Gas estimation reverted; the call would revert on-chain. This is the
    /// normal outcome when another agent won the race.
    WouldRevert,
    /// A read failed in a way that prevents a decision.
    Undecidable,
}

/// Every intermediate value, so callers can log the whole computation.
#[derive(Debug, Clone, Copy)]
pub struct GateReport {
    pub verdict: GateVerdict,
    pub raw_estimate: u64,
    /// Gas ceiling to submit with (raw estimate with buffer applied).
    pub gas_limit: u64,
    pub gas_price_wei: u128,
    pub wei_cost: u128,
    /// 6-decimal stablecoin units per 1e18 wei; 0 when the oracle failed.
    pub eth_price_units: u128,
    pub usdc_cost_units: u128,
    pub reimbursement_units: u128,
    pub profit_units: i128,
}

impl GateReport {
    pub fn is_profitable(&self) -> bool {
        self.verdict == GateVerdict::Profitable
    }
}

/// Pure decision: deterministic in its numeric inputs.
///
/// `is_profitable = reimbursement - usdcCost >= -lossTolerance`. An oracle
/// price of 0 is the fail-open path: cost is treated as unknown-but-paid
/// and the verdict stays Profitable.
pub fn evaluate(
    raw_estimate: u64,
    gas_price_wei: u128,
    eth_price_units: u128,
    reimbursement_units: u128,
    gas_buffer_pct: u64,
    loss_tolerance_units: u64,
) -> GateReport {
    let gas_limit = (raw_estimate as u128)
        .saturating_mul(gas_buffer_pct as u128)
        .checked_div(100)
        .unwrap_or(raw_estimate as u128)
        .min(u64::MAX as u128) as u64;
    let wei_cost = (gas_limit as u128).saturating_mul(gas_price_wei);
    let usdc_cost_units = wei_cost
        .checked_mul(eth_price_units)
        .map(|v| v / WEI_PER_ETH)
        .unwrap_or(u128::MAX / WEI_PER_ETH);

    let profit_units = clamped_i128(reimbursement_units) - clamped_i128(usdc_cost_units);
    let verdict = if eth_price_units == 0 {
        GateVerdict::Profitable
    } else if profit_units >= -(loss_tolerance_units as i128) {
        GateVerdict::Profitable
    } else {
        GateVerdict::Unprofitable
    };

    GateReport {
        verdict,
        raw_estimate,
        gas_limit,
        gas_price_wei,
        wei_cost,
        eth_price_units,
        usdc_cost_units,
        reimbursement_units,
        profit_units,
    }
}

fn clamped_i128(v: u128) -> i128 {
    i128::try_from(v).unwrap_or(i128::MAX)
}

fn undecidable(raw_estimate: u64, reimbursement_units: u128, verdict: GateVerdict) -> GateReport {
    GateReport {
        verdict,
        raw_estimate,
        gas_limit: 0,
        gas_price_wei: 0,
        wei_cost: 0,
        eth_price_units: 0,
        usdc_cost_units: 0,
        reimbursement_units,
        profit_units: 0,
    }
}

/// Estimate gas for `(to, calldata)`, fetch gas price and the oracle ETH
/// price, and decide. No side effects beyond RPC reads.
pub async fn check<P: Provider + Clone>(
    adapter: &ChainAdapter<P>,
    to: Address,
    calldata: Bytes,
    reimbursement_units: u128,
    gas_buffer_pct: u64,
    loss_tolerance_units: u64,
) -> GateReport {
    let raw_estimate = match adapter.estimate_gas(to, calldata).await {
        Ok(gas) => gas,
        Err(ChainError::Reverted(reason)) => {
            tracing::debug!(%to, reason, "gate: simulation reverted");
            return undecidable(0, reimbursement_units, GateVerdict::WouldRevert);
        }
        Err(err) => {
            tracing::debug!(%to, %err, "gate: gas estimation unavailable");
            return undecidable(0, reimbursement_units, GateVerdict::Undecidable);
        }
    };

    let gas_price_wei = match adapter.gas_price().await {
        Ok(price) => price,
        Err(err) => {
            tracing::debug!(%err, "gate: gas price unavailable");
            return undecidable(raw_estimate, reimbursement_units, GateVerdict::Undecidable);
        }
    };

    // Oracle failure is fail-open: price 0 flows into evaluate() and keeps
    // the verdict Profitable.
    let eth_price_units = match adapter.get_eth_price().await {
        Ok(price) => price,
        Err(err) => {
            tracing::warn!(%err, "gate: eth price lookup failed; proceeding fail-open");
            0
        }
    };

    evaluate(
        raw_estimate,
        gas_price_wei,
        eth_price_units,
        reimbursement_units,
        gas_buffer_pct,
        loss_tolerance_units,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprofitable_keepalive_scenario() {
        // 800k gas at 0.1 gwei => 8e13 wei; ETH at $3000 (3e9 units)
        // => usdc cost 240_000 ($0.24) against a $0.10 reimbursement.
        let report = evaluate(800_000, 100_000_000, 3_000_000_000, 100_000, 100, 5_000);
        assert_eq!(report.wei_cost, 80_000_000_000_000);
        assert_eq!(report.usdc_cost_units, 240_000);
        assert_eq!(report.profit_units, -140_000);
        assert_eq!(report.verdict, GateVerdict::Unprofitable);
    }

    #[test]
    fn buffer_scales_the_submitted_gas_limit() {
        let report = evaluate(500_000, 1, 0, 0, 120, 5_000);
        assert_eq!(report.gas_limit, 600_000);
    }

    #[test]
    fn boundary_at_negative_loss_tolerance() {
        // Pick numbers so usdc cost is exactly 105_000 against 100_000
        // reimbursement: profit = -5_000 = -lossTolerance => profitable.
        let gas = 105_000u64;
        let gas_price = 1_000_000_000u128; // 1 gwei
        let eth_price = 1_000_000_000u128; // makes usdc = wei_cost / 1e9
        let report = evaluate(gas, gas_price, eth_price, 100_000, 100, 5_000);
        assert_eq!(report.usdc_cost_units, 105_000);
        assert_eq!(report.profit_units, -5_000);
        assert_eq!(report.verdict, GateVerdict::Profitable);

        // One more unit of cost crosses the boundary.
        let report = evaluate(gas + 1, gas_price, eth_price, 100_000, 100, 5_000);
        assert_eq!(report.profit_units, -5_001);
        assert_eq!(report.verdict, GateVerdict::Unprofitable);
    }

    #[test]
    fn zero_eth_price_fails_open() {
        let report = evaluate(800_000, 100_000_000, 0, 0, 120, 5_000);
        assert_eq!(report.verdict, GateVerdict::Profitable);
    }

    #[test]
    fn decision_is_deterministic_in_its_inputs() {
        let a = evaluate(123_456, 987_654_321, 3_210_000_000, 42_000, 120, 5_000);
        let b = evaluate(123_456, 987_654_321, 3_210_000_000, 42_000, 120, 5_000);
        assert_eq!(a.verdict, b.verdict);
        assert_eq!(a.profit_units, b.profit_units);
        assert_eq!(a.gas_limit, b.gas_limit);
        assert_eq!(a.usdc_cost_units, b.usdc_cost_units);
    }
}
