//! Immutable aggregate of protocol read-state.
//!
//! A snapshot is built off to the side and swapped in atomically; readers
//! copy the `Arc`, never the contents, so they always observe either the
//! previous complete snapshot or the next one.

use crate::broadcast::now_ms;
use crate::chain::types::{
    AgentStats, HubStats, KeepAliveStats, PricingSnapshot, RequestStatus, StakeInfo, Subscription,
};
use alloy::primitives::{Address, B256};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct EndpointView {
    pub id: B256,
    pub url: String,
    pub input_format: String,
    pub output_format: String,
    pub base_cost_units: u128,
    pub base_cost_usd: String,
    pub estimated_gas_cost_wei: u128,
    pub callback_gas_limit: u64,
    pub owner: Address,
    /// Resolved via the identity service; `None` when resolution failed.
    pub owner_name: Option<String>,
    /// `None` when the owner-stats sub-fetch failed.
    pub owner_stats: Option<AgentStats>,
    pub active: bool,
    pub registered_at: u64,
    /// Historical fulfillments observed in the recent scan window.
    pub fulfillment_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    pub id: B256,
    pub consumer: Address,
    pub interval_secs: u64,
    /// Human-readable rendering of `interval_secs`.
    pub interval: String,
    pub fee_per_cycle_units: u128,
    pub fee_per_cycle_usd: String,
    /// Zero means unbounded.
    pub max_fulfillments: u64,
    pub fulfillment_count: u64,
    pub last_fulfilled_at: u64,
    pub active: bool,
}

impl SubscriptionView {
    pub fn from_subscription(sub: &Subscription) -> Self {
        let fee_per_cycle_units = u128::try_from(sub.fee_per_cycle_units).unwrap_or(u128::MAX);
        Self {
            id: sub.id,
            consumer: sub.consumer,
            interval_secs: sub.interval_secs,
            interval: human_interval(sub.interval_secs),
            fee_per_cycle_units,
            fee_per_cycle_usd: format_usd(fee_per_cycle_units),
            max_fulfillments: sub.max_fulfillments,
            fulfillment_count: sub.fulfillment_count,
            last_fulfilled_at: sub.last_fulfilled_at,
            active: sub.active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub id: B256,
    pub endpoint_id: B256,
    pub requester: Address,
    pub status: RequestStatus,
    pub total_cost_units: u128,
    pub total_cost_usd: String,
    pub created_at: u64,
    pub block: u64,
}

/// This agent's own standing, for the operator dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentView {
    pub address: Address,
    pub stats: Option<AgentStats>,
    pub stake: Option<StakeInfo>,
    pub pending_rewards_units: Option<u128>,
    pub reputation: Option<u128>,
    pub eligible: Option<bool>,
    pub hub_balance_units: Option<u128>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StakingView {
    pub total_staked_units: Option<u128>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppSnapshot {
    pub built_at_ms: u64,
    pub block_number: u64,
    pub hub: Option<HubStats>,
    pub keepalive: Option<KeepAliveStats>,
    pub staking: StakingView,
    pub agent: AgentView,
    pub endpoints: Vec<EndpointView>,
    pub subscriptions: Vec<SubscriptionView>,
    pub pricing: PricingSnapshot,
    pub recent_requests: Vec<RequestSummary>,
}

impl AppSnapshot {
    /// Milliseconds since this snapshot was built. Saturating, so the
    /// exposed age is never negative even under clock skew.
    pub fn cache_age_ms(&self) -> u64 {
        now_ms().saturating_sub(self.built_at_ms)
    }
}

/// "$1.23" from 6-decimal stablecoin units, truncating sub-cent digits.
pub fn format_usd(units: u128) -> String {
    let dollars = units / 1_000_000;
    let cents = (units % 1_000_000) / 10_000;
    format!("${dollars}.{cents:02}")
}

/// Compact human-readable interval, largest two components.
pub fn human_interval(secs: u64) -> String {
    if secs == 0 {
        return "0s".to_string();
    }
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (mins, seconds) = (rem / 60, rem % 60);
    let parts = [
        (days, "d"),
        (hours, "h"),
        (mins, "m"),
        (seconds, "s"),
    ];
    let mut out = String::new();
    let mut used = 0;
    for (value, unit) in parts {
        if value == 0 {
            continue;
        }
        if used > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{value}{unit}"));
        used += 1;
        if used == 2 {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_formatting_truncates_to_cents() {
        assert_eq!(format_usd(0), "$0.00");
        assert_eq!(format_usd(240_000), "$0.24");
        assert_eq!(format_usd(12_000), "$0.01");
        assert_eq!(format_usd(1_239_999), "$1.23");
        assert_eq!(format_usd(1_000_000_000), "$1000.00");
    }

    #[test]
    fn interval_formatting_keeps_two_components() {
        assert_eq!(human_interval(0), "0s");
        assert_eq!(human_interval(45), "45s");
        assert_eq!(human_interval(3_661), "1h 1m");
        assert_eq!(human_interval(90_000), "1d 1h");
    }

    #[test]
    fn cache_age_is_non_negative_under_clock_skew() {
        let snapshot = AppSnapshot {
            built_at_ms: u64::MAX,
            block_number: 0,
            hub: None,
            keepalive: None,
            staking: StakingView::default(),
            agent: AgentView::default(),
            endpoints: Vec::new(),
            subscriptions: Vec::new(),
            pricing: PricingSnapshot::default(),
            recent_requests: Vec::new(),
        };
        assert_eq!(snapshot.cache_age_ms(), 0);
    }

    #[test]
    fn subscription_view_derives_the_readable_fields() {
        let sub = Subscription {
            id: B256::repeat_byte(0x5a),
            consumer: Address::repeat_byte(2),
            callback_target: Address::ZERO,
            callback_gas_limit: 200_000,
            interval_secs: 90_000,
            fee_per_cycle_units: alloy::primitives::U256::from(240_000u64),
            estimated_gas_cost_wei: alloy::primitives::U256::ZERO,
            max_fulfillments: 12,
            fulfillment_count: 4,
            last_fulfilled_at: 1_700_000_000,
            active: true,
        };
        let view = SubscriptionView::from_subscription(&sub);
        assert_eq!(view.interval, "1d 1h");
        assert_eq!(view.fee_per_cycle_usd, "$0.24");
        assert_eq!(view.fee_per_cycle_units, 240_000);
        assert_eq!(view.max_fulfillments, 12);
        assert!(view.active);
    }
}
