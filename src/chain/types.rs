//! Typed records for everything the agent reads off-chain consumers care
//! about. All stablecoin amounts are 6-decimal fixed-point units.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Fulfilled,
    Cancelled,
}

impl RequestStatus {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Pending),
            1 => Some(Self::Fulfilled),
            2 => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A single paid API call work item.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: B256,
    pub endpoint_id: B256,
    pub requester: Address,
    pub agent: Address,
    pub total_cost_units: U256,
    pub base_cost_units: U256,
    pub markup_units: U256,
    pub gas_reimbursement_units: U256,
    pub created_at: u64,
    pub status: RequestStatus,
    pub params: Bytes,
    pub response: Bytes,
    pub has_callback: bool,
}

impl Request {
    pub fn age_secs(&self, now_secs: u64) -> u64 {
        now_secs.saturating_sub(self.created_at)
    }
}

/// A registered API handler definition.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: B256,
    pub url: String,
    pub input_format: String,
    pub output_format: String,
    pub base_cost_units: U256,
    pub max_response_bytes: u64,
    pub callback_gas_limit: u64,
    pub estimated_gas_cost_wei: U256,
    pub owner: Address,
    pub active: bool,
    pub registered_at: u64,
}

/// A recurring work item for the keep-alive driver.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: B256,
    pub consumer: Address,
    pub callback_target: Address,
    pub callback_gas_limit: u64,
    pub interval_secs: u64,
    pub fee_per_cycle_units: U256,
    pub estimated_gas_cost_wei: U256,
    /// Zero means unbounded.
    pub max_fulfillments: u64,
    pub fulfillment_count: u64,
    pub last_fulfilled_at: u64,
    pub active: bool,
}

impl Subscription {
    /// Remaining cycles, `None` when unbounded.
    pub fn cycles_remaining(&self) -> Option<u64> {
        if self.max_fulfillments == 0 {
            return None;
        }
        Some(self.max_fulfillments.saturating_sub(self.fulfillment_count))
    }

    /// The locally-checkable part of readiness: active, cycle budget left,
    /// and the interval elapsed. The consumer's optional external predicate
    /// is only visible through the contract's `isReady`, so this is
    /// necessary but not sufficient.
    pub fn is_due(&self, now_secs: u64) -> bool {
        self.active
            && self.cycles_remaining() != Some(0)
            && now_secs.saturating_sub(self.last_fulfilled_at) >= self.interval_secs
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HubStats {
    pub total_requests: u64,
    pub served_requests: u64,
    pub pending_protocol_fees_units: u128,
    pub total_volume_units: u128,
    pub endpoint_count: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct KeepAliveStats {
    pub subscription_count: u64,
    pub active_subscriptions: u64,
    pub total_fulfillments: u64,
    pub total_fees_paid_units: u128,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AgentStats {
    pub fulfilled: u64,
    pub cancelled: u64,
    pub earned_total_units: u128,
    pub last_active_at: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StakeInfo {
    pub staked: u128,
    pub unstake_requested: u128,
    pub unstake_available_at: u64,
    pub staked_since: u64,
}

/// ETH price plus per-endpoint gas config, enough for clients to re-derive
/// per-request cost locally without re-polling.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PricingSnapshot {
    /// 6-decimal stablecoin units per 1e18 wei.
    pub eth_price_units: u128,
    pub endpoints: Vec<EndpointPricing>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointPricing {
    pub endpoint_id: B256,
    pub estimated_gas_cost_wei: u128,
    pub base_cost_units: u128,
}

/// Receipt summary for a write that went through the sender.
#[derive(Debug, Clone, Copy)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub block: u64,
    pub gas_used: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decodes_known_values_and_rejects_garbage() {
        assert_eq!(RequestStatus::from_raw(0), Some(RequestStatus::Pending));
        assert_eq!(RequestStatus::from_raw(1), Some(RequestStatus::Fulfilled));
        assert_eq!(RequestStatus::from_raw(2), Some(RequestStatus::Cancelled));
        assert_eq!(RequestStatus::from_raw(3), None);
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }

    #[test]
    fn subscription_readiness_requires_all_local_conditions() {
        let base = Subscription {
            id: B256::ZERO,
            consumer: Address::ZERO,
            callback_target: Address::ZERO,
            callback_gas_limit: 200_000,
            interval_secs: 3_600,
            fee_per_cycle_units: U256::from(100_000u64),
            estimated_gas_cost_wei: U256::ZERO,
            max_fulfillments: 10,
            fulfillment_count: 3,
            last_fulfilled_at: 1_700_000_000,
            active: true,
        };
        let due_at = 1_700_000_000 + 3_600;

        assert!(base.is_due(due_at));
        assert!(!base.is_due(due_at - 1));

        let inactive = Subscription {
            active: false,
            ..base.clone()
        };
        assert!(!inactive.is_due(due_at));

        let exhausted = Subscription {
            fulfillment_count: 10,
            ..base.clone()
        };
        assert_eq!(exhausted.cycles_remaining(), Some(0));
        assert!(!exhausted.is_due(due_at));

        let unbounded = Subscription {
            max_fulfillments: 0,
            fulfillment_count: 1_000_000,
            ..base
        };
        assert_eq!(unbounded.cycles_remaining(), None);
        assert!(unbounded.is_due(due_at));
    }

    #[test]
    fn request_age_saturates_for_future_timestamps() {
        let req = Request {
            id: B256::ZERO,
            endpoint_id: B256::ZERO,
            requester: Address::ZERO,
            agent: Address::ZERO,
            total_cost_units: U256::ZERO,
            base_cost_units: U256::ZERO,
            markup_units: U256::ZERO,
            gas_reimbursement_units: U256::ZERO,
            created_at: 1_700_000_100,
            status: RequestStatus::Pending,
            params: Bytes::new(),
            response: Bytes::new(),
            has_callback: false,
        };
        assert_eq!(req.age_secs(1_700_000_000), 0);
        assert_eq!(req.age_secs(1_700_000_310), 210);
    }
}
