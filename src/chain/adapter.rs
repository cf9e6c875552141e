//! Typed facade over the RPC endpoint.
//!
//! Every method maps one read or write; errors come back as [`ChainError`]
//! variants and no retries happen here. Callers own retry policy per loop.

use crate::chain::bindings::{Erc20, Hub, KeepAlive, Staking};
use crate::chain::types::{
    AgentStats, Endpoint, HubStats, KeepAliveStats, Request, RequestStatus, StakeInfo,
    Subscription,
};
use crate::error::ChainError;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log, TransactionReceipt, TransactionRequest};
use alloy::sol_types::SolCall;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

const DEFAULT_RPC_CALL_TIMEOUT_MS: u64 = 5_000;

/// Callers must keep `to - from` within this bound per `get_logs` call.
pub const MAX_LOG_RANGE_BLOCKS: u64 = 1_000;

fn rpc_call_timeout() -> Duration {
    let ms = std::env::var("RPC_CALL_TIMEOUT_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| (250..=60_000).contains(v))
        .unwrap_or(DEFAULT_RPC_CALL_TIMEOUT_MS);
    Duration::from_millis(ms)
}

pub fn is_rate_limited_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("compute units per second")
}

pub fn is_revert_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("execution reverted") || msg.contains("revert")
}

fn is_invalid_args_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("invalid params")
        || msg.contains("-32602")
        || msg.contains("method not found")
        || msg.contains("-32601")
}

pub fn classify_rpc_error(context: &str, message: String) -> ChainError {
    if is_revert_rpc_error(&message) {
        ChainError::Reverted(format!("{context}: {message}"))
    } else if is_rate_limited_rpc_error(&message) {
        ChainError::RateLimited(format!("{context}: {message}"))
    } else if is_invalid_args_rpc_error(&message) {
        ChainError::InvalidArgs(format!("{context}: {message}"))
    } else {
        ChainError::Unavailable(format!("{context}: {message}"))
    }
}

fn to_u64(v: U256) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

fn to_u128(v: U256) -> u128 {
    u128::try_from(v).unwrap_or(u128::MAX)
}

/// Run `items` through `f` with at most `limit` concurrent calls, preserving
/// input order in the output.
pub async fn map_bounded<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    f: F,
) -> Vec<std::result::Result<R, ChainError>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, ChainError>> + Send + 'static,
{
    let total = items.len();
    let sem = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = tokio::task::JoinSet::new();
    for (idx, item) in items.into_iter().enumerate() {
        let sem = Arc::clone(&sem);
        let f = f.clone();
        set.spawn(async move {
            let _permit = sem.acquire_owned().await;
            (idx, f(item).await)
        });
    }
    let mut out: Vec<std::result::Result<R, ChainError>> = Vec::with_capacity(total);
    for _ in 0..total {
        out.push(Err(ChainError::Unavailable("task dropped".to_string())));
    }
    while let Some(joined) = set.join_next().await {
        if let Ok((idx, result)) = joined {
            out[idx] = result;
        }
    }
    out
}

#[derive(Clone)]
pub struct ChainAdapter<P> {
    provider: P,
    pub hub: Address,
    pub keepalive: Address,
    pub staking: Option<Address>,
    /// The signing identity; used as `from` for gas estimation.
    pub agent: Address,
    rpc_timeout: Duration,
}

impl<P: Provider + Clone> ChainAdapter<P> {
    pub fn new(
        provider: P,
        hub: Address,
        keepalive: Address,
        staking: Option<Address>,
        agent: Address,
    ) -> Self {
        Self {
            provider,
            hub,
            keepalive,
            staking,
            agent,
            rpc_timeout: rpc_call_timeout(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    async fn bounded<T, E, F>(&self, context: &str, fut: F) -> Result<T, ChainError>
    where
        E: std::fmt::Display,
        F: Future<Output = std::result::Result<T, E>>,
    {
        match timeout(self.rpc_timeout, fut).await {
            Err(_) => Err(ChainError::Timeout {
                waited_ms: self.rpc_timeout.as_millis() as u64,
                context: context.to_string(),
            }),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify_rpc_error(context, err.to_string())),
        }
    }

    // --- generic chain reads -------------------------------------------------

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        self.bounded("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    pub async fn gas_price(&self) -> Result<u128, ChainError> {
        self.bounded("eth_gasPrice", self.provider.get_gas_price())
            .await
    }

    /// Fetch logs for `address`/`topic0s` within `[from, to]`. The caller
    /// guarantees `to - from <= MAX_LOG_RANGE_BLOCKS`.
    pub async fn get_logs(
        &self,
        address: Address,
        topic0s: Vec<B256>,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, ChainError> {
        debug_assert!(to.saturating_sub(from) < MAX_LOG_RANGE_BLOCKS);
        let filter = Filter::new()
            .address(address)
            .event_signature(topic0s)
            .from_block(from)
            .to_block(to);
        self.bounded("eth_getLogs", self.provider.get_logs(&filter))
            .await
    }

    /// Estimate gas for `calldata` against `to`, sent from the agent
    /// identity. A revert here means the call would revert on-chain.
    pub async fn estimate_gas(&self, to: Address, calldata: Bytes) -> Result<u64, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(self.agent)
            .with_to(to)
            .with_input(calldata);
        self.bounded("eth_estimateGas", self.provider.estimate_gas(&tx))
            .await
    }

    // --- hub reads -----------------------------------------------------------

    pub async fn get_request(&self, id: B256) -> Result<Request, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let raw = self
            .bounded("hub.getRequest", async { hub.getRequest(id).call().await })
            .await?
            .data;
        let status = RequestStatus::from_raw(raw.status).ok_or_else(|| {
            ChainError::InvalidArgs(format!("hub.getRequest({id}): unknown status {}", raw.status))
        })?;
        Ok(Request {
            id,
            endpoint_id: raw.endpointId,
            requester: raw.requester,
            agent: raw.agent,
            total_cost_units: raw.totalCost,
            base_cost_units: raw.baseCost,
            markup_units: raw.markup,
            gas_reimbursement_units: raw.gasReimbursement,
            created_at: raw.createdAt,
            status,
            params: raw.params,
            response: raw.response,
            has_callback: raw.hasCallback,
        })
    }

    pub async fn get_endpoint_count(&self) -> Result<u64, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let out = self
            .bounded("hub.getEndpointCount", async {
                hub.getEndpointCount().call().await
            })
            .await?;
        Ok(to_u64(out.count))
    }

    pub async fn endpoint_id_at(&self, index: u64) -> Result<B256, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let out = self
            .bounded("hub.endpointIds", async {
                hub.endpointIds(U256::from(index)).call().await
            })
            .await?;
        Ok(out.id)
    }

    pub async fn get_endpoint(&self, id: B256) -> Result<Endpoint, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let raw = self
            .bounded("hub.getEndpoint", async { hub.getEndpoint(id).call().await })
            .await?
            .data;
        Ok(Endpoint {
            id,
            url: raw.url,
            input_format: raw.inputFormat,
            output_format: raw.outputFormat,
            base_cost_units: raw.baseCost,
            max_response_bytes: to_u64(raw.maxResponseBytes),
            callback_gas_limit: to_u64(raw.callbackGasLimit),
            estimated_gas_cost_wei: raw.estimatedGasCostWei,
            owner: raw.owner,
            active: raw.active,
            registered_at: raw.registeredAt,
        })
    }

    /// ETH price in 6-decimal stablecoin units per 1e18 wei.
    pub async fn get_eth_price(&self) -> Result<u128, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let out = self
            .bounded("hub.getEthPrice", async { hub.getEthPrice().call().await })
            .await?;
        Ok(to_u128(out.priceUnits))
    }

    pub async fn get_endpoint_price(&self, id: B256) -> Result<(u128, u128), ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let out = self
            .bounded("hub.getEndpointPrice", async {
                hub.getEndpointPrice(id).call().await
            })
            .await?;
        Ok((to_u128(out.estimatedGasCostWei), to_u128(out.baseCostUnits)))
    }

    pub async fn protocol_fees_accumulator(&self) -> Result<u128, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let out = self
            .bounded("hub.protocolFeesAccumulator", async {
                hub.protocolFeesAccumulator().call().await
            })
            .await?;
        Ok(to_u128(out.accumulated))
    }

    pub async fn get_hub_stats(&self) -> Result<HubStats, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let raw = self
            .bounded("hub.getHubStats", async { hub.getHubStats().call().await })
            .await?
            .stats;
        Ok(HubStats {
            total_requests: to_u64(raw.totalRequests),
            served_requests: to_u64(raw.servedRequests),
            pending_protocol_fees_units: to_u128(raw.pendingProtocolFees),
            total_volume_units: to_u128(raw.totalVolume),
            endpoint_count: to_u64(raw.endpointCount),
        })
    }

    pub async fn get_agent_stats(&self, agent: Address) -> Result<AgentStats, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let raw = self
            .bounded("hub.getAgentStats", async {
                hub.getAgentStats(agent).call().await
            })
            .await?
            .stats;
        Ok(AgentStats {
            fulfilled: to_u64(raw.fulfilled),
            cancelled: to_u64(raw.cancelled),
            earned_total_units: to_u128(raw.earnedTotal),
            last_active_at: raw.lastActiveAt,
        })
    }

    // --- keep-alive reads ----------------------------------------------------

    pub async fn get_subscription_count(&self) -> Result<u64, ChainError> {
        let ka = KeepAlive::new(self.keepalive, self.provider.clone());
        let out = self
            .bounded("keepalive.getSubscriptionCount", async {
                ka.getSubscriptionCount().call().await
            })
            .await?;
        Ok(to_u64(out.count))
    }

    pub async fn subscription_id_at(&self, index: u64) -> Result<B256, ChainError> {
        let ka = KeepAlive::new(self.keepalive, self.provider.clone());
        let out = self
            .bounded("keepalive.subscriptionIds", async {
                ka.subscriptionIds(U256::from(index)).call().await
            })
            .await?;
        Ok(out.id)
    }

    pub async fn get_subscription(&self, id: B256) -> Result<Subscription, ChainError> {
        let ka = KeepAlive::new(self.keepalive, self.provider.clone());
        let raw = self
            .bounded("keepalive.getSubscription", async {
                ka.getSubscription(id).call().await
            })
            .await?
            .data;
        Ok(Subscription {
            id,
            consumer: raw.consumer,
            callback_target: raw.callbackTarget,
            callback_gas_limit: to_u64(raw.callbackGasLimit),
            interval_secs: raw.intervalSecs,
            fee_per_cycle_units: raw.feePerCycle,
            estimated_gas_cost_wei: raw.estimatedGasCostWei,
            max_fulfillments: raw.maxFulfillments,
            fulfillment_count: raw.fulfillmentCount,
            last_fulfilled_at: raw.lastFulfilledAt,
            active: raw.active,
        })
    }

    /// (fee, gas reimbursement) in stablecoin units for one cycle.
    pub async fn get_subscription_cost(&self, id: B256) -> Result<(u128, u128), ChainError> {
        let ka = KeepAlive::new(self.keepalive, self.provider.clone());
        let out = self
            .bounded("keepalive.getSubscriptionCost", async {
                ka.getSubscriptionCost(id).call().await
            })
            .await?;
        Ok((to_u128(out.feeUnits), to_u128(out.gasReimbursementUnits)))
    }

    pub async fn is_subscription_ready(&self, id: B256) -> Result<bool, ChainError> {
        let ka = KeepAlive::new(self.keepalive, self.provider.clone());
        let out = self
            .bounded("keepalive.isReady", async { ka.isReady(id).call().await })
            .await?;
        Ok(out.ready)
    }

    pub async fn get_keepalive_stats(&self) -> Result<KeepAliveStats, ChainError> {
        let ka = KeepAlive::new(self.keepalive, self.provider.clone());
        let raw = self
            .bounded("keepalive.getStats", async { ka.getStats().call().await })
            .await?
            .stats;
        Ok(KeepAliveStats {
            subscription_count: to_u64(raw.subscriptionCount),
            active_subscriptions: to_u64(raw.activeSubscriptions),
            total_fulfillments: to_u64(raw.totalFulfillments),
            total_fees_paid_units: to_u128(raw.totalFeesPaid),
        })
    }

    // --- staking reads -------------------------------------------------------

    fn staking_address(&self) -> Result<Address, ChainError> {
        self.staking
            .ok_or_else(|| ChainError::InvalidArgs("STAKING_CONTRACT unset".to_string()))
    }

    pub async fn get_stake_info(&self, account: Address) -> Result<StakeInfo, ChainError> {
        let staking = Staking::new(self.staking_address()?, self.provider.clone());
        let raw = self
            .bounded("staking.getStakeInfo", async {
                staking.getStakeInfo(account).call().await
            })
            .await?
            .info;
        Ok(StakeInfo {
            staked: to_u128(raw.staked),
            unstake_requested: to_u128(raw.unstakeRequested),
            unstake_available_at: raw.unstakeAvailableAt,
            staked_since: raw.stakedSince,
        })
    }

    pub async fn pending_rewards(&self, account: Address) -> Result<u128, ChainError> {
        let staking = Staking::new(self.staking_address()?, self.provider.clone());
        let out = self
            .bounded("staking.pendingRewards", async {
                staking.pendingRewards(account).call().await
            })
            .await?;
        Ok(to_u128(out.amount))
    }

    pub async fn total_staked(&self) -> Result<u128, ChainError> {
        let staking = Staking::new(self.staking_address()?, self.provider.clone());
        let out = self
            .bounded("staking.totalStaked", async {
                staking.totalStaked().call().await
            })
            .await?;
        Ok(to_u128(out.amount))
    }

    pub async fn is_eligible_agent(&self, account: Address) -> Result<bool, ChainError> {
        let staking = Staking::new(self.staking_address()?, self.provider.clone());
        let out = self
            .bounded("staking.isEligibleAgent", async {
                staking.isEligibleAgent(account).call().await
            })
            .await?;
        Ok(out.eligible)
    }

    pub async fn get_reputation(&self, account: Address) -> Result<u128, ChainError> {
        let staking = Staking::new(self.staking_address()?, self.provider.clone());
        let out = self
            .bounded("staking.getReputation", async {
                staking.getReputation(account).call().await
            })
            .await?;
        Ok(to_u128(out.score))
    }

    // --- erc20 ---------------------------------------------------------------

    pub async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        let erc20 = Erc20::new(token, self.provider.clone());
        let out = self
            .bounded("erc20.allowance", async {
                erc20.allowance(owner, spender).call().await
            })
            .await?;
        Ok(out.amount)
    }

    // --- calldata builders (for gas estimation) ------------------------------

    pub fn fulfill_request_calldata(&self, id: B256, response: Bytes, session_id: B256) -> Bytes {
        Hub::fulfillRequestCall {
            requestId: id,
            response,
            sessionId: session_id,
        }
        .abi_encode()
        .into()
    }

    pub fn cancel_request_calldata(&self, id: B256) -> Bytes {
        Hub::cancelRequestCall { requestId: id }.abi_encode().into()
    }

    pub fn keepalive_fulfill_calldata(&self, id: B256) -> Bytes {
        KeepAlive::fulfillCall { subscriptionId: id }
            .abi_encode()
            .into()
    }

    // --- writes (invoked inside sender closures only) ------------------------

    pub async fn send_fulfill_request(
        &self,
        id: B256,
        response: Bytes,
        session_id: B256,
        gas_limit: u64,
    ) -> Result<TransactionReceipt, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let pending = hub
            .fulfillRequest(id, response, session_id)
            .gas(gas_limit)
            .send()
            .await
            .map_err(|e| classify_rpc_error("hub.fulfillRequest", e.to_string()))?;
        pending
            .get_receipt()
            .await
            .map_err(|e| classify_rpc_error("hub.fulfillRequest.receipt", e.to_string()))
    }

    pub async fn send_cancel_request(&self, id: B256) -> Result<TransactionReceipt, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let pending = hub
            .cancelRequest(id)
            .send()
            .await
            .map_err(|e| classify_rpc_error("hub.cancelRequest", e.to_string()))?;
        pending
            .get_receipt()
            .await
            .map_err(|e| classify_rpc_error("hub.cancelRequest.receipt", e.to_string()))
    }

    pub async fn send_keepalive_fulfill(
        &self,
        id: B256,
        gas_limit: u64,
    ) -> Result<TransactionReceipt, ChainError> {
        let ka = KeepAlive::new(self.keepalive, self.provider.clone());
        let pending = ka
            .fulfill(id)
            .gas(gas_limit)
            .send()
            .await
            .map_err(|e| classify_rpc_error("keepalive.fulfill", e.to_string()))?;
        pending
            .get_receipt()
            .await
            .map_err(|e| classify_rpc_error("keepalive.fulfill.receipt", e.to_string()))
    }

    pub async fn send_flush_protocol_fees(&self) -> Result<TransactionReceipt, ChainError> {
        let hub = Hub::new(self.hub, self.provider.clone());
        let pending = hub
            .flushProtocolFeesToBuyback()
            .send()
            .await
            .map_err(|e| classify_rpc_error("hub.flushProtocolFeesToBuyback", e.to_string()))?;
        pending
            .get_receipt()
            .await
            .map_err(|e| classify_rpc_error("hub.flushProtocolFeesToBuyback.receipt", e.to_string()))
    }

    pub async fn send_claim_rewards(&self) -> Result<TransactionReceipt, ChainError> {
        let staking = Staking::new(self.staking_address()?, self.provider.clone());
        let pending = staking
            .claimRewards()
            .send()
            .await
            .map_err(|e| classify_rpc_error("staking.claimRewards", e.to_string()))?;
        pending
            .get_receipt()
            .await
            .map_err(|e| classify_rpc_error("staking.claimRewards.receipt", e.to_string()))
    }

    pub async fn send_erc20_approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TransactionReceipt, ChainError> {
        let erc20 = Erc20::new(token, self.provider.clone());
        let pending = erc20
            .approve(spender, amount)
            .send()
            .await
            .map_err(|e| classify_rpc_error("erc20.approve", e.to_string()))?;
        pending
            .get_receipt()
            .await
            .map_err(|e| classify_rpc_error("erc20.approve.receipt", e.to_string()))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_routes_revert_before_rate_limit() {
        let err = classify_rpc_error("ctx", "execution reverted: !pending".to_string());
        assert!(matches!(err, ChainError::Reverted(_)));
        let err = classify_rpc_error("ctx", "429 Too Many Requests".to_string());
        assert!(matches!(err, ChainError::RateLimited(_)));
        let err = classify_rpc_error("ctx", "invalid params".to_string());
        assert!(matches!(err, ChainError::InvalidArgs(_)));
        let err = classify_rpc_error("ctx", "connection reset by peer".to_string());
        assert!(matches!(err, ChainError::Unavailable(_)));
    }

    #[tokio::test]
    async fn map_bounded_preserves_input_order() {
        let out = map_bounded(vec![3u64, 1, 2], 2, |v| async move {
            tokio::time::sleep(std::time::Duration::from_millis(v * 5)).await;
            Ok::<u64, ChainError>(v * 10)
        })
        .await;
        let values: Vec<u64> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![30, 10, 20]);
    }
}
