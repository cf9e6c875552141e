//! Snapshot assembly.
//!
//! The full refresh gathers every sub-fetch with per-task fallback: one
//! failed read degrades its field to `None` and never aborts the snapshot.
//! The pricing-only path re-reads just the ETH price and per-endpoint gas
//! config so a single price tick does not cost a full refresh.

use super::snapshot::{
    format_usd, AgentView, AppSnapshot, EndpointView, RequestSummary, StakingView,
    SubscriptionView,
};
use super::StateCache;
use crate::broadcast::{now_ms, EventKind};
use crate::chain::adapter::map_bounded;
use crate::chain::bindings::Hub;
use crate::chain::types::{
    Endpoint, EndpointPricing, PricingSnapshot, RequestStatus, Subscription,
};
use crate::error::ChainError;
use alloy::primitives::{Address, B256};
use alloy::providers::Provider;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

const ENDPOINT_FETCH_CONCURRENCY: usize = 10;
const OWNER_STATS_CONCURRENCY: usize = 5;
const SUBSCRIPTION_FETCH_CONCURRENCY: usize = 5;
const HISTORY_CHUNK_CONCURRENCY: usize = 5;
const RECENT_REQUESTS_LIMIT: usize = 100;

async fn or_none<T, E, F>(label: &'static str, fut: F) -> Option<T>
where
    E: std::fmt::Display,
    F: Future<Output = std::result::Result<T, E>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(label, %err, "snapshot sub-fetch degraded");
            None
        }
    }
}

struct HistoryScan {
    fulfillment_counts: HashMap<B256, u64>,
    recent: Vec<RequestSummary>,
    terminal: Vec<(B256, RequestStatus)>,
}

impl<P: Provider + Clone + Send + Sync + 'static> StateCache<P> {
    pub(super) async fn refresh_full(&self) -> Result<(), ChainError> {
        let head = self.adapter.block_number().await?;
        let agent = self.adapter.agent;
        let staking_configured = self.adapter.staking.is_some();

        let (hub_stats, keepalive_stats, eth_price, agent_stats, hub_balance) = tokio::join!(
            or_none("hub_stats", self.adapter.get_hub_stats()),
            or_none("keepalive_stats", self.adapter.get_keepalive_stats()),
            or_none("eth_price", self.adapter.get_eth_price()),
            or_none("agent_stats", self.adapter.get_agent_stats(agent)),
            or_none("hub_balance", async {
                let hub = Hub::new(self.adapter.hub, self.adapter.provider().clone());
                hub.getBalance(agent)
                    .call()
                    .await
                    .map(|out| u128::try_from(out.balance).unwrap_or(u128::MAX))
            }),
        );

        let (stake, pending_rewards, reputation, eligible, total_staked) = if staking_configured {
            tokio::join!(
                or_none("stake_info", self.adapter.get_stake_info(agent)),
                or_none("pending_rewards", self.adapter.pending_rewards(agent)),
                or_none("reputation", self.adapter.get_reputation(agent)),
                or_none("eligible", self.adapter.is_eligible_agent(agent)),
                or_none("total_staked", self.adapter.total_staked()),
            )
        } else {
            (None, None, None, None, None)
        };

        let history = self.scan_history(head).await;

        let endpoint_views: Vec<EndpointView> = match self.fetch_endpoints().await {
            Ok(endpoints) => {
                let owner_names = self.resolve_owner_names(&endpoints).await;
                let owner_stats = self.resolve_owner_stats(&endpoints).await;
                endpoints
                    .iter()
                    .map(|endpoint| {
                        let base_cost_units =
                            u128::try_from(endpoint.base_cost_units).unwrap_or(u128::MAX);
                        EndpointView {
                            id: endpoint.id,
                            url: endpoint.url.clone(),
                            input_format: endpoint.input_format.clone(),
                            output_format: endpoint.output_format.clone(),
                            base_cost_units,
                            base_cost_usd: format_usd(base_cost_units),
                            estimated_gas_cost_wei: u128::try_from(endpoint.estimated_gas_cost_wei)
                                .unwrap_or(u128::MAX),
                            callback_gas_limit: endpoint.callback_gas_limit,
                            owner: endpoint.owner,
                            owner_name: owner_names.get(&endpoint.owner).cloned().flatten(),
                            owner_stats: owner_stats.get(&endpoint.owner).copied().flatten(),
                            active: endpoint.active,
                            registered_at: endpoint.registered_at,
                            fulfillment_count: history
                                .fulfillment_counts
                                .get(&endpoint.id)
                                .copied()
                                .unwrap_or(0),
                        }
                    })
                    .collect()
            }
            Err(err) => {
                // A failed enumeration never removes endpoints: carry the
                // previous snapshot's views forward.
                tracing::debug!(%err, "endpoint enumeration failed; carrying previous views");
                self.snapshot()
                    .await
                    .map(|previous| previous.endpoints.clone())
                    .unwrap_or_default()
            }
        };

        let subscription_views: Vec<SubscriptionView> = match self.fetch_subscriptions().await {
            Ok(subscriptions) => subscriptions
                .iter()
                .map(SubscriptionView::from_subscription)
                .collect(),
            Err(err) => {
                tracing::debug!(%err, "subscription enumeration failed; carrying previous views");
                self.snapshot()
                    .await
                    .map(|previous| previous.subscriptions.clone())
                    .unwrap_or_default()
            }
        };

        let pricing = PricingSnapshot {
            eth_price_units: eth_price.unwrap_or(0),
            endpoints: endpoint_views
                .iter()
                .map(|view| EndpointPricing {
                    endpoint_id: view.id,
                    estimated_gas_cost_wei: view.estimated_gas_cost_wei,
                    base_cost_units: view.base_cost_units,
                })
                .collect(),
        };

        let snapshot = AppSnapshot {
            built_at_ms: now_ms(),
            block_number: head,
            hub: hub_stats,
            keepalive: keepalive_stats,
            staking: StakingView {
                total_staked_units: total_staked,
            },
            agent: AgentView {
                address: agent,
                stats: agent_stats,
                stake,
                pending_rewards_units: pending_rewards,
                reputation,
                eligible,
                hub_balance_units: hub_balance,
            },
            endpoints: endpoint_views,
            subscriptions: subscription_views,
            pricing,
            recent_requests: history.recent,
        };

        let payload = serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null);
        self.swap_in(snapshot).await;
        self.broadcaster.emit(EventKind::AppState, None, None, payload);
        self.broadcaster.reconcile_terminal(&history.terminal);
        tracing::debug!(block = head, "snapshot refreshed");
        Ok(())
    }

    /// Config-change path: ETH price plus per-endpoint gas config only.
    /// Clients recompute total costs locally from this payload.
    pub(super) async fn refresh_pricing(&self) {
        let Some(previous) = self.snapshot().await else {
            // Nothing to delta against yet; the probe loop will build the
            // first full snapshot shortly.
            return;
        };

        let eth_price = match self.adapter.get_eth_price().await {
            Ok(price) => price,
            Err(err) => {
                tracing::warn!(%err, "pricing refresh: eth price unavailable; skipping");
                return;
            }
        };

        let ids: Vec<B256> = previous.endpoints.iter().map(|view| view.id).collect();
        let adapter = Arc::clone(&self.adapter);
        let prices = map_bounded(ids.clone(), ENDPOINT_FETCH_CONCURRENCY, move |id| {
            let adapter = Arc::clone(&adapter);
            async move { adapter.get_endpoint_price(id).await }
        })
        .await;

        let mut endpoints = Vec::with_capacity(ids.len());
        for (id, price) in ids.into_iter().zip(prices) {
            match price {
                Ok((estimated_gas_cost_wei, base_cost_units)) => endpoints.push(EndpointPricing {
                    endpoint_id: id,
                    estimated_gas_cost_wei,
                    base_cost_units,
                }),
                Err(err) => {
                    tracing::debug!(%id, %err, "endpoint price fetch degraded; keeping previous");
                    if let Some(prev) = previous
                        .pricing
                        .endpoints
                        .iter()
                        .find(|p| p.endpoint_id == id)
                    {
                        endpoints.push(prev.clone());
                    }
                }
            }
        }

        let pricing = PricingSnapshot {
            eth_price_units: eth_price,
            endpoints,
        };
        let payload = serde_json::to_value(&pricing).unwrap_or(serde_json::Value::Null);

        // Swap a snapshot with updated pricing but the original build time:
        // cache age tracks full refreshes only.
        let mut updated = (*previous).clone();
        updated.pricing = pricing;
        self.swap_in(updated).await;

        self.broadcaster
            .emit(EventKind::PricingUpdate, None, None, payload);
    }

    async fn fetch_endpoints(&self) -> Result<Vec<Endpoint>, ChainError> {
        let count = self.adapter.get_endpoint_count().await?;
        let indices: Vec<u64> = (0..count).collect();
        let adapter = Arc::clone(&self.adapter);
        let ids = map_bounded(indices, ENDPOINT_FETCH_CONCURRENCY, move |index| {
            let adapter = Arc::clone(&adapter);
            async move { adapter.endpoint_id_at(index).await }
        })
        .await;

        let mut resolved_ids = Vec::with_capacity(ids.len());
        for id in ids {
            resolved_ids.push(id?);
        }

        let adapter = Arc::clone(&self.adapter);
        let endpoints = map_bounded(resolved_ids, ENDPOINT_FETCH_CONCURRENCY, move |id| {
            let adapter = Arc::clone(&adapter);
            async move { adapter.get_endpoint(id).await }
        })
        .await;

        // A single failed endpoint read drops that entry, not the list.
        Ok(endpoints.into_iter().flatten().collect())
    }

    async fn fetch_subscriptions(&self) -> Result<Vec<Subscription>, ChainError> {
        let count = self.adapter.get_subscription_count().await?;
        let indices: Vec<u64> = (0..count).collect();
        let adapter = Arc::clone(&self.adapter);
        let ids = map_bounded(indices, SUBSCRIPTION_FETCH_CONCURRENCY, move |index| {
            let adapter = Arc::clone(&adapter);
            async move { adapter.subscription_id_at(index).await }
        })
        .await;

        let mut resolved_ids = Vec::with_capacity(ids.len());
        for id in ids {
            resolved_ids.push(id?);
        }

        let adapter = Arc::clone(&self.adapter);
        let subscriptions = map_bounded(resolved_ids, SUBSCRIPTION_FETCH_CONCURRENCY, move |id| {
            let adapter = Arc::clone(&adapter);
            async move { adapter.get_subscription(id).await }
        })
        .await;

        Ok(subscriptions.into_iter().flatten().collect())
    }

    async fn resolve_owner_names(
        &self,
        endpoints: &[Endpoint],
    ) -> HashMap<Address, Option<String>> {
        let owners: Vec<Address> = {
            let unique: HashSet<Address> = endpoints.iter().map(|e| e.owner).collect();
            unique.into_iter().collect()
        };
        let names = self.identity.resolve_many(owners.clone()).await;
        owners.into_iter().zip(names).collect()
    }

    async fn resolve_owner_stats(
        &self,
        endpoints: &[Endpoint],
    ) -> HashMap<Address, Option<crate::chain::types::AgentStats>> {
        let owners: Vec<Address> = {
            let unique: HashSet<Address> = endpoints.iter().map(|e| e.owner).collect();
            unique.into_iter().collect()
        };
        let adapter = Arc::clone(&self.adapter);
        let stats = map_bounded(owners.clone(), OWNER_STATS_CONCURRENCY, move |owner| {
            let adapter = Arc::clone(&adapter);
            async move { adapter.get_agent_stats(owner).await }
        })
        .await;
        owners
            .into_iter()
            .zip(stats.into_iter().map(|result| result.ok()))
            .collect()
    }

    /// Wide-window scan over recent request events: per-endpoint fulfillment
    /// counts, the recent-request list, and the terminal statuses used to
    /// reconcile the broadcast ring buffer.
    async fn scan_history(&self, head: u64) -> HistoryScan {
        let window = self.cfg.history_scan_blocks.min(head);
        let from = head.saturating_sub(window).max(1);
        let ranges = crate::watcher::chunk_ranges(from, head, self.cfg.chunk_blocks);

        let hub = self.adapter.hub;
        let topics = vec![
            Hub::RequestCreated::SIGNATURE_HASH,
            Hub::RequestFulfilled::SIGNATURE_HASH,
            Hub::RequestCancelled::SIGNATURE_HASH,
        ];
        let adapter = Arc::clone(&self.adapter);
        let chunks = map_bounded(ranges, HISTORY_CHUNK_CONCURRENCY, move |(from, to)| {
            let adapter = Arc::clone(&adapter);
            let topics = topics.clone();
            async move { adapter.get_logs(hub, topics, from, to).await }
        })
        .await;

        let mut logs: Vec<Log> = Vec::new();
        for chunk in chunks {
            match chunk {
                Ok(batch) => logs.extend(batch),
                Err(err) => {
                    tracing::debug!(%err, "history chunk degraded; counts may undercount");
                }
            }
        }

        let mut fulfillment_counts: HashMap<B256, u64> = HashMap::new();
        let mut fulfilled: HashSet<B256> = HashSet::new();
        let mut cancelled: HashSet<B256> = HashSet::new();
        let mut created: Vec<RequestSummary> = Vec::new();

        for log in &logs {
            if let Ok(decoded) = log.log_decode::<Hub::RequestFulfilled>() {
                let data = decoded.inner.data;
                *fulfillment_counts.entry(data.endpointId).or_insert(0) += 1;
                fulfilled.insert(data.requestId);
            } else if let Ok(decoded) = log.log_decode::<Hub::RequestCancelled>() {
                cancelled.insert(decoded.inner.data.requestId);
            } else if let Ok(decoded) = log.log_decode::<Hub::RequestCreated>() {
                let data = decoded.inner.data;
                let total_cost_units = u128::try_from(data.totalCost).unwrap_or(u128::MAX);
                created.push(RequestSummary {
                    id: data.requestId,
                    endpoint_id: data.endpointId,
                    requester: data.requester,
                    status: RequestStatus::Pending,
                    total_cost_units,
                    total_cost_usd: format_usd(total_cost_units),
                    created_at: data.createdAt,
                    block: log.block_number.unwrap_or(0),
                });
            }
        }

        for summary in created.iter_mut() {
            summary.status = if fulfilled.contains(&summary.id) {
                RequestStatus::Fulfilled
            } else if cancelled.contains(&summary.id) {
                RequestStatus::Cancelled
            } else {
                RequestStatus::Pending
            };
        }
        created.sort_by_key(|summary| summary.block);
        if created.len() > RECENT_REQUESTS_LIMIT {
            created.drain(0..created.len() - RECENT_REQUESTS_LIMIT);
        }

        let terminal: Vec<(B256, RequestStatus)> = fulfilled
            .iter()
            .map(|id| (*id, RequestStatus::Fulfilled))
            .chain(cancelled.iter().map(|id| (*id, RequestStatus::Cancelled)))
            .collect();

        HistoryScan {
            fulfillment_counts,
            recent: created,
            terminal,
        }
    }
}
