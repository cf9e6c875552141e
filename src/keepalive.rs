//! Keep-alive driver: recurring subscription fulfillment.
//!
//! Poll-and-fulfill enumerates ready subscriptions on a fixed cadence and
//! attempts each through the shared sender. The id list is cached with a
//! TTL and invalidated after any successful fulfill; fetches and readiness
//! checks run in bounded batches to limit RPC burst, with a local due-check
//! weeding out subscriptions that cannot be ready before any `isReady` RPC
//! is spent. The next poll is scheduled only after the current iteration
//! completes, so overlapping bodies are impossible.

use crate::broadcast::{Broadcaster, EventKind};
use crate::chain::adapter::map_bounded;
use crate::chain::bindings::KeepAlive;
use crate::chain::ChainAdapter;
use crate::error::ChainError;
use crate::gate::{self, GateVerdict};
use crate::inflight::InflightSet;
use crate::sender::TxSender;
use alloy::primitives::B256;
use alloy::providers::Provider;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Bounded concurrency for id and readiness batches.
const SUBSCRIPTION_FETCH_CONCURRENCY: usize = 5;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    pub poll_interval: Duration,
    pub id_cache_ttl: Duration,
    pub gas_buffer_pct: u64,
    pub loss_tolerance_units: u64,
}

struct IdCache {
    ids: Vec<B256>,
    fetched_at: Option<Instant>,
}

pub struct KeepAliveDriver<P> {
    adapter: Arc<ChainAdapter<P>>,
    sender: Arc<TxSender>,
    inflight: Arc<InflightSet>,
    broadcaster: Arc<Broadcaster>,
    id_cache: Mutex<IdCache>,
    cfg: KeepAliveConfig,
    stop: Arc<AtomicBool>,
}

impl<P: Provider + Clone + Send + Sync + 'static> KeepAliveDriver<P> {
    pub fn new(
        adapter: Arc<ChainAdapter<P>>,
        sender: Arc<TxSender>,
        broadcaster: Arc<Broadcaster>,
        cfg: KeepAliveConfig,
        stop: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            sender,
            inflight: InflightSet::new("keepalive"),
            broadcaster,
            id_cache: Mutex::new(IdCache {
                ids: Vec::new(),
                fetched_at: None,
            }),
            cfg,
            stop,
        })
    }

    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            poll_ms = self.cfg.poll_interval.as_millis() as u64,
            "keep-alive driver started"
        );
        loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("keep-alive driver stopped");
                return;
            }
            if let Err(err) = self.poll_cycle().await {
                tracing::warn!(%err, "keep-alive cycle failed; retrying next tick");
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
    }

    /// Cached subscription id enumeration. Within the TTL two back-to-back
    /// calls return the same list in the same order.
    pub async fn subscription_ids(&self) -> Result<Vec<B256>, ChainError> {
        let mut cache = self.id_cache.lock().await;
        if let Some(fetched_at) = cache.fetched_at {
            if fetched_at.elapsed() < self.cfg.id_cache_ttl {
                return Ok(cache.ids.clone());
            }
        }

        let count = self.adapter.get_subscription_count().await?;
        let indices: Vec<u64> = (0..count).collect();
        let adapter = Arc::clone(&self.adapter);
        let results = map_bounded(indices, SUBSCRIPTION_FETCH_CONCURRENCY, move |index| {
            let adapter = Arc::clone(&adapter);
            async move { adapter.subscription_id_at(index).await }
        })
        .await;

        let mut ids = Vec::with_capacity(results.len());
        for result in results {
            ids.push(result?);
        }
        cache.ids = ids.clone();
        cache.fetched_at = Some(Instant::now());
        Ok(ids)
    }

    async fn invalidate_ids(&self) {
        let mut cache = self.id_cache.lock().await;
        cache.fetched_at = None;
    }

    async fn poll_cycle(&self) -> Result<(), ChainError> {
        let ids = self.subscription_ids().await?;
        if ids.is_empty() {
            return Ok(());
        }

        // Cheap local pre-filter: inactive, exhausted, or mid-interval
        // subscriptions cannot be ready, so they never reach the isReady
        // batch. The consumer's external predicate is only visible
        // on-chain, which is why isReady stays the authoritative check.
        let adapter = Arc::clone(&self.adapter);
        let subscriptions = map_bounded(ids, SUBSCRIPTION_FETCH_CONCURRENCY, move |id| {
            let adapter = Arc::clone(&adapter);
            async move { adapter.get_subscription(id).await }
        })
        .await;

        let now = now_secs();
        let mut candidates = Vec::new();
        for subscription in subscriptions {
            match subscription {
                Ok(subscription) => {
                    if subscription.is_due(now) {
                        candidates.push(subscription.id);
                    }
                }
                Err(err) => {
                    tracing::debug!(%err, "subscription fetch failed; skipping this cycle");
                }
            }
        }
        if candidates.is_empty() {
            return Ok(());
        }

        let adapter = Arc::clone(&self.adapter);
        let readiness = map_bounded(
            candidates.clone(),
            SUBSCRIPTION_FETCH_CONCURRENCY,
            move |id| {
                let adapter = Arc::clone(&adapter);
                async move { adapter.is_subscription_ready(id).await }
            },
        )
        .await;

        for (id, ready) in candidates.into_iter().zip(readiness) {
            match ready {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::debug!(%id, %err, "readiness check failed; skipping this cycle");
                    continue;
                }
            }
            let Some(_guard) = self.inflight.try_acquire(id) else {
                continue;
            };
            // One bad subscription must not skip the others.
            if let Err(err) = self.fulfill_one(id).await {
                tracing::warn!(%id, %err, "subscription fulfill failed");
            }
        }
        Ok(())
    }

    async fn fulfill_one(&self, id: B256) -> Result<(), ChainError> {
        // Race guard: one fresh isReady read inside the fulfill step.
        if !self.adapter.is_subscription_ready(id).await? {
            return Ok(());
        }

        let subscription = self.adapter.get_subscription(id).await?;
        let (fee_units, gas_reimbursement_units) = self.adapter.get_subscription_cost(id).await?;
        let reimbursement = fee_units.saturating_add(gas_reimbursement_units);

        let calldata = self.adapter.keepalive_fulfill_calldata(id);
        let report = gate::check(
            &self.adapter,
            self.adapter.keepalive,
            calldata,
            reimbursement,
            self.cfg.gas_buffer_pct,
            self.cfg.loss_tolerance_units,
        )
        .await;

        match report.verdict {
            GateVerdict::Profitable => {}
            GateVerdict::WouldRevert => {
                // Another agent fulfilled between readiness and submission.
                self.broadcaster.emit(
                    EventKind::KeepaliveSkipped,
                    Some(id),
                    None,
                    serde_json::json!({ "reason": "simulation-failed" }),
                );
                return Ok(());
            }
            GateVerdict::Unprofitable => {
                tracing::info!(
                    %id,
                    profit_units = report.profit_units,
                    reimbursement_units = report.reimbursement_units,
                    usdc_cost_units = report.usdc_cost_units,
                    "subscription unprofitable; skipping"
                );
                self.broadcaster.emit(
                    EventKind::KeepaliveSkipped,
                    Some(id),
                    None,
                    serde_json::json!({ "reason": "unprofitable", "profitUnits": report.profit_units }),
                );
                return Ok(());
            }
            GateVerdict::Undecidable => {
                tracing::debug!(%id, "gate undecidable; skipping this cycle");
                return Ok(());
            }
        }

        let adapter = Arc::clone(&self.adapter);
        let gas_limit = report.gas_limit;
        let outcome = self
            .sender
            .submit("keepalive_fulfill", move || async move {
                adapter.send_keepalive_fulfill(id, gas_limit).await
            })
            .await?;

        self.invalidate_ids().await;
        self.broadcaster.emit(
            EventKind::KeepaliveFulfilled,
            Some(id),
            None,
            serde_json::json!({
                "txHash": outcome.tx_hash,
                "block": outcome.block,
                "consumer": subscription.consumer,
                "intervalSecs": subscription.interval_secs,
                "cyclesRemaining": subscription.cycles_remaining().map(|c| c.saturating_sub(1)),
                "feeUnits": fee_units,
                "profitUnits": report.profit_units,
            }),
        );
        Ok(())
    }

    /// Consume subscription lifecycle events from the keep-alive watcher
    /// and surface them to operators.
    pub async fn run_events(self: Arc<Self>, mut events: mpsc::Receiver<Log>) {
        while let Some(log) = events.recv().await {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            if let Ok(decoded) = log.log_decode::<KeepAlive::SubscriptionCreated>() {
                let data = decoded.inner.data;
                self.invalidate_ids().await;
                self.broadcaster.emit(
                    EventKind::KeepaliveSubscriptionCreated,
                    Some(data.subscriptionId),
                    None,
                    serde_json::json!({
                        "consumer": data.consumer,
                        "intervalSecs": data.intervalSecs,
                    }),
                );
            } else if let Ok(decoded) = log.log_decode::<KeepAlive::SubscriptionCancelled>() {
                let data = decoded.inner.data;
                self.invalidate_ids().await;
                self.broadcaster.emit(
                    EventKind::KeepaliveSubscriptionCancelled,
                    Some(data.subscriptionId),
                    None,
                    serde_json::Value::Null,
                );
            } else if let Ok(decoded) = log.log_decode::<KeepAlive::SubscriptionFulfilled>() {
                let data = decoded.inner.data;
                // Fulfillments by other agents still matter to operators.
                if data.agent != self.adapter.agent {
                    self.broadcaster.emit(
                        EventKind::KeepaliveFulfilled,
                        Some(data.subscriptionId),
                        None,
                        serde_json::json!({ "agent": data.agent, "external": true }),
                    );
                }
            }
        }
    }

    /// Topic set for the subscription event watcher.
    pub fn event_topics() -> Vec<B256> {
        vec![
            KeepAlive::SubscriptionCreated::SIGNATURE_HASH,
            KeepAlive::SubscriptionFulfilled::SIGNATURE_HASH,
            KeepAlive::SubscriptionCancelled::SIGNATURE_HASH,
        ]
    }
}
