//! Periodic maintenance: stale sweeping, fee flushing, reward claiming,
//! and the allowance rebalance hook.
//!
//! Four independent tickers. Each tick is fire-and-log; a failing pass
//! never stops its own loop, let alone the others. Every ticker reschedules
//! only after its body completes, so a slow RPC cannot stack bodies.

use crate::broadcast::{Broadcaster, EventKind};
use crate::chain::adapter::map_bounded;
use crate::chain::bindings::Hub;
use crate::chain::types::RequestStatus;
use crate::chain::ChainAdapter;
use crate::cursor::CursorStore;
use crate::error::ChainError;
use crate::inflight::InflightSet;
use crate::sender::TxSender;
use crate::watcher;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::sol_types::SolEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SWEEPER_CURSOR_LABEL: &str = "hub-sweeper";

const REQUEST_DETAIL_CONCURRENCY: usize = 10;

/// Re-approve when the allowance drops below this (1,000 USDC).
const ALLOWANCE_FLOOR_UNITS: u64 = 1_000_000_000;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub sweeper_interval: Duration,
    pub buyback_interval: Duration,
    pub rewards_interval: Duration,
    pub hook_interval: Duration,
    pub stale_after: Duration,
    pub chunk_blocks: u64,
    pub lookback_blocks: u64,
}

pub struct Maintenance<P> {
    adapter: Arc<ChainAdapter<P>>,
    sender: Arc<TxSender>,
    /// The router's request in-flight set: a request being fulfilled is
    /// never concurrently cancelled by the sweeper.
    request_inflight: Arc<InflightSet>,
    broadcaster: Arc<Broadcaster>,
    cursors: Arc<CursorStore>,
    usdc: Option<Address>,
    cfg: MaintenanceConfig,
    stop: Arc<AtomicBool>,
}

impl<P: Provider + Clone + Send + Sync + 'static> Maintenance<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<ChainAdapter<P>>,
        sender: Arc<TxSender>,
        request_inflight: Arc<InflightSet>,
        broadcaster: Arc<Broadcaster>,
        cursors: Arc<CursorStore>,
        usdc: Option<Address>,
        cfg: MaintenanceConfig,
        stop: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            sender,
            request_inflight,
            broadcaster,
            cursors,
            usdc,
            cfg,
            stop,
        })
    }

    pub fn spawn_all(self: &Arc<Self>) {
        let loops = [
            (
                "sweeper",
                self.cfg.sweeper_interval,
                false,
                LoopKind::Sweeper,
            ),
            (
                "buyback-flush",
                self.cfg.buyback_interval,
                false,
                LoopKind::Buyback,
            ),
            (
                "reward-distribution",
                self.cfg.rewards_interval,
                false,
                LoopKind::Rewards,
            ),
            ("hook-manager", self.cfg.hook_interval, true, LoopKind::Hooks),
        ];
        for (name, interval, run_at_startup, kind) in loops {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_loop(name, interval, run_at_startup, kind).await });
        }
    }

    async fn run_loop(
        self: Arc<Self>,
        name: &'static str,
        interval: Duration,
        run_at_startup: bool,
        kind: LoopKind,
    ) {
        tracing::info!(name, interval_ms = interval.as_millis() as u64, "maintenance loop started");
        let mut first = true;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!(name, "maintenance loop stopped");
                return;
            }
            if !(first && run_at_startup) {
                tokio::time::sleep(interval).await;
                if self.stop.load(Ordering::Relaxed) {
                    return;
                }
            }
            first = false;
            let result = match kind {
                LoopKind::Sweeper => self.sweep_stale().await,
                LoopKind::Buyback => self.flush_buyback().await,
                LoopKind::Rewards => self.distribute_rewards().await,
                LoopKind::Hooks => self.rebalance_allowances().await,
            };
            if let Err(err) = result {
                tracing::warn!(name, %err, "maintenance tick failed; next tick proceeds");
            }
        }
    }

    /// Cancel PENDING requests older than the staleness bound. The canceller
    /// earns a fractional reward per contract rules.
    async fn sweep_stale(&self) -> Result<(), ChainError> {
        let logs = watcher::collect_labelled(
            &self.adapter,
            &self.cursors,
            SWEEPER_CURSOR_LABEL,
            self.adapter.hub,
            vec![Hub::RequestCreated::SIGNATURE_HASH],
            self.cfg.chunk_blocks,
            self.cfg.lookback_blocks,
        )
        .await?;

        let ids: Vec<B256> = logs
            .iter()
            .filter_map(|log| {
                log.log_decode::<Hub::RequestCreated>()
                    .ok()
                    .map(|decoded| decoded.inner.data.requestId)
            })
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let adapter = Arc::clone(&self.adapter);
        let requests = map_bounded(ids, REQUEST_DETAIL_CONCURRENCY, move |id| {
            let adapter = Arc::clone(&adapter);
            async move { adapter.get_request(id).await }
        })
        .await;

        let stale_bound = self.cfg.stale_after.as_secs();
        let now = now_secs();
        let mut swept = 0usize;
        for request in requests.into_iter().flatten() {
            if request.status != RequestStatus::Pending || request.age_secs(now) <= stale_bound {
                continue;
            }
            let Some(_guard) = self.request_inflight.try_acquire(request.id) else {
                continue;
            };
            let id = request.id;
            let calldata = self.adapter.cancel_request_calldata(id);
            if let Err(err) = self.adapter.estimate_gas(self.adapter.hub, calldata).await {
                tracing::debug!(%id, %err, "sweep cancel simulation failed; dropping");
                continue;
            }
            let adapter = Arc::clone(&self.adapter);
            match self
                .sender
                .submit("sweep_cancel", move || async move {
                    adapter.send_cancel_request(id).await
                })
                .await
            {
                Ok(outcome) => {
                    swept += 1;
                    self.broadcaster.emit(
                        EventKind::RequestCancelled,
                        Some(id),
                        Some(request.endpoint_id),
                        serde_json::json!({ "reason": "swept", "txHash": outcome.tx_hash }),
                    );
                }
                Err(err) => {
                    tracing::debug!(%id, %err, "sweep cancel failed; re-observed next pass");
                }
            }
        }
        if swept > 0 {
            tracing::info!(swept, "sweeper pass cancelled stale requests");
        }
        Ok(())
    }

    async fn flush_buyback(&self) -> Result<(), ChainError> {
        let stats = self.adapter.get_hub_stats().await?;
        if stats.pending_protocol_fees_units == 0 {
            return Ok(());
        }
        let adapter = Arc::clone(&self.adapter);
        let outcome = self
            .sender
            .submit("flush_protocol_fees", move || async move {
                adapter.send_flush_protocol_fees().await
            })
            .await?;
        tracing::info!(
            tx_hash = %outcome.tx_hash,
            fees_units = stats.pending_protocol_fees_units,
            "protocol fees flushed to buyback"
        );
        Ok(())
    }

    async fn distribute_rewards(&self) -> Result<(), ChainError> {
        if self.adapter.staking.is_none() {
            return Ok(());
        }
        let pending = self.adapter.pending_rewards(self.adapter.agent).await?;
        if pending == 0 {
            return Ok(());
        }
        let adapter = Arc::clone(&self.adapter);
        let outcome = self
            .sender
            .submit("claim_rewards", move || async move {
                adapter.send_claim_rewards().await
            })
            .await?;
        tracing::info!(tx_hash = %outcome.tx_hash, pending_units = pending, "rewards claimed");
        Ok(())
    }

    /// Allowance rebalance: keep the hub and keep-alive contracts approved
    /// to pull USDC from the agent so deposits never fail mid-flow.
    async fn rebalance_allowances(&self) -> Result<(), ChainError> {
        let Some(usdc) = self.usdc else {
            return Ok(());
        };
        if !self.sender.writes_enabled() {
            return Ok(());
        }
        for spender in [self.adapter.hub, self.adapter.keepalive] {
            let allowance = self
                .adapter
                .erc20_allowance(usdc, self.adapter.agent, spender)
                .await?;
            if allowance >= U256::from(ALLOWANCE_FLOOR_UNITS) {
                continue;
            }
            let adapter = Arc::clone(&self.adapter);
            let outcome = self
                .sender
                .submit("usdc_approve", move || async move {
                    adapter.send_erc20_approve(usdc, spender, U256::MAX).await
                })
                .await?;
            tracing::info!(%spender, tx_hash = %outcome.tx_hash, "usdc allowance topped up");
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum LoopKind {
    Sweeper,
    Buyback,
    Rewards,
    Hooks,
}
