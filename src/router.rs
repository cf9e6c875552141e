//! Request routing: consume `RequestCreated` events, race to fulfill.
//!
//! Per item: single-flight guard, staleness check, handler classification,
//! upstream call, PENDING re-check (another agent may have won), gate,
//! then a serialized submit. Every exit path releases the in-flight slot
//! because the guard lives on the stack of `process`.

use crate::broadcast::{Broadcaster, EventKind};
use crate::chain::bindings::Hub;
use crate::chain::types::{Request, RequestStatus};
use crate::chain::ChainAdapter;
use crate::cursor::CursorStore;
use crate::error::ChainError;
use crate::gate::{self, GateVerdict};
use crate::handlers::HandlerRegistry;
use crate::inflight::InflightSet;
use crate::sender::TxSender;
use crate::watcher;
use alloy::primitives::{keccak256, B256};
use alloy::providers::Provider;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

pub const FALLBACK_CURSOR_LABEL: &str = "hub-fallback";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub stale_after: Duration,
    pub fallback_poll: Duration,
    pub chunk_blocks: u64,
    pub lookback_blocks: u64,
    pub gas_buffer_pct: u64,
    pub loss_tolerance_units: u64,
}

pub struct FulfillmentRouter<P> {
    adapter: Arc<ChainAdapter<P>>,
    sender: Arc<TxSender>,
    inflight: Arc<InflightSet>,
    registry: Arc<HandlerRegistry>,
    broadcaster: Arc<Broadcaster>,
    cursors: Arc<CursorStore>,
    /// Stable per-process session id, written into every fulfillment.
    session_id: B256,
    cfg: RouterConfig,
    stop: Arc<AtomicBool>,
}

impl<P: Provider + Clone + Send + Sync + 'static> FulfillmentRouter<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<ChainAdapter<P>>,
        sender: Arc<TxSender>,
        inflight: Arc<InflightSet>,
        registry: Arc<HandlerRegistry>,
        broadcaster: Arc<Broadcaster>,
        cursors: Arc<CursorStore>,
        cfg: RouterConfig,
        stop: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let mut session_seed = adapter.agent.to_vec();
        session_seed.extend_from_slice(&now_secs().to_be_bytes());
        Arc::new(Self {
            adapter,
            sender,
            inflight,
            registry,
            broadcaster,
            cursors,
            session_id: keccak256(session_seed),
            cfg,
            stop,
        })
    }

    /// The shared request in-flight set; the sweeper consults it so a
    /// request being fulfilled is never concurrently cancelled by us.
    pub fn inflight(&self) -> Arc<InflightSet> {
        Arc::clone(&self.inflight)
    }

    /// Topic set for the hub request watcher.
    pub fn event_topics() -> Vec<B256> {
        vec![
            Hub::RequestCreated::SIGNATURE_HASH,
            Hub::RequestFulfilled::SIGNATURE_HASH,
            Hub::RequestCancelled::SIGNATURE_HASH,
            Hub::CallbackExecuted::SIGNATURE_HASH,
        ]
    }

    /// Consume decoded watcher logs until the channel closes. New requests
    /// enter the fulfillment path; terminal events from other agents are
    /// surfaced to operators.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Log>) {
        while let Some(log) = events.recv().await {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            if let Ok(decoded) = log.log_decode::<Hub::RequestCreated>() {
                let event = decoded.inner.data;
                self.broadcaster.emit(
                    EventKind::RequestCreated,
                    Some(event.requestId),
                    Some(event.endpointId),
                    serde_json::json!({
                        "requester": event.requester,
                        "totalCost": event.totalCost.to_string(),
                        "createdAt": event.createdAt,
                    }),
                );
                let router = Arc::clone(&self);
                tokio::spawn(async move { router.process(event.requestId).await });
            } else if let Ok(decoded) = log.log_decode::<Hub::RequestFulfilled>() {
                let event = decoded.inner.data;
                if event.agent != self.adapter.agent {
                    self.broadcaster.emit(
                        EventKind::RequestFulfilled,
                        Some(event.requestId),
                        Some(event.endpointId),
                        serde_json::json!({ "agent": event.agent, "external": true }),
                    );
                }
            } else if let Ok(decoded) = log.log_decode::<Hub::RequestCancelled>() {
                let event = decoded.inner.data;
                if event.canceller != self.adapter.agent {
                    self.broadcaster.emit(
                        EventKind::RequestCancelled,
                        Some(event.requestId),
                        None,
                        serde_json::json!({ "canceller": event.canceller, "external": true }),
                    );
                }
            } else if let Ok(decoded) = log.log_decode::<Hub::CallbackExecuted>() {
                let event = decoded.inner.data;
                tracing::debug!(
                    request_id = %event.requestId,
                    success = event.success,
                    "consumer callback executed"
                );
            }
        }
    }

    /// Closes gaps from dropped pushes or watcher restarts: every poll
    /// interval, rescan from the `hub-fallback` cursor and feed any still
    /// PENDING ids through the same single-flight path.
    pub async fn run_fallback(self: Arc<Self>) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            match watcher::collect_labelled(
                &self.adapter,
                &self.cursors,
                FALLBACK_CURSOR_LABEL,
                self.adapter.hub,
                vec![Hub::RequestCreated::SIGNATURE_HASH],
                self.cfg.chunk_blocks,
                self.cfg.lookback_blocks,
            )
            .await
            {
                Ok(logs) => {
                    for log in logs {
                        let Ok(decoded) = log.log_decode::<Hub::RequestCreated>() else {
                            continue;
                        };
                        let id = decoded.inner.data.requestId;
                        if self.inflight.contains(id) {
                            continue;
                        }
                        let router = Arc::clone(&self);
                        tokio::spawn(async move { router.process(id).await });
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "fallback poll failed; retrying next cycle");
                }
            }
            tokio::time::sleep(self.cfg.fallback_poll).await;
        }
    }

    /// One fulfillment attempt. The guard acquired here is the single-flight
    /// invariant: dropped on every path out.
    pub async fn process(self: Arc<Self>, id: B256) {
        let Some(_guard) = self.inflight.try_acquire(id) else {
            return;
        };

        let request = match self.adapter.get_request(id).await {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(%id, %err, "request fetch failed; will re-observe");
                return;
            }
        };
        if request.status.is_terminal() {
            return;
        }

        let age = request.age_secs(now_secs());
        if age > self.cfg.stale_after.as_secs() {
            self.broadcaster.emit(
                EventKind::RequestTimeout,
                Some(id),
                Some(request.endpoint_id),
                serde_json::json!({ "reason": "stale", "ageSecs": age }),
            );
            self.cancel(id, "stale").await;
            return;
        }

        let endpoint = match self.adapter.get_endpoint(request.endpoint_id).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                tracing::debug!(%id, %err, "endpoint fetch failed; will re-observe");
                return;
            }
        };

        let Some(handler) = self.registry.resolve(&endpoint) else {
            self.broadcaster.emit(
                EventKind::RequestTimeout,
                Some(id),
                Some(request.endpoint_id),
                serde_json::json!({ "reason": "unknown_endpoint", "url": endpoint.url }),
            );
            self.cancel(id, "unknown_endpoint").await;
            return;
        };

        self.broadcaster.emit(
            EventKind::RequestRouting,
            Some(id),
            Some(request.endpoint_id),
            serde_json::json!({ "handler": handler.name() }),
        );

        let response = match handler.produce(&request, &endpoint).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%id, handler = handler.name(), %err, "upstream call failed; skipping");
                return;
            }
        };

        self.submit_fulfillment(&request, response).await;
    }

    async fn submit_fulfillment(&self, request: &Request, response: alloy::primitives::Bytes) {
        let id = request.id;

        // Race guard: confirm still PENDING immediately before submission.
        match self.adapter.get_request(id).await {
            Ok(current) if current.status == RequestStatus::Pending => {}
            Ok(current) => {
                tracing::debug!(%id, status = ?current.status, "request no longer pending; dropping");
                return;
            }
            Err(err) => {
                tracing::debug!(%id, %err, "pending re-check failed; skipping");
                return;
            }
        }

        let reimbursement = u128::try_from(
            request
                .markup_units
                .saturating_add(request.gas_reimbursement_units),
        )
        .unwrap_or(u128::MAX);
        let calldata =
            self.adapter
                .fulfill_request_calldata(id, response.clone(), self.session_id);
        let report = gate::check(
            &self.adapter,
            self.adapter.hub,
            calldata,
            reimbursement,
            self.cfg.gas_buffer_pct,
            self.cfg.loss_tolerance_units,
        )
        .await;

        match report.verdict {
            GateVerdict::Profitable => {}
            GateVerdict::WouldRevert => {
                tracing::info!(%id, "fulfillment simulation reverted (race lost); skipping");
                return;
            }
            GateVerdict::Unprofitable => {
                tracing::info!(
                    %id,
                    profit_units = report.profit_units,
                    usdc_cost_units = report.usdc_cost_units,
                    reimbursement_units = report.reimbursement_units,
                    "fulfillment unprofitable; skipping"
                );
                return;
            }
            GateVerdict::Undecidable => {
                tracing::debug!(%id, "gate undecidable; will re-observe");
                return;
            }
        }

        let adapter = Arc::clone(&self.adapter);
        let session_id = self.session_id;
        let gas_limit = report.gas_limit;
        let result = self
            .sender
            .submit("fulfill_request", move || async move {
                adapter
                    .send_fulfill_request(id, response, session_id, gas_limit)
                    .await
            })
            .await;

        match result {
            Ok(outcome) => {
                self.broadcaster.emit(
                    EventKind::RequestFulfilled,
                    Some(id),
                    Some(request.endpoint_id),
                    serde_json::json!({
                        "txHash": outcome.tx_hash,
                        "block": outcome.block,
                        "gasUsed": outcome.gas_used,
                        "profitUnits": report.profit_units,
                    }),
                );
            }
            Err(ChainError::TxReverted { tx_hash, block }) => {
                tracing::warn!(%id, %tx_hash, block, "fulfillment reverted on-chain; not retrying this cycle");
            }
            Err(err) => {
                tracing::warn!(%id, %err, "fulfillment submission failed");
            }
        }
    }

    /// Cancel a request so the consumer's funds are refunded. Reuses the
    /// sender so cancellations line up behind fulfillments.
    async fn cancel(&self, id: B256, reason: &str) {
        let adapter = Arc::clone(&self.adapter);
        let calldata = self.adapter.cancel_request_calldata(id);
        // A cancel that would revert means someone else already closed it.
        if let Err(err) = self.adapter.estimate_gas(self.adapter.hub, calldata).await {
            tracing::debug!(%id, reason, %err, "cancel simulation failed; dropping");
            return;
        }
        let result = self
            .sender
            .submit("cancel_request", move || async move {
                adapter.send_cancel_request(id).await
            })
            .await;
        match result {
            Ok(outcome) => {
                self.broadcaster.emit(
                    EventKind::RequestCancelled,
                    Some(id),
                    None,
                    serde_json::json!({ "reason": reason, "txHash": outcome.tx_hash }),
                );
            }
            Err(err) => {
                tracing::warn!(%id, reason, %err, "cancel submission failed");
            }
        }
    }
}
