//! Operator-facing event sink.
//!
//! Structured events fan out over a `tokio::sync::broadcast` channel to
//! downstream push consumers (SSE/websocket bridges live outside this
//! crate). A bounded ring buffer of recent request events seeds late
//! subscribers; terminal on-chain statuses are reconciled into it during
//! cache refreshes so a stale PENDING entry cannot outlive the chain.

use crate::chain::types::RequestStatus;
use alloy::primitives::B256;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

const BROADCAST_CHANNEL_CAPACITY: usize = 1_024;
const DEFAULT_RING_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestCreated,
    RequestRouting,
    RequestTimeout,
    RequestFulfilled,
    RequestCancelled,
    KeepaliveFulfilled,
    KeepaliveSkipped,
    KeepaliveSubscriptionCreated,
    KeepaliveSubscriptionCancelled,
    AppState,
    PricingUpdate,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestCreated => "request_created",
            Self::RequestRouting => "request_routing",
            Self::RequestTimeout => "request_timeout",
            Self::RequestFulfilled => "request_fulfilled",
            Self::RequestCancelled => "request_cancelled",
            Self::KeepaliveFulfilled => "keepalive_fulfilled",
            Self::KeepaliveSkipped => "keepalive_skipped",
            Self::KeepaliveSubscriptionCreated => "keepalive_subscription_created",
            Self::KeepaliveSubscriptionCancelled => "keepalive_subscription_cancelled",
            Self::AppState => "app_state",
            Self::PricingUpdate => "pricing_update",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<B256>,
    pub timestamp_ms: u64,
    pub data: Value,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct Broadcaster {
    tx: broadcast::Sender<AgentEvent>,
    ring: Mutex<VecDeque<AgentEvent>>,
    ring_capacity: usize,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_ring_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_ring_capacity(ring_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            tx,
            ring: Mutex::new(VecDeque::new()),
            ring_capacity: ring_capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    pub fn emit(
        &self,
        kind: EventKind,
        request_id: Option<B256>,
        endpoint_id: Option<B256>,
        data: Value,
    ) {
        let event = AgentEvent {
            kind,
            request_id,
            endpoint_id,
            timestamp_ms: now_ms(),
            data,
        };
        self.remember(&event);
        // A send error just means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    /// Snapshot pushes are not ring-buffered; they would evict the request
    /// history late subscribers actually need.
    fn remember(&self, event: &AgentEvent) {
        if matches!(event.kind, EventKind::AppState | EventKind::PricingUpdate) {
            return;
        }
        if let Ok(mut ring) = self.ring.lock() {
            if ring.len() >= self.ring_capacity {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }
    }

    /// Recent events for seeding a late subscriber, oldest first.
    pub fn recent(&self) -> Vec<AgentEvent> {
        self.ring
            .lock()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Flip stale in-memory `request_created`/`request_routing` entries to
    /// the terminal status the chain now reports.
    pub fn reconcile_terminal(&self, terminal: &[(B256, RequestStatus)]) {
        if terminal.is_empty() {
            return;
        }
        let Ok(mut ring) = self.ring.lock() else {
            return;
        };
        for entry in ring.iter_mut() {
            let Some(request_id) = entry.request_id else {
                continue;
            };
            if !matches!(
                entry.kind,
                EventKind::RequestCreated | EventKind::RequestRouting
            ) {
                continue;
            }
            if let Some((_, status)) = terminal.iter().find(|(id, _)| *id == request_id) {
                entry.kind = match status {
                    RequestStatus::Fulfilled => EventKind::RequestFulfilled,
                    RequestStatus::Cancelled => EventKind::RequestCancelled,
                    RequestStatus::Pending => continue,
                };
                entry.data = serde_json::json!({ "reconciled": true });
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    #[test]
    fn ring_keeps_newest_and_skips_snapshot_pushes() {
        let b = Broadcaster::with_ring_capacity(2);
        b.emit(EventKind::RequestCreated, Some(id(1)), None, Value::Null);
        b.emit(EventKind::AppState, None, None, Value::Null);
        b.emit(EventKind::RequestCreated, Some(id(2)), None, Value::Null);
        b.emit(EventKind::RequestCreated, Some(id(3)), None, Value::Null);

        let recent = b.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, Some(id(2)));
        assert_eq!(recent[1].request_id, Some(id(3)));
    }

    #[test]
    fn subscribers_receive_emitted_events() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.emit(EventKind::RequestRouting, Some(id(9)), Some(id(8)), Value::Null);
        let got = rx.try_recv().unwrap();
        assert_eq!(got.kind, EventKind::RequestRouting);
        assert_eq!(got.request_id, Some(id(9)));
        assert_eq!(got.endpoint_id, Some(id(8)));
    }

    #[test]
    fn reconcile_flips_stale_pending_entries() {
        let b = Broadcaster::new();
        b.emit(EventKind::RequestCreated, Some(id(1)), None, Value::Null);
        b.emit(EventKind::RequestCreated, Some(id(2)), None, Value::Null);

        b.reconcile_terminal(&[
            (id(1), RequestStatus::Fulfilled),
            (id(2), RequestStatus::Cancelled),
        ]);

        let recent = b.recent();
        assert_eq!(recent[0].kind, EventKind::RequestFulfilled);
        assert_eq!(recent[1].kind, EventKind::RequestCancelled);
    }

    #[test]
    fn event_serializes_with_wire_field_names() {
        let event = AgentEvent {
            kind: EventKind::RequestTimeout,
            request_id: Some(id(5)),
            endpoint_id: None,
            timestamp_ms: 42,
            data: serde_json::json!({ "reason": "unknown_endpoint" }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "request_timeout");
        assert_eq!(json["data"]["reason"], "unknown_endpoint");
        assert!(json.get("endpoint_id").is_none());
    }
}
