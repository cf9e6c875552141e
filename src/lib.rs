//! Off-chain fulfillment agent for the on-chain API hub.
//!
//! The runtime watches the chain for request and subscription work items,
//! races to fulfill the profitable ones, sweeps stale items, and keeps a
//! hot snapshot of protocol state for downstream read consumers. All signed
//! writes funnel through one serialized sender per identity.

pub mod broadcast;
pub mod cache;
pub mod chain;
pub mod config;
pub mod cursor;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod identity;
pub mod inflight;
pub mod keepalive;
pub mod maintenance;
pub mod router;
pub mod sender;
pub mod status;
pub mod watcher;
