//! Connection Engine, Dispatch Table, Connection Registry and Event Queue
//! for sb-broker.
//!
//! - [`connection`] — per-peer state (C4 data model, §3).
//! - [`engine`] — the `Broker` value driving C1→C2→C3 and request/response
//!   correlation (C4 behavior, §4.4).
//! - [`dispatch`] — the four built-in RPC verbs (C5, §4.5).
//! - [`registry`] — the three process-wide lookup maps (C6, §4.6).
//! - [`equeue`] — the per-connection deferred-event FIFO (C7, §4.7).
//! - [`errors`] — the `BrokerError`/`ApiError` taxonomy (§7).

#![deny(unsafe_code)]

pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod equeue;
pub mod errors;
pub mod registry;

pub use connection::{CallInfo, Connection};
pub use dispatch::BrokerApi;
pub use engine::{Broker, DEFAULT_QUEUE_DRAIN_BATCH, MESSAGE_RESPONSE_UNKNOWN};
pub use errors::{ApiError, BrokerError};
pub use registry::Registry;
