//! contextd: a versioned context-document service.
//!
//! Context documents are durable units of conversational/application state.
//! Every mutation is guarded by an optimistic-concurrency compare-and-swap
//! (exactly one writer wins per version generation) and preceded by an
//! append-only history snapshot of the pre-update state. The same
//! orchestration layer is reachable over a synchronous HTTP API and an
//! asynchronous envelope-based message channel, with correlation,
//! idempotency, and trace identifiers preserved end-to-end.

pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod protocol;
pub mod router;
pub mod service;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
