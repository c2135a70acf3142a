//! whisk-metrics — observability for the dispatch core.
//!
//! # Architecture
//!
//! ```text
//! DispatchMetrics
//!   ├── record_*() ← called by the gateway on submit/completion/timeout
//!   └── snapshot() → DispatchCounters
//!
//! Prometheus exposition
//!   └── render_prometheus(counters, invokers) → text/plain for /metrics
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{DispatchCounters, DispatchMetrics};
pub use prometheus::render_prometheus;
