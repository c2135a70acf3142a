//! whisk-health — heartbeat-driven invoker health for the dispatch core.
//!
//! Invokers publish a heartbeat every `heartbeat_interval`. The monitor
//! keeps one [`HeartbeatTracker`] per invoker and derives its health from
//! how many intervals have passed since the last heartbeat.
//!
//! # State machine
//!
//! ```text
//!            first heartbeat             N missed          M missed
//!  Offline ─────────────────▶ Healthy ──────────▶ Unhealthy ────────▶ Unresponsive
//!     ▲                         ▲  any fresh heartbeat  │                  │
//!     │                         └───────────────────────┴──────────────────┘
//!     └──────────── administrative removal / shutdown report ──────────────┘
//! ```
//!
//! Every transition bumps the monitor's health version and is broadcast as
//! a [`HealthTransition`]. Consumers (the scheduler's invoker view) compare
//! versions and rebuild lazily instead of reacting to each heartbeat.

pub mod checker;
pub mod monitor;

pub use checker::{HeartbeatTracker, Thresholds};
pub use monitor::{HealthMonitor, HealthTransition};
