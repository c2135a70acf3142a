//! whisk-balancer — activation dispatch for the serverless controller.
//!
//! # Architecture
//!
//! ```text
//! DispatchGateway
//!   ├── HashingScheduler   (consistent hash + coprime-step probing)
//!   │     ├── InvokerRegistry   (versioned fleet snapshots, pool split)
//!   │     └── CapacityLedger    (per-invoker memory/slot reservations)
//!   ├── ActivationTracker  (in-flight table, completions, deadlines)
//!   └── MessageProducer    (bus: invoker{N}, completed, health)
//! ```
//!
//! An activation holds exactly one reservation from the moment the
//! scheduler picks its invoker until the tracker resolves it, whether by
//! completion, timeout, or a failed publish.

pub mod bus;
pub mod error;
pub mod gateway;
pub mod invokers;
pub mod ledger;
pub mod load_balancer;
pub mod tracker;

pub use bus::{BusError, InMemoryBus, MessageProducer};
pub use error::{LoadBalancerError, LoadBalancerResult};
pub use gateway::{ActivationRequest, DispatchGateway, SubmitOutcome};
pub use invokers::{InvokerRegistry, InvokerSnapshot};
pub use ledger::CapacityLedger;
pub use load_balancer::HashingScheduler;
pub use tracker::{Activation, ActivationTracker, Resolution};
