//! Load balancer error types.

use thiserror::Error;

use whisk_core::{ActionPool, FullyQualifiedName};

/// Errors surfaced to callers of the dispatch gateway.
///
/// Reservation races and duplicate completions are handled internally
/// and never show up here.
#[derive(Debug, Error)]
pub enum LoadBalancerError {
    #[error("action not found: {0}")]
    ActionNotFound(FullyQualifiedName),

    #[error("no {pool} invoker available for {action} ({memory_mb} MB)")]
    Overload {
        action: FullyQualifiedName,
        pool: ActionPool,
        memory_mb: u64,
    },

    #[error("failed to dispatch activation: {0}")]
    DispatchFailure(#[from] crate::bus::BusError),

    #[error("entity store error: {0}")]
    Entity(#[from] whisk_entity::EntityError),
}

pub type LoadBalancerResult<T> = Result<T, LoadBalancerError>;
