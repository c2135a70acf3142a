//! whisk-api — operational HTTP surface of the controller.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/invokers` | List invokers with pool, health, and capacity |
//! | DELETE | `/api/v1/invokers/{id}` | Take an invoker out of rotation |
//! | GET | `/api/v1/activations` | In-flight and dispatch counters |
//! | POST | `/api/v1/namespaces/{ns}/actions/{name}` | Invoke an action (`?blocking=true&timeout_ms=N`) |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use whisk_balancer::DispatchGateway;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<DispatchGateway>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(gateway: Arc<DispatchGateway>) -> Router {
    let state = ApiState { gateway };

    let api_routes = Router::new()
        .route("/invokers", get(handlers::list_invokers))
        .route("/invokers/{id}", delete(handlers::remove_invoker))
        .route("/activations", get(handlers::activation_stats))
        .route(
            "/namespaces/{namespace}/actions/{name}",
            post(handlers::invoke_action),
        )
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
