//! REST API handlers.
//!
//! Each handler goes through the `DispatchGateway` and returns JSON,
//! except `/metrics` which returns Prometheus text.

use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::debug;

use whisk_balancer::{ActivationRequest, LoadBalancerError, SubmitOutcome};
use whisk_core::{FullyQualifiedName, InvokerId};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn error_status(err: &LoadBalancerError) -> StatusCode {
    match err {
        LoadBalancerError::ActionNotFound(_) => StatusCode::NOT_FOUND,
        LoadBalancerError::Overload { .. } => StatusCode::SERVICE_UNAVAILABLE,
        LoadBalancerError::DispatchFailure(_) => StatusCode::BAD_GATEWAY,
        LoadBalancerError::Entity(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Invokers ───────────────────────────────────────────────────

/// GET /api/v1/invokers
pub async fn list_invokers(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.gateway.list_invokers())
}

/// DELETE /api/v1/invokers/:id
pub async fn remove_invoker(
    State(state): State<ApiState>,
    Path(id): Path<usize>,
) -> impl IntoResponse {
    if state.gateway.remove_invoker(InvokerId::new(id)) {
        ApiResponse::ok("removed").into_response()
    } else {
        error_response("invoker not found", StatusCode::NOT_FOUND).into_response()
    }
}

// ── Activations ────────────────────────────────────────────────

/// GET /api/v1/activations
pub async fn activation_stats(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({
        "in_flight": state.gateway.tracker().in_flight(),
        "counters": state.gateway.metrics().snapshot(),
    }))
}

/// Query parameters of an invocation.
#[derive(Debug, Default, Deserialize)]
pub struct InvokeParams {
    #[serde(default)]
    pub blocking: bool,
    pub timeout_ms: Option<u64>,
}

/// POST /api/v1/namespaces/:namespace/actions/:name
///
/// The body, if any, is the JSON argument object.
pub async fn invoke_action(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Query(params): Query<InvokeParams>,
    body: Bytes,
) -> impl IntoResponse {
    let payload = if body.is_empty() {
        serde_json::json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                return error_response(&format!("invalid JSON body: {e}"), StatusCode::BAD_REQUEST)
                    .into_response();
            }
        }
    };

    let mut request = ActivationRequest::new(
        namespace.clone(),
        FullyQualifiedName::new(namespace, name),
    )
    .with_payload(payload)
    .blocking(params.blocking);
    if let Some(ms) = params.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }

    match state.gateway.submit(request).await {
        Ok(SubmitOutcome::Accepted(id)) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({ "activation_id": id })),
        )
            .into_response(),
        Ok(SubmitOutcome::Completed(result)) => ApiResponse::ok(result).into_response(),
        Err(e) => {
            debug!(error = %e, "invocation rejected");
            error_response(&e.to_string(), error_status(&e)).into_response()
        }
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = whisk_metrics::render_prometheus(
        &state.gateway.metrics().snapshot(),
        &state.gateway.list_invokers(),
    );
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use whisk_balancer::{DispatchGateway, InMemoryBus};
    use whisk_core::config::LimitsConfig;
    use whisk_core::{
        ActionExec, ActionLimits, ActionMetadata, ControllerConfig, Heartbeat, InvokerCapacity,
        InvokerStatus,
    };
    use whisk_entity::EntityStore;
    use whisk_metrics::DispatchMetrics;

    fn test_state() -> ApiState {
        let store = EntityStore::open_in_memory(LimitsConfig::default()).unwrap();
        store
            .put_action(&ActionMetadata {
                namespace: "guest".to_string(),
                name: "echo".to_string(),
                exec: ActionExec::Managed {
                    kind: "nodejs:20".to_string(),
                },
                limits: ActionLimits::default(),
                updated_at: 1000,
            })
            .unwrap();
        let gateway = DispatchGateway::new(
            &ControllerConfig::default(),
            Arc::new(store),
            Arc::new(InMemoryBus::new()),
            Arc::new(DispatchMetrics::new()),
        );
        ApiState {
            gateway: Arc::new(gateway),
        }
    }

    fn add_invoker(state: &ApiState, ordinal: usize) {
        state.gateway.process_heartbeat(&Heartbeat {
            invoker: InvokerId::new(ordinal),
            capacity: InvokerCapacity::new(2048, 16),
            timestamp_ms: 0,
            status: InvokerStatus::Up,
        });
    }

    fn path(ns: &str, name: &str) -> Path<(String, String)> {
        Path((ns.to_string(), name.to_string()))
    }

    #[tokio::test]
    async fn list_invokers_empty() {
        let state = test_state();
        let resp = list_invokers(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invoke_nonexistent_action() {
        let state = test_state();
        add_invoker(&state, 0);
        let resp = invoke_action(
            State(state),
            path("guest", "nope"),
            Query(InvokeParams::default()),
            Bytes::new(),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invoke_without_invokers_is_unavailable() {
        let state = test_state();
        let resp = invoke_action(
            State(state),
            path("guest", "echo"),
            Query(InvokeParams::default()),
            Bytes::new(),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn non_blocking_invoke_is_accepted() {
        let state = test_state();
        add_invoker(&state, 0);
        let resp = invoke_action(
            State(state.clone()),
            path("guest", "echo"),
            Query(InvokeParams::default()),
            Bytes::from_static(br#"{"name":"world"}"#),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(state.gateway.tracker().in_flight(), 1);
    }

    #[tokio::test]
    async fn invalid_body_is_rejected() {
        let state = test_state();
        add_invoker(&state, 0);
        let resp = invoke_action(
            State(state.clone()),
            path("guest", "echo"),
            Query(InvokeParams::default()),
            Bytes::from_static(b"{not json"),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.gateway.tracker().in_flight(), 0);
    }

    #[tokio::test]
    async fn remove_invoker_known_and_unknown() {
        let state = test_state();
        add_invoker(&state, 0);

        let resp = remove_invoker(State(state.clone()), Path(0)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = remove_invoker(State(state), Path(7)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let state = test_state();
        add_invoker(&state, 0);
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
