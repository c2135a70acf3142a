//! Dispatch gateway — the public entry point of the dispatch core.
//!
//! ```text
//! submit ─▶ ActionStore ─▶ HashingScheduler ─▶ CapacityLedger (reserve)
//!                                │
//!                                ▼
//!          ActivationTracker (register) ─▶ bus: invoker{N}
//!                                                 │
//!  completed topic ─▶ process_completion ─▶ tracker.resolve ─▶ ledger (release)
//!  health topic    ─▶ process_heartbeat  ─▶ registry, ledger totals, HealthMonitor
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use whisk_core::{
    ActivationId, ActivationMessage, ActivationResult, CompletionMessage, ControllerConfig,
    FullyQualifiedName, Heartbeat, InvokerId, InvokerInfo, RoutingKey, epoch_millis,
};
use whisk_entity::{ActionStore, EntityError};
use whisk_health::HealthMonitor;
use whisk_metrics::DispatchMetrics;

use crate::bus::{MessageProducer, decode, send_json};
use crate::error::{LoadBalancerError, LoadBalancerResult};
use crate::invokers::{InvokerRegistry, Registration};
use crate::ledger::CapacityLedger;
use crate::load_balancer::HashingScheduler;
use crate::tracker::{Activation, ActivationTracker, Resolution};

/// One invocation request.
#[derive(Debug, Clone)]
pub struct ActivationRequest {
    /// Namespace of the invoking subject.
    pub namespace: String,
    pub action: FullyQualifiedName,
    pub payload: Value,
    pub blocking: bool,
    /// How long a blocking caller waits. The activation itself always runs
    /// under the action's own time limit.
    pub timeout: Option<Duration>,
    /// Explicit home invoker ordinal.
    pub home_hint: Option<usize>,
}

impl ActivationRequest {
    pub fn new(namespace: impl Into<String>, action: FullyQualifiedName) -> Self {
        Self {
            namespace: namespace.into(),
            action,
            payload: Value::Object(Default::default()),
            blocking: false,
            timeout: None,
            home_hint: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What the caller gets back from [`DispatchGateway::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Published; the result will arrive asynchronously.
    Accepted(ActivationId),
    /// Blocking submission that resolved (possibly as a timeout).
    Completed(ActivationResult),
}

impl SubmitOutcome {
    pub fn activation_id(&self) -> &ActivationId {
        match self {
            SubmitOutcome::Accepted(id) => id,
            SubmitOutcome::Completed(result) => &result.activation_id,
        }
    }
}

/// Wires the ledger, registry, scheduler, and tracker together.
pub struct DispatchGateway {
    store: Arc<dyn ActionStore>,
    producer: Arc<dyn MessageProducer>,
    health: Arc<HealthMonitor>,
    registry: Arc<InvokerRegistry>,
    ledger: Arc<CapacityLedger>,
    scheduler: HashingScheduler,
    tracker: ActivationTracker,
    metrics: Arc<DispatchMetrics>,
}

impl DispatchGateway {
    pub fn new(
        config: &ControllerConfig,
        store: Arc<dyn ActionStore>,
        producer: Arc<dyn MessageProducer>,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        let balancer = &config.balancer;
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let registry = Arc::new(InvokerRegistry::new(
            Arc::clone(&health),
            balancer.blackbox_fraction,
        ));
        let ledger = Arc::new(CapacityLedger::new(balancer.over_provision_factor));
        let scheduler = HashingScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            balancer.max_probes,
        );
        let tracker = ActivationTracker::new(
            Arc::clone(&ledger),
            Arc::clone(&metrics),
            balancer.timeout_grace,
        );

        Self {
            store,
            producer,
            health,
            registry,
            ledger,
            scheduler,
            tracker,
            metrics,
        }
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Dispatch one activation.
    ///
    /// Blocking requests wait for the completion or the activation's
    /// deadline, or until the caller's own bound elapses, which yields
    /// `Accepted`. Dropping the returned future only drops the wait; the
    /// activation itself stays tracked until it resolves.
    pub async fn submit(&self, request: ActivationRequest) -> LoadBalancerResult<SubmitOutcome> {
        let fqn = request.action.clone();
        let action = match self.store.get_action(&fqn.namespace, &fqn.name) {
            Ok(action) => action,
            Err(EntityError::NotFound(_)) => return Err(LoadBalancerError::ActionNotFound(fqn)),
            Err(e) => return Err(e.into()),
        };

        let pool = action.pool();
        let memory_mb = action.limits.memory_mb;
        let limit = action.limits.timeout();

        let mut key = RoutingKey::new(request.namespace.clone(), fqn.clone());
        if let Some(hint) = request.home_hint {
            key = key.with_home_hint(hint);
        }

        let Some(invoker) = self.scheduler.choose_invoker(&key, pool, memory_mb) else {
            self.metrics.record_overload();
            warn!(action = %fqn, %pool, memory_mb, "no invoker available");
            return Err(LoadBalancerError::Overload {
                action: fqn,
                pool,
                memory_mb,
            });
        };

        let activation_id = ActivationId::generate();
        let now = Instant::now();
        let waiter = self.tracker.register(
            Activation {
                activation_id: activation_id.clone(),
                namespace: request.namespace.clone(),
                action: fqn.clone(),
                invoker,
                pool,
                memory_mb,
                submitted_at: now,
                deadline: now,
                blocking: request.blocking,
            },
            limit,
        );

        let message = ActivationMessage {
            activation_id: activation_id.clone(),
            namespace: request.namespace,
            action: fqn.clone(),
            invoker,
            pool,
            memory_mb,
            blocking: request.blocking,
            content: request.payload,
            submitted_at_ms: epoch_millis(),
        };
        if let Err(e) = send_json(self.producer.as_ref(), &invoker.topic(), &message).await {
            self.tracker.abandon(&activation_id);
            self.metrics.record_dispatch_failure();
            error!(%activation_id, %invoker, error = %e, "failed to publish activation");
            return Err(e.into());
        }
        self.metrics.record_submitted();
        info!(%activation_id, action = %fqn, %invoker, blocking = request.blocking, "activation dispatched");

        let Some(rx) = waiter else {
            return Ok(SubmitOutcome::Accepted(activation_id));
        };
        let received = match request.timeout {
            Some(bound) => match tokio::time::timeout(bound, rx).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(%activation_id, bound_ms = bound.as_millis() as u64, "caller stopped waiting");
                    return Ok(SubmitOutcome::Accepted(activation_id));
                }
            },
            None => rx.await,
        };
        match received {
            Ok(result) => Ok(SubmitOutcome::Completed(result)),
            // Withdrawn without a result; report it as accepted.
            Err(_) => Ok(SubmitOutcome::Accepted(activation_id)),
        }
    }

    // ── Feedback from invokers ──────────────────────────────────────

    /// Apply one completion message.
    pub fn process_completion(&self, completion: &CompletionMessage) -> Resolution {
        let resolution = self.tracker.resolve(completion);
        if let Resolution::Completed { activation, .. } = &resolution {
            self.health
                .record_user_action(activation.invoker, epoch_millis());
        }
        resolution
    }

    /// Apply one heartbeat: membership, capacity totals, then health.
    pub fn process_heartbeat(&self, heartbeat: &Heartbeat) {
        let invoker = heartbeat.invoker;
        if let Registration::Grew { size } = self.registry.register(invoker) {
            // Pool boundaries moved; the next snapshot carries the new split.
            debug!(%invoker, size, "fleet grew");
        }

        let Some(pool) = self.registry.pool_of(invoker) else {
            warn!(%invoker, "heartbeat from unregistered invoker");
            return;
        };
        self.ledger.set_capacity(
            invoker,
            pool,
            heartbeat.capacity.total_memory_mb,
            heartbeat.capacity.total_slots,
        );
        self.health.record_heartbeat(heartbeat);
    }

    /// Consume the completion topic until shutdown or the topic closes.
    pub async fn run_completion_consumer(
        &self,
        mut messages: mpsc::Receiver<Vec<u8>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("completion consumer started");
        loop {
            tokio::select! {
                message = messages.recv() => {
                    let Some(payload) = message else { break };
                    match decode::<CompletionMessage>(&payload) {
                        Ok(completion) => {
                            self.process_completion(&completion);
                        }
                        Err(e) => warn!(error = %e, "discarding malformed completion"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("completion consumer stopped");
    }

    /// Consume the health topic until shutdown or the topic closes.
    pub async fn run_heartbeat_consumer(
        &self,
        mut messages: mpsc::Receiver<Vec<u8>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("heartbeat consumer started");
        loop {
            tokio::select! {
                message = messages.recv() => {
                    let Some(payload) = message else { break };
                    match decode::<Heartbeat>(&payload) {
                        Ok(heartbeat) => self.process_heartbeat(&heartbeat),
                        Err(e) => warn!(error = %e, "discarding malformed heartbeat"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("heartbeat consumer stopped");
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Every known invoker with its pool, health, and capacity.
    pub fn list_invokers(&self) -> Vec<InvokerInfo> {
        let snapshot = self.registry.snapshot();
        snapshot
            .slots()
            .map(|(pool, slot)| InvokerInfo {
                id: slot.id,
                pool,
                health: self.health.health(slot.id),
                capacity: self.ledger.snapshot(slot.id).unwrap_or_default(),
                last_user_action_ms: self.health.last_user_action_ms(slot.id),
            })
            .collect()
    }

    /// Take an invoker out of rotation until it heartbeats again.
    ///
    /// Returns false if the invoker was never registered.
    pub fn remove_invoker(&self, invoker: InvokerId) -> bool {
        if self.registry.pool_of(invoker).is_none() {
            return false;
        }
        self.health.remove(invoker);
        debug!(%invoker, "invoker removed from rotation");
        true
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub fn tracker(&self) -> &ActivationTracker {
        &self.tracker
    }

    pub fn ledger(&self) -> &Arc<CapacityLedger> {
        &self.ledger
    }
}
