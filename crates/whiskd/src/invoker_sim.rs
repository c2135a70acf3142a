//! Simulated invokers for standalone mode.
//!
//! Each simulated invoker:
//! 1. Subscribes to its own `invoker{N}` topic
//! 2. Heartbeats its capacity on the `health` topic every interval
//! 3. "Runs" each activation by sleeping for `sleepTimeInMs` from the
//!    activation arguments, then publishes a completion
//! 4. Reports `ShuttingDown` in a final heartbeat on shutdown

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use whisk_balancer::InMemoryBus;
use whisk_balancer::bus::{decode, send_json};
use whisk_core::{
    ActivationMessage, COMPLETION_TOPIC, CompletionMessage, HEALTH_TOPIC, Heartbeat,
    InvokerCapacity, InvokerId, InvokerStatus, epoch_millis,
};

/// Activation argument holding the simulated run time.
const SLEEP_ARG: &str = "sleepTimeInMs";

pub struct SimulatedInvoker {
    id: InvokerId,
    capacity: InvokerCapacity,
    bus: Arc<InMemoryBus>,
    heartbeat_interval: Duration,
}

impl SimulatedInvoker {
    pub fn new(
        id: InvokerId,
        capacity: InvokerCapacity,
        bus: Arc<InMemoryBus>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            id,
            capacity,
            bus,
            heartbeat_interval,
        }
    }

    /// Serve activations until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut activations = self.bus.subscribe(&self.id.topic())?;
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        info!(invoker = %self.id, memory_mb = self.capacity.total_memory_mb, "simulated invoker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.heartbeat(InvokerStatus::Up).await,
                message = activations.recv() => {
                    let Some(payload) = message else { break };
                    match decode::<ActivationMessage>(&payload) {
                        Ok(activation) => self.spawn_activation(activation),
                        Err(e) => warn!(invoker = %self.id, error = %e, "discarding malformed activation"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.heartbeat(InvokerStatus::ShuttingDown).await;
        info!(invoker = %self.id, "simulated invoker stopped");
        Ok(())
    }

    async fn heartbeat(&self, status: InvokerStatus) {
        let heartbeat = Heartbeat {
            invoker: self.id,
            capacity: self.capacity,
            timestamp_ms: epoch_millis(),
            status,
        };
        if let Err(e) = send_json(&*self.bus, HEALTH_TOPIC, &heartbeat).await {
            warn!(invoker = %self.id, error = %e, "heartbeat not delivered");
        }
    }

    fn spawn_activation(&self, activation: ActivationMessage) {
        let bus = Arc::clone(&self.bus);
        let invoker = self.id;
        tokio::spawn(async move {
            let sleep_ms = sleep_time_ms(&activation.content);
            debug!(%invoker, activation_id = %activation.activation_id, sleep_ms, "running activation");
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

            let completion = CompletionMessage {
                activation_id: activation.activation_id,
                invoker,
                success: true,
                is_system_error: false,
                result: Some(serde_json::json!({
                    "invoker": invoker,
                    "slept_ms": sleep_ms,
                })),
            };
            if let Err(e) = send_json(&*bus, COMPLETION_TOPIC, &completion).await {
                warn!(%invoker, error = %e, "completion not delivered");
            }
        });
    }
}

fn sleep_time_ms(content: &Value) -> u64 {
    content.get(SLEEP_ARG).and_then(Value::as_u64).unwrap_or(0)
}
