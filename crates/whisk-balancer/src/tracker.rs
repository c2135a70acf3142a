//! Activation tracker — the in-flight table.
//!
//! Every published activation has one entry here until it is resolved,
//! either by its completion message or by its deadline. Both paths race
//! through the same compare-and-set on the entry's state, so exactly one
//! of them releases the reserved capacity and notifies the waiter.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use whisk_core::{
    ActionPool, ActivationId, ActivationResult, CompletionMessage, FullyQualifiedName, InvokerId,
};
use whisk_metrics::DispatchMetrics;

use crate::ledger::CapacityLedger;

const PENDING: u8 = 0;
const RESOLVED: u8 = 1;

/// A published activation awaiting its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub activation_id: ActivationId,
    pub namespace: String,
    pub action: FullyQualifiedName,
    pub invoker: InvokerId,
    pub pool: ActionPool,
    pub memory_mb: u64,
    pub submitted_at: Instant,
    /// Set by [`ActivationTracker::register`].
    pub deadline: Instant,
    pub blocking: bool,
}

/// Outcome of feeding a completion message to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// This completion resolved the activation.
    Completed {
        activation: Activation,
        result: ActivationResult,
    },
    /// The activation was already resolved, abandoned, or never known.
    Duplicate,
}

struct Entry {
    activation: Activation,
    state: AtomicU8,
    waiter: Mutex<Option<oneshot::Sender<ActivationResult>>>,
    timer: Mutex<Option<AbortHandle>>,
}

impl Entry {
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RESOLVED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_resolved(&self) -> bool {
        self.state.load(Ordering::Acquire) == RESOLVED
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
    }

    fn take_waiter(&self) -> Option<oneshot::Sender<ActivationResult>> {
        self.waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

struct Inner {
    entries: DashMap<ActivationId, Arc<Entry>>,
    ledger: Arc<CapacityLedger>,
    metrics: Arc<DispatchMetrics>,
    grace: Duration,
}

/// Shared handle to the in-flight table.
#[derive(Clone)]
pub struct ActivationTracker {
    inner: Arc<Inner>,
}

impl ActivationTracker {
    pub fn new(ledger: Arc<CapacityLedger>, metrics: Arc<DispatchMetrics>, grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                ledger,
                metrics,
                grace,
            }),
        }
    }

    /// Start tracking an activation whose capacity is already reserved.
    ///
    /// The deadline is `submitted_at + timeout + grace`. Blocking
    /// activations get a receiver for their result; it yields the timeout
    /// result if no completion arrives first. Must be called within a
    /// tokio runtime.
    pub fn register(
        &self,
        mut activation: Activation,
        timeout: Duration,
    ) -> Option<oneshot::Receiver<ActivationResult>> {
        activation.deadline = activation.submitted_at + timeout + self.inner.grace;
        let id = activation.activation_id.clone();
        let deadline = activation.deadline;

        let (waiter, receiver) = if activation.blocking {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        debug!(
            activation_id = %id,
            invoker = %activation.invoker,
            memory_mb = activation.memory_mb,
            timeout_ms = timeout.as_millis() as u64,
            "activation registered"
        );
        let entry = Arc::new(Entry {
            activation,
            state: AtomicU8::new(PENDING),
            waiter: Mutex::new(waiter),
            timer: Mutex::new(None),
        });
        if let Some(previous) = self.inner.entries.insert(id.clone(), Arc::clone(&entry)) {
            warn!(activation_id = %id, "activation id registered twice, replacing entry");
            if previous.claim() {
                previous.cancel_timer();
                self.inner.release(&previous.activation);
            }
        }

        let inner = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.expire(&id);
        });
        *entry.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(timer.abort_handle());
        // A completion may have won before the handle was stored.
        if entry.is_resolved() {
            entry.cancel_timer();
        }

        receiver
    }

    /// Resolve an activation from its completion message.
    ///
    /// Idempotent: only the first resolution of an id has any effect.
    pub fn resolve(&self, completion: &CompletionMessage) -> Resolution {
        let id = &completion.activation_id;
        let Some(entry) = self.inner.claim(id) else {
            debug!(activation_id = %id, invoker = %completion.invoker, "duplicate completion ignored");
            self.inner.metrics.record_duplicate_completion();
            return Resolution::Duplicate;
        };

        if completion.invoker != entry.activation.invoker {
            warn!(
                activation_id = %id,
                expected = %entry.activation.invoker,
                reported = %completion.invoker,
                "completion came from an unexpected invoker"
            );
        }

        let result = ActivationResult::from_completion(completion);
        entry.cancel_timer();
        self.inner.release(&entry.activation);
        self.inner.metrics.record_resolved(result.status);
        if let Some(waiter) = entry.take_waiter() {
            // The caller may have gone away; the result is simply dropped.
            let _ = waiter.send(result.clone());
        }
        debug!(activation_id = %id, status = ?result.status, "activation completed");

        Resolution::Completed {
            activation: entry.activation.clone(),
            result,
        }
    }

    /// Resolve an activation as timed out. Returns false if it was
    /// already resolved.
    pub fn expire(&self, id: &ActivationId) -> bool {
        self.inner.expire(id)
    }

    /// Withdraw an activation that never reached its invoker.
    ///
    /// Releases its capacity and drops the waiter without sending a result.
    pub fn abandon(&self, id: &ActivationId) -> bool {
        let Some(entry) = self.inner.claim(id) else {
            return false;
        };
        entry.cancel_timer();
        self.inner.release(&entry.activation);
        drop(entry.take_waiter());
        debug!(activation_id = %id, "activation abandoned");
        true
    }

    /// The tracked activation, if still pending.
    pub fn get(&self, id: &ActivationId) -> Option<Activation> {
        self.inner
            .entries
            .get(id)
            .filter(|e| !e.is_resolved())
            .map(|e| e.activation.clone())
    }

    pub fn in_flight(&self) -> usize {
        self.count(|_| true)
    }

    pub fn in_flight_for(&self, invoker: InvokerId) -> usize {
        self.count(|a| a.invoker == invoker)
    }

    pub fn in_flight_for_namespace(&self, namespace: &str) -> usize {
        self.count(|a| a.namespace == namespace)
    }

    fn count(&self, predicate: impl Fn(&Activation) -> bool) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|e| !e.is_resolved() && predicate(&e.activation))
            .count()
    }
}

impl Inner {
    /// Win the resolution race for `id` and remove it from the table.
    fn claim(&self, id: &ActivationId) -> Option<Arc<Entry>> {
        // Clone out of the shard so no map lock is held while resolving.
        let entry = self.entries.get(id).map(|e| Arc::clone(e.value()))?;
        if !entry.claim() {
            return None;
        }
        self.entries
            .remove_if(id, |_, current| Arc::ptr_eq(current, &entry));
        Some(entry)
    }

    fn expire(&self, id: &ActivationId) -> bool {
        let Some(entry) = self.claim(id) else {
            return false;
        };
        let activation = &entry.activation;
        info!(
            activation_id = %id,
            invoker = %activation.invoker,
            action = %activation.action,
            "activation timed out"
        );
        self.release(activation);
        self.metrics.record_resolved(whisk_core::ActivationStatus::Timeout);
        if let Some(waiter) = entry.take_waiter() {
            let _ = waiter.send(ActivationResult::timeout(id.clone()));
        }
        true
    }

    fn release(&self, activation: &Activation) {
        self.ledger
            .release(activation.invoker, activation.pool, activation.memory_mb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisk_core::ActivationStatus;

    const MANAGED: ActionPool = ActionPool::Managed;
    const GRACE: Duration = Duration::from_secs(1);

    struct Harness {
        ledger: Arc<CapacityLedger>,
        metrics: Arc<DispatchMetrics>,
        tracker: ActivationTracker,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(CapacityLedger::new(1.0));
        ledger.set_capacity(InvokerId::new(0), MANAGED, 1024, 8);
        let metrics = Arc::new(DispatchMetrics::new());
        let tracker = ActivationTracker::new(Arc::clone(&ledger), Arc::clone(&metrics), GRACE);
        Harness {
            ledger,
            metrics,
            tracker,
        }
    }

    /// Reserve capacity and register an activation, as the gateway does.
    fn start(
        h: &Harness,
        id: &str,
        blocking: bool,
        timeout: Duration,
    ) -> Option<oneshot::Receiver<ActivationResult>> {
        let invoker = InvokerId::new(0);
        assert!(h.ledger.reserve(invoker, MANAGED, 256));
        let now = Instant::now();
        h.tracker.register(
            Activation {
                activation_id: ActivationId::from(id),
                namespace: "guest".into(),
                action: FullyQualifiedName::new("guest", "hello"),
                invoker,
                pool: MANAGED,
                memory_mb: 256,
                submitted_at: now,
                deadline: now,
                blocking,
            },
            timeout,
        )
    }

    fn completion(id: &str, success: bool) -> CompletionMessage {
        CompletionMessage {
            activation_id: ActivationId::from(id),
            invoker: InvokerId::new(0),
            success,
            is_system_error: false,
            result: Some(serde_json::json!({"ok": success})),
        }
    }

    fn used_memory(h: &Harness) -> u64 {
        h.ledger.snapshot(InvokerId::new(0)).unwrap().used_memory_mb
    }

    #[tokio::test]
    async fn completion_resolves_and_releases() {
        let h = harness();
        let rx = start(&h, "a1", true, Duration::from_secs(60)).unwrap();
        assert_eq!(used_memory(&h), 256);
        assert_eq!(h.tracker.in_flight(), 1);
        assert_eq!(h.tracker.in_flight_for(InvokerId::new(0)), 1);
        assert_eq!(h.tracker.in_flight_for_namespace("guest"), 1);

        let resolution = h.tracker.resolve(&completion("a1", true));
        assert!(matches!(resolution, Resolution::Completed { .. }));

        let result = rx.await.unwrap();
        assert_eq!(result.status, ActivationStatus::Success);
        assert_eq!(result.result, Some(serde_json::json!({"ok": true})));
        assert_eq!(used_memory(&h), 0);
        assert_eq!(h.tracker.in_flight(), 0);
        assert!(h.tracker.get(&ActivationId::from("a1")).is_none());
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let h = harness();
        start(&h, "a1", false, Duration::from_secs(60));

        assert!(matches!(
            h.tracker.resolve(&completion("a1", false)),
            Resolution::Completed { .. }
        ));
        assert_eq!(h.tracker.resolve(&completion("a1", false)), Resolution::Duplicate);
        assert_eq!(h.tracker.resolve(&completion("unknown", true)), Resolution::Duplicate);

        // Capacity was released exactly once.
        assert_eq!(used_memory(&h), 0);
        let counters = h.metrics.snapshot();
        assert_eq!(counters.application_errors, 1);
        assert_eq!(counters.duplicate_completions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_synthesizes_timeout() {
        let h = harness();
        let rx = start(&h, "a1", true, Duration::from_secs(5)).unwrap();

        tokio::time::sleep(Duration::from_secs(5) + GRACE + Duration::from_millis(1)).await;

        let result = rx.await.unwrap();
        assert_eq!(result.status, ActivationStatus::Timeout);
        assert_eq!(used_memory(&h), 0);
        assert_eq!(h.metrics.snapshot().timed_out, 1);

        // A late completion is a duplicate.
        assert_eq!(h.tracker.resolve(&completion("a1", true)), Resolution::Duplicate);
        assert_eq!(used_memory(&h), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_before_deadline_cancels_timeout() {
        let h = harness();
        start(&h, "a1", false, Duration::from_secs(5));
        h.tracker.resolve(&completion("a1", true));

        tokio::time::sleep(Duration::from_secs(10)).await;
        let counters = h.metrics.snapshot();
        assert_eq!(counters.succeeded, 1);
        assert_eq!(counters.timed_out, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn completion_and_timeout_race_has_one_winner() {
        use tokio::sync::Barrier;

        const ROUNDS: usize = 2000;
        let h = harness();
        let mut completions_won = 0;
        let mut expiries_won = 0;

        for i in 0..ROUNDS {
            let id = format!("race-{i}");
            start(&h, &id, false, Duration::from_secs(60));
            let barrier = Arc::new(Barrier::new(2));

            let completer = {
                let tracker = h.tracker.clone();
                let barrier = Arc::clone(&barrier);
                let msg = completion(&id, true);
                async move {
                    barrier.wait().await;
                    matches!(tracker.resolve(&msg), Resolution::Completed { .. })
                }
            };
            let expirer = {
                let tracker = h.tracker.clone();
                let barrier = Arc::clone(&barrier);
                let id = ActivationId::from(id.as_str());
                async move {
                    barrier.wait().await;
                    tracker.expire(&id)
                }
            };

            // Alternate spawn order so neither side is always scheduled first.
            let (completed, expired) = if i % 2 == 0 {
                let c = tokio::spawn(completer);
                let e = tokio::spawn(expirer);
                (c.await.unwrap(), e.await.unwrap())
            } else {
                let e = tokio::spawn(expirer);
                let c = tokio::spawn(completer);
                (c.await.unwrap(), e.await.unwrap())
            };
            assert!(completed ^ expired, "exactly one path must win");
            if completed {
                completions_won += 1;
            } else {
                expiries_won += 1;
            }
        }

        assert!(completions_won > 0, "completion never won");
        assert!(expiries_won > 0, "expiry never won");
        assert_eq!(used_memory(&h), 0);
        assert_eq!(h.tracker.in_flight(), 0);
        let counters = h.metrics.snapshot();
        assert_eq!(counters.resolved(), ROUNDS as u64);
        assert_eq!(counters.timed_out, expiries_won);
    }

    #[tokio::test]
    async fn abandon_releases_without_result() {
        let h = harness();
        let rx = start(&h, "a1", true, Duration::from_secs(60)).unwrap();

        assert!(h.tracker.abandon(&ActivationId::from("a1")));
        assert!(!h.tracker.abandon(&ActivationId::from("a1")));
        assert!(rx.await.is_err());
        assert_eq!(used_memory(&h), 0);
        assert_eq!(h.metrics.snapshot().resolved(), 0);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_block_resolution() {
        let h = harness();
        let rx = start(&h, "a1", true, Duration::from_secs(60));
        drop(rx);

        assert!(matches!(
            h.tracker.resolve(&completion("a1", true)),
            Resolution::Completed { .. }
        ));
        assert_eq!(used_memory(&h), 0);
    }
}
