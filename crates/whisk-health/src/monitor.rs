//! Health monitor — owns the health state of every known invoker.
//!
//! Each invoker has its own tracker behind its own mutex, so heartbeats
//! from different invokers never contend. The outer map is only written
//! when a new invoker shows up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use whisk_core::config::HealthSettings;
use whisk_core::{Heartbeat, InvokerHealth, InvokerId};

use crate::checker::{HeartbeatTracker, Thresholds};

/// Capacity of the transition broadcast channel.
const EVENT_BUFFER: usize = 256;

/// A change of an invoker's health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub invoker: InvokerId,
    pub from: InvokerHealth,
    pub to: InvokerHealth,
    /// Health version after this transition.
    pub version: u64,
}

/// Derives per-invoker health from heartbeats.
pub struct HealthMonitor {
    settings: HealthSettings,
    trackers: RwLock<HashMap<InvokerId, Arc<Mutex<HeartbeatTracker>>>>,
    version: AtomicU64,
    events: broadcast::Sender<HealthTransition>,
}

impl HealthMonitor {
    pub fn new(settings: HealthSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            settings,
            trackers: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            events,
        }
    }

    /// Subscribe to health transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthTransition> {
        self.events.subscribe()
    }

    /// Monotonic counter bumped on every transition.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Process a heartbeat received now.
    pub fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Option<HealthTransition> {
        self.record_heartbeat_at(heartbeat, Instant::now())
    }

    /// Process a heartbeat observed at `now`.
    pub fn record_heartbeat_at(
        &self,
        heartbeat: &Heartbeat,
        now: Instant,
    ) -> Option<HealthTransition> {
        let tracker = self.tracker_or_insert(heartbeat.invoker);
        let mut tracker = lock(&tracker);
        let from = tracker.status();
        let to = tracker.beat(now, heartbeat.status);
        drop(tracker);
        self.transition(heartbeat.invoker, from, to)
    }

    /// Re-evaluate missed heartbeats for every invoker.
    pub fn sweep(&self) -> Vec<HealthTransition> {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> Vec<HealthTransition> {
        let trackers: Vec<(InvokerId, Arc<Mutex<HeartbeatTracker>>)> = self
            .trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, t)| (*id, Arc::clone(t)))
            .collect();

        let mut transitions = Vec::new();
        for (invoker, tracker) in trackers {
            let (from, to) = {
                let mut tracker = lock(&tracker);
                let from = tracker.status();
                (from, tracker.evaluate(now))
            };
            if let Some(t) = self.transition(invoker, from, to) {
                transitions.push(t);
            }
        }
        transitions
    }

    /// Administratively take an invoker offline.
    ///
    /// It returns to `Healthy` only if it heartbeats again.
    pub fn remove(&self, invoker: InvokerId) -> Option<HealthTransition> {
        let tracker = self.tracker(invoker)?;
        let (from, to) = {
            let mut tracker = lock(&tracker);
            (tracker.status(), tracker.take_offline())
        };
        info!(%invoker, "invoker removed by operator");
        self.transition(invoker, from, to)
    }

    /// Current health of an invoker; unknown invokers are offline.
    pub fn health(&self, invoker: InvokerId) -> InvokerHealth {
        self.tracker(invoker)
            .map(|t| lock(&t).status())
            .unwrap_or(InvokerHealth::Offline)
    }

    /// Note that a user activation finished on `invoker` at `at_ms`.
    pub fn record_user_action(&self, invoker: InvokerId, at_ms: u64) {
        if let Some(tracker) = self.tracker(invoker) {
            lock(&tracker).record_user_action(at_ms);
        }
    }

    /// Unix millis of the last user activation completed on `invoker`.
    pub fn last_user_action_ms(&self, invoker: InvokerId) -> Option<u64> {
        self.tracker(invoker)
            .and_then(|t| lock(&t).last_user_action_ms())
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.settings.sweep_interval;
        info!(interval_ms = interval.as_millis() as u64, "health monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let transitions = self.sweep();
                    if !transitions.is_empty() {
                        debug!(count = transitions.len(), "health sweep produced transitions");
                    }
                }
                _ = shutdown.changed() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn tracker(&self, invoker: InvokerId) -> Option<Arc<Mutex<HeartbeatTracker>>> {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&invoker)
            .cloned()
    }

    fn tracker_or_insert(&self, invoker: InvokerId) -> Arc<Mutex<HeartbeatTracker>> {
        if let Some(tracker) = self.tracker(invoker) {
            return tracker;
        }
        let mut trackers = self.trackers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(trackers.entry(invoker).or_insert_with(|| {
            debug!(%invoker, "tracking new invoker");
            Arc::new(Mutex::new(HeartbeatTracker::new(Thresholds::from(
                &self.settings,
            ))))
        }))
    }

    fn transition(
        &self,
        invoker: InvokerId,
        from: InvokerHealth,
        to: InvokerHealth,
    ) -> Option<HealthTransition> {
        if from == to {
            return None;
        }
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        match to {
            InvokerHealth::Healthy => info!(%invoker, %from, %to, "invoker health changed"),
            _ => warn!(%invoker, %from, %to, "invoker health changed"),
        }
        let event = HealthTransition {
            invoker,
            from,
            to,
            version,
        };
        // No subscribers is fine; the version counter is the source of truth.
        let _ = self.events.send(event);
        Some(event)
    }
}

fn lock(tracker: &Mutex<HeartbeatTracker>) -> MutexGuard<'_, HeartbeatTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}
