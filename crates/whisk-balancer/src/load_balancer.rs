//! Consistent-hash invoker selection.
//!
//! An action's routing key picks a home invoker within its pool. From
//! there the scheduler probes with a step size coprime to the pool size,
//! so every invoker is visited exactly once before giving up. The first
//! healthy invoker that accepts the memory reservation wins.
//!
//! The same key keeps landing on the same invoker while that invoker is
//! healthy and has room, which keeps its containers warm.

use std::sync::Arc;

use tracing::{debug, trace};

use whisk_core::{ActionPool, InvokerId, RoutingKey};

use crate::invokers::{InvokerRegistry, PoolView};
use crate::ledger::CapacityLedger;

/// Deterministic probe order over `n` positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSequence {
    position: usize,
    step: usize,
    n: usize,
    remaining: usize,
}

impl ProbeSequence {
    /// Probe order for `hash` over a pool whose valid steps are `step_sizes`.
    ///
    /// `home_hint`, when present, replaces the hash-derived home position.
    pub fn new(hash: u64, home_hint: Option<usize>, step_sizes: &[usize], n: usize) -> Self {
        if n == 0 || step_sizes.is_empty() {
            return Self {
                position: 0,
                step: 1,
                n: 0,
                remaining: 0,
            };
        }
        let n64 = n as u64;
        let home = match home_hint {
            Some(hint) => hint % n,
            None => (hash % n64) as usize,
        };
        let step_index = ((hash / n64) % step_sizes.len() as u64) as usize;
        Self {
            position: home,
            step: step_sizes[step_index],
            n,
            remaining: n,
        }
    }

    pub fn home(&self) -> usize {
        self.position
    }

    pub fn step(&self) -> usize {
        self.step
    }
}

impl Iterator for ProbeSequence {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.position;
        self.position = (self.position + self.step) % self.n;
        self.remaining -= 1;
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Picks an invoker for an activation and reserves its capacity.
pub struct HashingScheduler {
    registry: Arc<InvokerRegistry>,
    ledger: Arc<CapacityLedger>,
    /// Upper bound on probes per decision; `0` means pool size.
    max_probes: usize,
}

impl HashingScheduler {
    pub fn new(registry: Arc<InvokerRegistry>, ledger: Arc<CapacityLedger>, max_probes: usize) -> Self {
        Self {
            registry,
            ledger,
            max_probes,
        }
    }

    /// Select an invoker in `pool` for `key` and reserve `memory_mb` on it.
    ///
    /// On success the reservation is already held by the caller. `None`
    /// means no healthy invoker in the pool had room.
    pub fn choose_invoker(
        &self,
        key: &RoutingKey,
        pool: ActionPool,
        memory_mb: u64,
    ) -> Option<InvokerId> {
        let snapshot = self.registry.snapshot();
        self.choose_from(snapshot.pool(pool), key, pool, memory_mb)
    }

    /// Run the probe over a single, fixed pool view.
    pub fn choose_from(
        &self,
        view: &PoolView,
        key: &RoutingKey,
        pool: ActionPool,
        memory_mb: u64,
    ) -> Option<InvokerId> {
        if view.healthy_count() == 0 {
            debug!(%pool, action = %key.action, "no healthy invokers in pool");
            return None;
        }

        let budget = match self.max_probes {
            0 => view.len(),
            max => max.min(view.len()),
        };
        let probe = ProbeSequence::new(key.hash(), key.home_hint, &view.step_sizes, view.len());
        trace!(home = probe.home(), step = probe.step(), budget, "probing invokers");

        for index in probe.take(budget) {
            let slot = view.invokers[index];
            if !slot.health.is_usable() {
                continue;
            }
            if self.ledger.reserve(slot.id, pool, memory_mb) {
                debug!(invoker = %slot.id, %pool, action = %key.action, memory_mb, "invoker selected");
                return Some(slot.id);
            }
            trace!(invoker = %slot.id, memory_mb, "invoker has no room");
        }

        debug!(%pool, action = %key.action, memory_mb, "probe sequence exhausted");
        None
    }
}
