//! Capacity ledger — per-invoker memory and slot accounting.
//!
//! Each invoker's account sits behind its own mutex, so reservations for
//! different invokers never contend. The map of accounts is only written
//! when an invoker is first seen.
//!
//! Pool membership is decided by the scheduler's invoker snapshot, which
//! only probes invokers of the requested pool. The ledger takes the pool
//! for logging and never rejects on it, so a reservation made against a
//! snapshot stays valid while the fleet grows and pools are re-split.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, warn};

use whisk_core::{ActionPool, InvokerCapacity, InvokerId};

/// Tracks used vs. total memory and container slots per invoker.
pub struct CapacityLedger {
    over_provision_factor: f64,
    accounts: RwLock<HashMap<InvokerId, Arc<Mutex<InvokerCapacity>>>>,
}

impl CapacityLedger {
    pub fn new(over_provision_factor: f64) -> Self {
        Self {
            over_provision_factor: over_provision_factor.max(1.0),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Set an invoker's totals, keeping what is already reserved.
    pub fn set_capacity(
        &self,
        invoker: InvokerId,
        pool: ActionPool,
        total_memory_mb: u64,
        total_slots: u32,
    ) {
        if let Some(account) = self.account(invoker) {
            let mut capacity = lock(&account);
            capacity.total_memory_mb = total_memory_mb;
            capacity.total_slots = total_slots;
            return;
        }

        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        let account = accounts
            .entry(invoker)
            .or_insert_with(|| Arc::new(Mutex::new(InvokerCapacity::default())));
        let mut capacity = lock(account.as_ref());
        capacity.total_memory_mb = total_memory_mb;
        capacity.total_slots = total_slots;
        debug!(%invoker, %pool, total_memory_mb, total_slots, "invoker capacity registered");
    }

    /// Atomically reserve `memory_mb` and one slot on `invoker`.
    ///
    /// Returns false, leaving the account untouched, when the invoker is
    /// unknown or lacks room.
    pub fn reserve(&self, invoker: InvokerId, pool: ActionPool, memory_mb: u64) -> bool {
        let Some(account) = self.account(invoker) else {
            debug!(%invoker, %pool, memory_mb, "reserve against unknown invoker");
            return false;
        };
        let mut capacity = lock(&account);

        let limit = self.memory_limit(capacity.total_memory_mb);
        let fits_memory = capacity
            .used_memory_mb
            .checked_add(memory_mb)
            .is_some_and(|used| used <= limit);
        let fits_slot = capacity.used_slots < capacity.total_slots;
        if !(fits_memory && fits_slot) {
            return false;
        }

        capacity.used_memory_mb += memory_mb;
        capacity.used_slots += 1;
        true
    }

    /// Release a reservation. Counters never go below zero.
    pub fn release(&self, invoker: InvokerId, pool: ActionPool, memory_mb: u64) {
        let Some(account) = self.account(invoker) else {
            warn!(%invoker, %pool, memory_mb, "release for unknown invoker");
            return;
        };
        let mut capacity = lock(&account);
        if capacity.used_memory_mb < memory_mb || capacity.used_slots == 0 {
            warn!(
                %invoker,
                %pool,
                memory_mb,
                used_memory_mb = capacity.used_memory_mb,
                "release exceeds reserved capacity, flooring at zero"
            );
        }
        capacity.used_memory_mb = capacity.used_memory_mb.saturating_sub(memory_mb);
        capacity.used_slots = capacity.used_slots.saturating_sub(1);
    }

    /// Point-in-time view of an invoker's capacity.
    pub fn snapshot(&self, invoker: InvokerId) -> Option<InvokerCapacity> {
        self.account(invoker).map(|a| *lock(&a))
    }

    fn memory_limit(&self, total_memory_mb: u64) -> u64 {
        (total_memory_mb as f64 * self.over_provision_factor).floor() as u64
    }

    fn account(&self, invoker: InvokerId) -> Option<Arc<Mutex<InvokerCapacity>>> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&invoker)
            .cloned()
    }
}

fn lock(account: &Mutex<InvokerCapacity>) -> MutexGuard<'_, InvokerCapacity> {
    account.lock().unwrap_or_else(PoisonError::into_inner)
}
