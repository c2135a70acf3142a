//! Invoker registry — versioned, copy-on-change view of the fleet.
//!
//! The ordered invoker list is `0..=highest ordinal seen`; ordinals that
//! never heartbeated are kept as offline placeholders so the positions of
//! real invokers (and therefore hash homes) do not shift.
//!
//! A scheduling decision works on one [`InvokerSnapshot`], an immutable
//! `Arc` that combines membership with the health states current at the
//! time it was built. The registry rebuilds it lazily when either the
//! membership version or the health monitor's version moved on.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use whisk_core::{ActionPool, InvokerHealth, InvokerId};
use whisk_health::HealthMonitor;

/// One position in a pool's probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokerSlot {
    pub id: InvokerId,
    pub health: InvokerHealth,
}

/// Invokers of one pool plus the probe step sizes valid for its size.
#[derive(Debug, Clone, Default)]
pub struct PoolView {
    pub invokers: Vec<InvokerSlot>,
    /// Every step in `1..=n` coprime to `n`.
    pub step_sizes: Vec<usize>,
}

impl PoolView {
    fn new(invokers: Vec<InvokerSlot>) -> Self {
        let step_sizes = coprime_steps(invokers.len());
        Self {
            invokers,
            step_sizes,
        }
    }

    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.invokers
            .iter()
            .filter(|slot| slot.health.is_usable())
            .count()
    }
}

/// Immutable fleet view used for one scheduling decision.
#[derive(Debug, Clone, Default)]
pub struct InvokerSnapshot {
    /// Membership version this snapshot was built from.
    pub membership_version: u64,
    /// Health version this snapshot was built from.
    pub health_version: u64,
    pub managed: PoolView,
    pub blackbox: PoolView,
}

impl InvokerSnapshot {
    pub fn pool(&self, pool: ActionPool) -> &PoolView {
        match pool {
            ActionPool::Managed => &self.managed,
            ActionPool::Blackbox => &self.blackbox,
        }
    }

    /// Total number of invoker positions across both pools.
    pub fn size(&self) -> usize {
        self.managed.len() + self.blackbox.len()
    }

    /// Every slot with the pool it serves, ordered by invoker id.
    pub fn slots(&self) -> impl Iterator<Item = (ActionPool, InvokerSlot)> + '_ {
        self.managed
            .invokers
            .iter()
            .map(|s| (ActionPool::Managed, *s))
            .chain(self.blackbox.invokers.iter().map(|s| (ActionPool::Blackbox, *s)))
    }

    pub fn pool_of(&self, invoker: InvokerId) -> Option<ActionPool> {
        self.slots()
            .find(|(_, slot)| slot.id == invoker)
            .map(|(pool, _)| pool)
    }
}

#[derive(Debug, Default)]
struct Membership {
    size: usize,
    version: u64,
}

/// Membership outcome of registering an invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The invoker was already part of the list.
    Known,
    /// The list grew to `size`; pool assignments may have moved.
    Grew { size: usize },
}

/// Owns the ordered invoker list and hands out snapshots.
pub struct InvokerRegistry {
    health: Arc<HealthMonitor>,
    blackbox_fraction: f64,
    membership: RwLock<Membership>,
    current: RwLock<Arc<InvokerSnapshot>>,
}

impl InvokerRegistry {
    pub fn new(health: Arc<HealthMonitor>, blackbox_fraction: f64) -> Self {
        Self {
            health,
            blackbox_fraction: blackbox_fraction.clamp(0.0, 1.0),
            membership: RwLock::new(Membership::default()),
            current: RwLock::new(Arc::new(InvokerSnapshot::default())),
        }
    }

    /// Make sure `invoker` has a position in the ordered list.
    pub fn register(&self, invoker: InvokerId) -> Registration {
        {
            let membership = self.membership.read().unwrap_or_else(PoisonError::into_inner);
            if invoker.ordinal() < membership.size {
                return Registration::Known;
            }
        }

        let mut membership = self.membership.write().unwrap_or_else(PoisonError::into_inner);
        if invoker.ordinal() < membership.size {
            return Registration::Known;
        }
        let previous = membership.size;
        membership.size = invoker.ordinal() + 1;
        membership.version += 1;
        let (managed, blackbox) = pool_sizes(membership.size, self.blackbox_fraction);
        info!(
            %invoker,
            from = previous,
            to = membership.size,
            managed,
            blackbox,
            "invoker list grew"
        );
        Registration::Grew {
            size: membership.size,
        }
    }

    /// Current fleet view, rebuilt if membership or health changed.
    pub fn snapshot(&self) -> Arc<InvokerSnapshot> {
        let membership_version = self.membership_version();
        let health_version = self.health.version();
        {
            let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
            if current.membership_version == membership_version
                && current.health_version == health_version
            {
                return Arc::clone(&current);
            }
        }

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.membership_version == membership_version
            && current.health_version == health_version
        {
            return Arc::clone(&current);
        }
        let rebuilt = Arc::new(self.build(health_version));
        debug!(
            membership_version = rebuilt.membership_version,
            health_version = rebuilt.health_version,
            managed = rebuilt.managed.len(),
            blackbox = rebuilt.blackbox.len(),
            "invoker snapshot rebuilt"
        );
        *current = Arc::clone(&rebuilt);
        rebuilt
    }

    /// Pool `invoker` serves in the current membership, if it is listed.
    pub fn pool_of(&self, invoker: InvokerId) -> Option<ActionPool> {
        let size = self.membership.read().unwrap_or_else(PoisonError::into_inner).size;
        if invoker.ordinal() >= size {
            return None;
        }
        let (managed, _) = pool_sizes(size, self.blackbox_fraction);
        Some(if invoker.ordinal() < managed {
            ActionPool::Managed
        } else {
            ActionPool::Blackbox
        })
    }

    pub fn membership_version(&self) -> u64 {
        self.membership.read().unwrap_or_else(PoisonError::into_inner).version
    }

    fn build(&self, health_version: u64) -> InvokerSnapshot {
        let (size, membership_version) = {
            let m = self.membership.read().unwrap_or_else(PoisonError::into_inner);
            (m.size, m.version)
        };
        let (managed_count, _) = pool_sizes(size, self.blackbox_fraction);

        let slots: Vec<InvokerSlot> = (0..size)
            .map(|ordinal| {
                let id = InvokerId::new(ordinal);
                InvokerSlot {
                    id,
                    health: self.health.health(id),
                }
            })
            .collect();
        let (managed, blackbox) = slots.split_at(managed_count);

        InvokerSnapshot {
            membership_version,
            health_version,
            managed: PoolView::new(managed.to_vec()),
            blackbox: PoolView::new(blackbox.to_vec()),
        }
    }
}

/// Split `n` invokers into `(managed, blackbox)` counts.
///
/// Blackbox invokers are taken from the end of the list. A single invoker
/// is always managed, and the managed pool never becomes empty.
pub fn pool_sizes(n: usize, blackbox_fraction: f64) -> (usize, usize) {
    if n < 2 || blackbox_fraction <= 0.0 {
        return (n, 0);
    }
    let blackbox = ((n as f64 * blackbox_fraction).floor() as usize).clamp(1, n - 1);
    (n - blackbox, blackbox)
}

/// All step sizes in `1..=n` that are coprime to `n`.
///
/// Stepping through `0..n` by any of them visits every position exactly
/// once before repeating.
pub fn coprime_steps(n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    (1..=n).filter(|&step| gcd(step, n) == 1).collect()
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisk_core::config::HealthSettings;
    use whisk_core::{Heartbeat, InvokerCapacity, InvokerStatus};

    fn monitor() -> Arc<HealthMonitor> {
        Arc::new(HealthMonitor::new(HealthSettings::default()))
    }

    fn beat(monitor: &HealthMonitor, ordinal: usize) {
        monitor.record_heartbeat(&Heartbeat {
            invoker: InvokerId::new(ordinal),
            capacity: InvokerCapacity::new(1024, 8),
            timestamp_ms: 0,
            status: InvokerStatus::Up,
        });
    }

    #[test]
    fn pool_sizes_follow_fraction() {
        assert_eq!(pool_sizes(0, 0.1), (0, 0));
        assert_eq!(pool_sizes(1, 0.1), (1, 0));
        assert_eq!(pool_sizes(2, 0.1), (1, 1));
        assert_eq!(pool_sizes(10, 0.1), (9, 1));
        assert_eq!(pool_sizes(20, 0.1), (18, 2));
        assert_eq!(pool_sizes(4, 1.0), (1, 3));
        assert_eq!(pool_sizes(4, 0.0), (4, 0));
    }

    #[test]
    fn coprime_steps_small_sizes() {
        assert_eq!(coprime_steps(0), Vec::<usize>::new());
        assert_eq!(coprime_steps(1), vec![1]);
        assert_eq!(coprime_steps(6), vec![1, 5]);
        assert_eq!(coprime_steps(7), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn register_grows_with_placeholders() {
        let registry = InvokerRegistry::new(monitor(), 0.0);
        assert_eq!(
            registry.register(InvokerId::new(2)),
            Registration::Grew { size: 3 }
        );
        assert_eq!(registry.register(InvokerId::new(0)), Registration::Known);
        assert_eq!(registry.membership_version(), 1);

        let snap = registry.snapshot();
        assert_eq!(snap.managed.len(), 3);
        assert!(snap
            .managed
            .invokers
            .iter()
            .all(|s| s.health == InvokerHealth::Offline));
    }

    #[test]
    fn snapshot_is_reused_until_something_changes() {
        let health = monitor();
        let registry = InvokerRegistry::new(Arc::clone(&health), 0.0);
        registry.register(InvokerId::new(0));

        let a = registry.snapshot();
        let b = registry.snapshot();
        assert!(Arc::ptr_eq(&a, &b));

        beat(&health, 0);
        let c = registry.snapshot();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.managed.invokers[0].health, InvokerHealth::Healthy);
        // The old snapshot is untouched.
        assert_eq!(a.managed.invokers[0].health, InvokerHealth::Offline);
    }

    #[test]
    fn pools_partition_the_list() {
        let health = monitor();
        let registry = InvokerRegistry::new(Arc::clone(&health), 0.25);
        for i in 0..4 {
            registry.register(InvokerId::new(i));
            beat(&health, i);
        }

        let snap = registry.snapshot();
        assert_eq!(snap.managed.len(), 3);
        assert_eq!(snap.blackbox.len(), 1);
        assert_eq!(snap.blackbox.invokers[0].id, InvokerId::new(3));
        assert_eq!(snap.pool_of(InvokerId::new(3)), Some(ActionPool::Blackbox));
        assert_eq!(registry.pool_of(InvokerId::new(0)), Some(ActionPool::Managed));
        assert_eq!(registry.pool_of(InvokerId::new(9)), None);
        assert_eq!(snap.blackbox.healthy_count(), 1);
    }
}
