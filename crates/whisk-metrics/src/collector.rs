//! Dispatch counters.
//!
//! Lock-free: every counter is an `AtomicU64` bumped with relaxed
//! ordering. Readers take a [`DispatchCounters`] snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use whisk_core::ActivationStatus;

/// Counters for the activation dispatch path.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    submitted: AtomicU64,
    overloaded: AtomicU64,
    dispatch_failures: AtomicU64,
    succeeded: AtomicU64,
    application_errors: AtomicU64,
    system_errors: AtomicU64,
    timed_out: AtomicU64,
    duplicate_completions: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub submitted: u64,
    pub overloaded: u64,
    pub dispatch_failures: u64,
    pub succeeded: u64,
    pub application_errors: u64,
    pub system_errors: u64,
    pub timed_out: u64,
    pub duplicate_completions: u64,
}

impl DispatchCounters {
    /// Activations resolved by any path.
    pub fn resolved(&self) -> u64 {
        self.succeeded + self.application_errors + self.system_errors + self.timed_out
    }
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// An activation was published to an invoker.
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// No invoker could take an activation.
    pub fn record_overload(&self) {
        self.overloaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Publishing to the bus failed.
    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// An activation reached its final status.
    pub fn record_resolved(&self, status: ActivationStatus) {
        let counter = match status {
            ActivationStatus::Success => &self.succeeded,
            ActivationStatus::ApplicationError => &self.application_errors,
            ActivationStatus::SystemError => &self.system_errors,
            ActivationStatus::Timeout => &self.timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_completion(&self) {
        let total = self.duplicate_completions.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(total, "duplicate completion counted");
    }

    pub fn snapshot(&self) -> DispatchCounters {
        DispatchCounters {
            submitted: self.submitted.load(Ordering::Relaxed),
            overloaded: self.overloaded.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            application_errors: self.application_errors.load(Ordering::Relaxed),
            system_errors: self.system_errors.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            duplicate_completions: self.duplicate_completions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = DispatchMetrics::new();
        assert_eq!(metrics.snapshot(), DispatchCounters::default());
    }

    #[test]
    fn resolved_statuses_go_to_their_counters() {
        let metrics = DispatchMetrics::new();
        metrics.record_resolved(ActivationStatus::Success);
        metrics.record_resolved(ActivationStatus::Success);
        metrics.record_resolved(ActivationStatus::ApplicationError);
        metrics.record_resolved(ActivationStatus::SystemError);
        metrics.record_resolved(ActivationStatus::Timeout);

        let counters = metrics.snapshot();
        assert_eq!(counters.succeeded, 2);
        assert_eq!(counters.application_errors, 1);
        assert_eq!(counters.system_errors, 1);
        assert_eq!(counters.timed_out, 1);
        assert_eq!(counters.resolved(), 5);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(DispatchMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.record_submitted();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().submitted, 1000);
    }
}
