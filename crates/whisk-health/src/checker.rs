//! Per-invoker heartbeat tracking.
//!
//! The tracker never looks at the clock itself; callers pass `now` so the
//! state machine can be driven deterministically.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use whisk_core::config::HealthSettings;
use whisk_core::{InvokerHealth, InvokerStatus};

/// Missed-heartbeat thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Expected time between two heartbeats.
    pub interval: Duration,
    /// Missed heartbeats before `Healthy` becomes `Unhealthy`.
    pub unhealthy_after: u32,
    /// Missed heartbeats before the invoker is `Unresponsive`.
    pub unresponsive_after: u32,
}

impl From<&HealthSettings> for Thresholds {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
            unhealthy_after: settings.unhealthy_after_missed,
            unresponsive_after: settings.unresponsive_after_missed,
        }
    }
}

/// Tracks heartbeats for a single invoker.
#[derive(Debug)]
pub struct HeartbeatTracker {
    status: InvokerHealth,
    thresholds: Thresholds,
    last_heartbeat: Option<Instant>,
    /// Unix millis of the last completed user activation on this invoker.
    last_user_action_ms: Option<u64>,
}

impl HeartbeatTracker {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            status: InvokerHealth::Offline,
            thresholds,
            last_heartbeat: None,
            last_user_action_ms: None,
        }
    }

    /// Record a heartbeat and return the new health.
    ///
    /// An `Up` heartbeat makes the invoker healthy from any state. A
    /// shutdown report takes it offline.
    pub fn beat(&mut self, now: Instant, status: InvokerStatus) -> InvokerHealth {
        match status {
            InvokerStatus::Up => {
                if self.status != InvokerHealth::Healthy {
                    debug!(from = %self.status, "heartbeat restored invoker to healthy");
                }
                self.last_heartbeat = Some(now);
                self.status = InvokerHealth::Healthy;
            }
            InvokerStatus::ShuttingDown => {
                self.last_heartbeat = None;
                self.status = InvokerHealth::Offline;
            }
        }
        self.status
    }

    /// Number of whole heartbeat intervals elapsed since the last heartbeat.
    pub fn missed(&self, now: Instant) -> u32 {
        let Some(last) = self.last_heartbeat else {
            return 0;
        };
        let elapsed = now.saturating_duration_since(last);
        let interval = self.thresholds.interval.as_millis().max(1);
        (elapsed.as_millis() / interval).min(u128::from(u32::MAX)) as u32
    }

    /// Re-evaluate health from the missed-heartbeat count.
    ///
    /// Missed heartbeats only ever degrade health; recovery requires a
    /// heartbeat. Offline invokers stay offline.
    pub fn evaluate(&mut self, now: Instant) -> InvokerHealth {
        if self.status == InvokerHealth::Offline {
            return self.status;
        }
        let missed = self.missed(now);
        let derived = if missed >= self.thresholds.unresponsive_after {
            InvokerHealth::Unresponsive
        } else if missed >= self.thresholds.unhealthy_after {
            InvokerHealth::Unhealthy
        } else {
            InvokerHealth::Healthy
        };

        if severity(derived) > severity(self.status) {
            warn!(
                missed,
                from = %self.status,
                to = %derived,
                "invoker missed heartbeats"
            );
            self.status = derived;
        }
        self.status
    }

    /// Administrative removal.
    pub fn take_offline(&mut self) -> InvokerHealth {
        self.last_heartbeat = None;
        self.status = InvokerHealth::Offline;
        self.status
    }

    pub fn status(&self) -> InvokerHealth {
        self.status
    }

    pub fn record_user_action(&mut self, at_ms: u64) {
        self.last_user_action_ms = Some(self.last_user_action_ms.map_or(at_ms, |t| t.max(at_ms)));
    }

    pub fn last_user_action_ms(&self) -> Option<u64> {
        self.last_user_action_ms
    }
}

fn severity(health: InvokerHealth) -> u8 {
    match health {
        InvokerHealth::Healthy => 0,
        InvokerHealth::Unhealthy => 1,
        InvokerHealth::Unresponsive => 2,
        InvokerHealth::Offline => 3,
    }
}
