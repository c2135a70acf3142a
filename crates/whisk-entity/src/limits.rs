//! Validation of per-action limits against platform bounds.

use whisk_core::ActionLimits;
use whisk_core::config::LimitsConfig;

use crate::error::{EntityError, EntityResult};

/// Reject limits that fall outside the configured platform bounds.
pub fn check_limits(limits: &ActionLimits, bounds: &LimitsConfig) -> EntityResult<()> {
    if limits.memory_mb < bounds.min_memory_mb || limits.memory_mb > bounds.max_memory_mb {
        return Err(EntityError::InvalidLimits(format!(
            "memory {} MB is outside {}..={} MB",
            limits.memory_mb, bounds.min_memory_mb, bounds.max_memory_mb
        )));
    }
    let timeout = limits.timeout();
    if timeout < bounds.min_timeout || timeout > bounds.max_timeout {
        return Err(EntityError::InvalidLimits(format!(
            "timeout {} ms is outside {}..={} ms",
            limits.timeout_ms,
            bounds.min_timeout.as_millis(),
            bounds.max_timeout.as_millis()
        )));
    }
    Ok(())
}
