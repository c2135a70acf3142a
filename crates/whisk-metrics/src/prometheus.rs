//! Prometheus text exposition format.

use std::fmt::Write;

use whisk_core::{InvokerHealth, InvokerInfo};

use crate::collector::DispatchCounters;

/// Render dispatch counters and per-invoker gauges as Prometheus text.
pub fn render_prometheus(counters: &DispatchCounters, invokers: &[InvokerInfo]) -> String {
    let mut out = String::new();

    counter(&mut out, "whisk_activations_submitted_total", "Activations published to an invoker.", counters.submitted);
    counter(&mut out, "whisk_activations_overloaded_total", "Submissions rejected because no invoker had capacity.", counters.overloaded);
    counter(&mut out, "whisk_dispatch_failures_total", "Submissions whose bus publish failed.", counters.dispatch_failures);
    counter(&mut out, "whisk_duplicate_completions_total", "Completion messages for already resolved activations.", counters.duplicate_completions);

    out.push_str("# HELP whisk_activations_resolved_total Activations resolved, by final status.\n");
    out.push_str("# TYPE whisk_activations_resolved_total counter\n");
    for (status, value) in [
        ("success", counters.succeeded),
        ("application_error", counters.application_errors),
        ("system_error", counters.system_errors),
        ("timeout", counters.timed_out),
    ] {
        let _ = writeln!(out, "whisk_activations_resolved_total{{status=\"{status}\"}} {value}");
    }

    out.push_str("# HELP whisk_invoker_healthy Whether the invoker is healthy (1) or not (0).\n");
    out.push_str("# TYPE whisk_invoker_healthy gauge\n");
    for inv in invokers {
        let healthy = u8::from(inv.health == InvokerHealth::Healthy);
        let _ = writeln!(
            out,
            "whisk_invoker_healthy{{invoker=\"{}\",pool=\"{}\",state=\"{}\"}} {healthy}",
            inv.id, inv.pool, inv.health
        );
    }

    out.push_str("# HELP whisk_invoker_memory_used_mb Memory reserved on the invoker.\n");
    out.push_str("# TYPE whisk_invoker_memory_used_mb gauge\n");
    for inv in invokers {
        let _ = writeln!(
            out,
            "whisk_invoker_memory_used_mb{{invoker=\"{}\",pool=\"{}\"}} {}",
            inv.id, inv.pool, inv.capacity.used_memory_mb
        );
    }

    out.push_str("# HELP whisk_invoker_memory_total_mb Memory the invoker advertises.\n");
    out.push_str("# TYPE whisk_invoker_memory_total_mb gauge\n");
    for inv in invokers {
        let _ = writeln!(
            out,
            "whisk_invoker_memory_total_mb{{invoker=\"{}\",pool=\"{}\"}} {}",
            inv.id, inv.pool, inv.capacity.total_memory_mb
        );
    }

    out
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}
