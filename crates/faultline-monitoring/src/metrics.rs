//! Engine counters on the `metrics` facade.
//!
//! No recorder is installed here; without one every call is a no-op.

use metrics::increment_counter;
use tracing::trace;

/// Counter names
pub mod names {
    /// Events applied to the primary graph, by priority
    pub const EVENTS_APPLIED: &str = "faultline_events_applied_total";
    /// Action recipes executed, by type and mode
    pub const ACTIONS_EXECUTED: &str = "faultline_actions_executed_total";
    /// Scenario clauses whose matching failed
    pub const MATCH_ERRORS: &str = "faultline_match_errors_total";
    /// Deltas a worker did not acknowledge
    pub const REPLICATION_FAULTS: &str = "faultline_replication_faults_total";
    /// Templates rejected by the compiler
    pub const COMPILE_ERRORS: &str = "faultline_template_compile_errors_total";
}

/// Evaluation engine metrics
pub struct EngineMetrics;

impl EngineMetrics {
    /// Record an event applied to the primary graph
    pub fn record_event_applied(priority: &str) {
        increment_counter!(names::EVENTS_APPLIED, "priority" => priority.to_string());
    }

    /// Record an action recipe that emitted steps
    pub fn record_action(action_type: &str, mode: &str) {
        trace!(action_type, mode, "Action executed");
        increment_counter!(
            names::ACTIONS_EXECUTED,
            "action_type" => action_type.to_string(),
            "mode" => mode.to_string()
        );
    }

    /// Record a contained matching failure
    pub fn record_match_error(template: &str) {
        increment_counter!(names::MATCH_ERRORS, "template" => template.to_string());
    }

    /// Record a worker that failed to acknowledge a delta
    pub fn record_replication_fault(worker: usize) {
        increment_counter!(names::REPLICATION_FAULTS, "worker" => worker.to_string());
    }

    /// Record a template that failed to compile
    pub fn record_compile_error(template: &str) {
        increment_counter!(names::COMPILE_ERRORS, "template" => template.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_a_noop() {
        EngineMetrics::record_event_applied("high");
        EngineMetrics::record_action("raise_alarm", "do");
        EngineMetrics::record_match_error("host-down");
        EngineMetrics::record_replication_fault(3);
        EngineMetrics::record_compile_error("host-down");
    }

    #[test]
    fn test_counter_names_are_prefixed() {
        for name in [
            names::EVENTS_APPLIED,
            names::ACTIONS_EXECUTED,
            names::MATCH_ERRORS,
            names::REPLICATION_FAULTS,
            names::COMPILE_ERRORS,
        ] {
            assert!(name.starts_with("faultline_") && name.ends_with("_total"));
        }
    }
}
