//! Condition helpers following Kubernetes API conventions
//!
//! Topology objects carry two conditions: `Ready` (the broker object matches
//! the spec of `observedGeneration`) and `Degraded` (the last attempt failed,
//! with `Transient` or `Terminal` as reason).

use chrono::Utc;

use crate::crd::Condition;

pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_DEGRADED: &str = "Degraded";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Reason set on Ready after a successful declare
pub const REASON_SUCCESS: &str = "SuccessfulCreateOrUpdate";
/// Reason set on Ready/Degraded while a super stream waits for its children
pub const REASON_CHILDREN_NOT_READY: &str = "ChildrenNotReady";

/// Update or add a condition.
///
/// The transition time only moves when the status changes, so repeated
/// reconciles with the same outcome produce identical conditions.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = Utc::now().to_rfc3339();
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.observed_generation = observed_generation;
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation,
        });
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

/// Ready=True and computed from the current generation.
pub fn is_reconciled(conditions: &[Condition], generation: Option<i64>) -> bool {
    find_condition(conditions, CONDITION_TYPE_READY).is_some_and(|c| {
        c.status == CONDITION_STATUS_TRUE && generation.is_some() && c.observed_generation == generation
    })
}

/// Mark the object as in sync with the broker.
pub fn mark_ready(conditions: &mut Vec<Condition>, message: &str, generation: Option<i64>) {
    set_condition(
        conditions,
        CONDITION_TYPE_READY,
        CONDITION_STATUS_TRUE,
        REASON_SUCCESS,
        message,
        generation,
    );
    set_condition(
        conditions,
        CONDITION_TYPE_DEGRADED,
        CONDITION_STATUS_FALSE,
        REASON_SUCCESS,
        "",
        generation,
    );
}

/// Mark the last attempt as failed. Ready keeps the generation it was last
/// true for.
pub fn mark_degraded(
    conditions: &mut Vec<Condition>,
    reason: &str,
    message: &str,
    generation: Option<i64>,
) {
    set_condition(
        conditions,
        CONDITION_TYPE_DEGRADED,
        CONDITION_STATUS_TRUE,
        reason,
        message,
        generation,
    );
    let ready_observed = find_condition(conditions, CONDITION_TYPE_READY)
        .and_then(|c| c.observed_generation);
    set_condition(
        conditions,
        CONDITION_TYPE_READY,
        CONDITION_STATUS_FALSE,
        reason,
        message,
        ready_observed,
    );
}
