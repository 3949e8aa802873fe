//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::Condition;

/// Set once admission checks have run
pub const CONDITION_TYPE_VALIDATED: &str = "Validated";
/// Set once the snapshotter Job has been submitted
pub const CONDITION_TYPE_JOB_CREATED: &str = "JobCreated";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Record `status` for the condition `type_`, adding it if missing.
///
/// `lastTransitionTime` only moves when the status flips.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    let index = match conditions.iter().position(|c| c.type_ == type_) {
        Some(index) => index,
        None => {
            conditions.push(Condition {
                type_: type_.to_string(),
                ..Default::default()
            });
            conditions.len() - 1
        }
    };

    let condition = &mut conditions[index];
    if condition.status != status {
        condition.status = status.to_string();
        condition.last_transition_time = Utc::now().to_rfc3339();
    }
    condition.reason = reason.to_string();
    condition.message = message.to_string();
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}
