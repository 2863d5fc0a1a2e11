//! Maintains the `DittoServer` status's by-name set of conditions, with
//! transition timestamps that only move when a condition's `status` actually
//! changes.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const TYPE_READY: &str = "Ready";
pub const TYPE_AVAILABLE: &str = "Available";
pub const TYPE_CONFIG_READY: &str = "ConfigReady";
pub const TYPE_PROGRESSING: &str = "Progressing";
pub const TYPE_AUTHENTICATED: &str = "Authenticated";
pub const TYPE_DATABASE_READY: &str = "DatabaseReady";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
#[allow(dead_code)]
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Sets (inserts or updates in place) a named condition. `lastTransitionTime`
/// is only bumped when the condition's `status` changes relative to the
/// previous value for that type; `observedGeneration` is always refreshed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: i64,
) {
    let now = Time(Utc::now());
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = now;
        }
        existing.status = status.to_owned();
        existing.reason = reason.to_owned();
        existing.message = message.to_owned();
        existing.observed_generation = Some(observed_generation);
    } else {
        conditions.push(Condition {
            type_: type_.to_owned(),
            status: status.to_owned(),
            reason: reason.to_owned(),
            message: message.to_owned(),
            last_transition_time: now,
            observed_generation: Some(observed_generation),
        });
    }
}

/// Removes a named condition if present; a no-op otherwise. Used when a
/// condition type becomes inapplicable (e.g. `DatabaseReady` when Percona is
/// disabled).
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| c.status == STATUS_TRUE)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_creates_new() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, TYPE_READY, STATUS_TRUE, "AllGood", "ok", 1);
        assert_eq!(conditions.len(), 1);
        assert!(is_true(&conditions, TYPE_READY));
    }

    #[test]
    fn set_condition_preserves_transition_time_when_status_unchanged() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, TYPE_READY, STATUS_TRUE, "A", "a", 1);
        let t0 = conditions[0].last_transition_time.clone();
        set_condition(&mut conditions, TYPE_READY, STATUS_TRUE, "B", "b", 2);
        assert_eq!(conditions[0].last_transition_time, t0);
        assert_eq!(conditions[0].reason, "B");
        assert_eq!(conditions[0].observed_generation, Some(2));
    }

    #[test]
    fn set_condition_bumps_transition_time_on_status_change() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, TYPE_READY, STATUS_FALSE, "A", "a", 1);
        let t0 = conditions[0].last_transition_time.clone();
        std::thread::sleep(std::time::Duration::from_millis(2));
        set_condition(&mut conditions, TYPE_READY, STATUS_TRUE, "B", "b", 1);
        assert_ne!(conditions[0].last_transition_time, t0);
    }

    #[test]
    fn remove_condition_is_noop_when_absent() {
        let mut conditions = Vec::new();
        remove_condition(&mut conditions, TYPE_DATABASE_READY);
        assert!(conditions.is_empty());
    }
}
