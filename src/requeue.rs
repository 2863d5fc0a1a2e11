//! The merged requeue scheduling model (§4.1 step 12, §4.12, §8 "Requeue
//! merging"). Every sub-step returns a `RequeueHint` instead of suspending;
//! the top-level reconcile merges the hints from all sub-loops and converts
//! the result to a `kube::runtime::controller::Action` exactly once, at the
//! very end of the pass.

use std::time::Duration;

use kube::runtime::controller::Action;

/// Scheduling hint returned by a reconcile sub-step. Distinct from
/// `kube::runtime::controller::Action` so that sub-steps stay decoupled from
/// the kube-rs runtime type and so that merging is a plain, pure function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequeueHint {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl RequeueHint {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(d: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(d),
        }
    }

    pub fn immediate() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    /// Merges a list of sub-pass hints: `requeue = OR(each.requeue)`;
    /// `requeue_after = min over positive values, None if none positive`.
    /// Zero-duration values are treated as "not requested" and ignored.
    pub fn merge(hints: &[RequeueHint]) -> RequeueHint {
        let requeue = hints.iter().any(|h| h.requeue);
        let requeue_after = hints
            .iter()
            .filter_map(|h| h.requeue_after)
            .filter(|d| !d.is_zero())
            .min();
        RequeueHint {
            requeue,
            requeue_after,
        }
    }

    /// Converts the merged hint into a kube-rs `Action`. A positive
    /// `requeue_after` takes priority over a bare `requeue` flag, since a
    /// scheduled delay is strictly more useful information than "requeue
    /// ASAP". Falls back to `fallback` (the jittered steady-state requeue)
    /// when nothing was requested at all.
    pub fn into_action(self, fallback: Action) -> Action {
        if let Some(after) = self.requeue_after {
            Action::requeue(after)
        } else if self.requeue {
            Action::requeue(Duration::ZERO)
        } else {
            fallback
        }
    }
}

/// `computeBackoff(n) = 2s * 2^n` for `0 <= n <= 7`, `5m` for `n >= 8`, and
/// `2s` for any negative `n`. The auth sub-loop's backoff ceiling (`cap`) is
/// configurable; callers pass `Config::auth_backoff_cap_secs`.
pub fn compute_backoff(retry_count: i64, cap: Duration) -> Duration {
    if retry_count < 0 {
        return Duration::from_secs(2);
    }
    let n = retry_count.min(8) as u32;
    if retry_count >= 8 {
        return cap;
    }
    let secs = 2u64.saturating_mul(1u64 << n);
    Duration::from_secs(secs).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(after_secs: u64) -> RequeueHint {
        RequeueHint::after(Duration::from_secs(after_secs))
    }

    #[test]
    fn merge_zero_and_positive_takes_positive() {
        let merged = RequeueHint::merge(&[RequeueHint::default(), r(30)]);
        assert_eq!(merged.requeue_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn merge_takes_min_positive_regardless_of_order() {
        let merged = RequeueHint::merge(&[r(12 * 60), r(30)]);
        assert_eq!(merged.requeue_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn merge_requeue_flag_ors_and_keeps_positive_after() {
        let merged = RequeueHint::merge(&[RequeueHint::immediate(), r(30)]);
        assert!(merged.requeue);
        assert_eq!(merged.requeue_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn merge_three_values_takes_overall_min() {
        let merged = RequeueHint::merge(&[r(60), r(30), r(45)]);
        assert_eq!(merged.requeue_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn merge_empty_yields_nothing() {
        let merged = RequeueHint::merge(&[]);
        assert!(!merged.requeue);
        assert_eq!(merged.requeue_after, None);
    }

    #[test]
    fn backoff_matches_formula_for_small_n() {
        let cap = Duration::from_secs(300);
        assert_eq!(compute_backoff(0, cap), Duration::from_secs(2));
        assert_eq!(compute_backoff(1, cap), Duration::from_secs(4));
        assert_eq!(compute_backoff(7, cap), Duration::from_secs(256));
    }

    #[test]
    fn backoff_caps_at_8_and_above() {
        let cap = Duration::from_secs(300);
        assert_eq!(compute_backoff(8, cap), cap);
        assert_eq!(compute_backoff(20, cap), cap);
        assert_eq!(compute_backoff(1000, cap), cap);
    }

    #[test]
    fn backoff_negative_is_floor() {
        let cap = Duration::from_secs(300);
        assert_eq!(compute_backoff(-1, cap), Duration::from_secs(2));
        assert_eq!(compute_backoff(-100, cap), Duration::from_secs(2));
    }
}
