use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    /// Fallback polling interval when `spec.adapterDiscovery.pollingInterval` is absent,
    /// empty, malformed, or non-positive.
    pub default_polling_interval_secs: u64,
    /// Ceiling for the auth sub-loop's exponential backoff.
    pub auth_backoff_cap_secs: u64,
    /// How long a CR may sit with a deletion timestamp before the finalizer is force-removed.
    pub cleanup_timeout_secs: u64,
    /// Per-REST-call timeout against the managed server's API.
    pub rest_call_timeout_secs: u64,
    /// Max attempts for the optimistic-concurrency retry wrapper.
    pub conflict_retry_max_attempts: u32,
    /// Linear backoff step between conflict retries.
    pub conflict_retry_backoff_ms: u64,
    /// Requeue delay used while waiting on the managed database to become ready.
    pub database_wait_requeue_secs: u64,
    /// Requeue delay after a cleanup failure (never surfaced as an error).
    pub cleanup_failure_requeue_secs: u64,
    /// Jittered fallback requeue used when no sub-loop requests one at all.
    pub steady_state_requeue_secs: u64,
    pub field_manager: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_polling_interval_secs: from_env_default("DEFAULT_POLLING_INTERVAL_SECS", "30")
                .parse()
                .unwrap(),
            auth_backoff_cap_secs: from_env_default("AUTH_BACKOFF_CAP_SECS", "300")
                .parse()
                .unwrap(),
            cleanup_timeout_secs: from_env_default("CLEANUP_TIMEOUT_SECS", "60")
                .parse()
                .unwrap(),
            rest_call_timeout_secs: from_env_default("REST_CALL_TIMEOUT_SECS", "10")
                .parse()
                .unwrap(),
            conflict_retry_max_attempts: from_env_default("CONFLICT_RETRY_MAX_ATTEMPTS", "3")
                .parse()
                .unwrap(),
            conflict_retry_backoff_ms: from_env_default("CONFLICT_RETRY_BACKOFF_MS", "100")
                .parse()
                .unwrap(),
            database_wait_requeue_secs: from_env_default("DATABASE_WAIT_REQUEUE_SECS", "10")
                .parse()
                .unwrap(),
            cleanup_failure_requeue_secs: from_env_default("CLEANUP_FAILURE_REQUEUE_SECS", "5")
                .parse()
                .unwrap(),
            steady_state_requeue_secs: from_env_default("STEADY_STATE_REQUEUE_SECS", "90")
                .parse()
                .unwrap(),
            field_manager: from_env_default("FIELD_MANAGER", crate::FIELD_MANAGER),
        }
    }
}

// Source the variable from the env - use default if not set
fn from_env_default(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_owned())
}
