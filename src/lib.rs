/// Expose all controller components used by main
pub mod controller;
pub use crate::controller::*;
pub mod apis;

pub mod adapter_network_policy;
pub mod adapter_poller;
pub mod adapter_service;
pub mod auth;
pub mod conditions;
pub mod config_hash;
pub mod configmap;
pub mod container_ports;
pub mod database;
pub mod duration;
pub mod naming;
pub mod requeue;
pub mod rest_client;
pub mod secret;
pub mod server_config;
pub mod service;
pub mod workload;

/// Log and trace integrations
pub mod telemetry;

mod config;
pub use config::Config;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
pub mod fixtures;

pub const FINALIZER: &str = "dittofs.dittofs.com/finalizer";
pub const WATCH_ANNOTATION: &str = "dittofs.dittofs.com/watch";
pub const AUTH_RETRY_COUNT_ANNOTATION: &str = "dittofs.dittofs.com/auth-retry-count";
pub const CONFIG_HASH_ANNOTATION: &str = "dittofs.io/config-hash";
pub const MANAGED_ANNOTATIONS_KEY: &str = "dittofs.io/managed-annotations";
pub const FIELD_MANAGER: &str = "dittofs-operator";

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("YamlSerializationError: {0}")]
    YamlSerializationError(#[source] serde_yaml::Error),

    #[error("REST client error: {0}")]
    RestError(#[from] reqwest::Error),

    #[error("Managed server returned an error: code={code} message={message}")]
    RestApiError { code: String, message: String },

    #[error("Missing or invalid secret: {0}")]
    MissingSecretError(String),

    #[error("Invalid spec data: {0}")]
    InvalidSpec(String),

    #[error("Config generation failed: {0}")]
    ConfigGenerationError(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::YamlSerializationError(err)
    }
}

/// Re-fetch-then-update retry wrapper (§4.5, §7): bounds retries at
/// `Config::conflict_retry_max_attempts` with a linear
/// `Config::conflict_retry_backoff_ms`-per-attempt backoff on 409 Conflict.
/// Non-conflict errors propagate on the first attempt.
pub async fn retry_on_conflict<F, Fut, T>(cfg: &Config, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Error::KubeError(kube::Error::Api(e))) if e.code == 409 && attempt + 1 < cfg.conflict_retry_max_attempts => {
                attempt += 1;
                tokio::time::sleep(std::time::Duration::from_millis(cfg.conflict_retry_backoff_ms * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
