//! The adapter-discovery sub-loop's in-memory snapshot store and poller.
//!
//! The snapshot is process-wide state, held behind a reader-writer lock and
//! keyed by CR identity (`namespace/name`). "No entry" means "never
//! successfully polled in this process lifetime" and is semantically
//! distinct from "entry present but empty" (polled, nothing running) — the
//! DISC-03 safety property that downstream reconcilers key their destructive
//! behavior on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kube::{Client, ResourceExt};
use tokio::sync::RwLock;
use tracing::warn;

use crate::{
    apis::dittoserver_types::DittoServer,
    duration::get_polling_interval,
    naming,
    requeue::RequeueHint,
    rest_client::{AdapterInfo, RestClient},
    secret,
};

fn snapshot_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Process-wide store of the last-known adapter list per CR.
#[derive(Clone, Default)]
pub struct AdapterSnapshotStore {
    inner: Arc<RwLock<HashMap<String, Vec<AdapterInfo>>>>,
}

impl AdapterSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Option<Vec<AdapterInfo>> {
        self.inner.read().await.get(&snapshot_key(namespace, name)).cloned()
    }

    pub async fn set(&self, namespace: &str, name: &str, adapters: Vec<AdapterInfo>) {
        self.inner.write().await.insert(snapshot_key(namespace, name), adapters);
    }

    /// Drops the snapshot for a CR identity, e.g. on finalizer teardown.
    pub async fn remove(&self, namespace: &str, name: &str) {
        self.inner.write().await.remove(&snapshot_key(namespace, name));
    }
}

/// A running, enabled adapter keyed by its sanitized type — the "active
/// adapters" mapping §4.7 derives from a snapshot before invoking the
/// service, network-policy, and container-port converters.
pub fn active_adapters(snapshot: &[AdapterInfo]) -> BTreeMap<String, AdapterInfo> {
    snapshot
        .iter()
        .filter(|a| a.enabled && a.running)
        .map(|a| (naming::sanitize_adapter_type(&a.type_), a.clone()))
        .collect()
}

pub struct PollOutcome {
    pub requeue: RequeueHint,
}

/// Runs one pass of the poller: reads the operator-credentials secret,
/// calls `GET /api/v1/adapters`, and either replaces or preserves the
/// snapshot for this CR. Never returns an error — missing credentials and
/// REST failures are logged and folded into the requeue interval.
pub async fn poll(client: &Client, store: &AdapterSnapshotStore, cr: &DittoServer) -> PollOutcome {
    let ns = cr.namespace().unwrap();
    let name = cr.name_any();
    let interval = get_polling_interval(cr.spec.adapterDiscovery.pollingInterval.as_deref());

    let operator_secret_name = naming::operator_credentials_secret_name(&name);
    let data = match secret::read_secret_data(client, &ns, &operator_secret_name).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            warn!(cr = %name, "operator-credentials secret missing, skipping adapter poll");
            return PollOutcome { requeue: RequeueHint::after(interval) };
        }
        Err(e) => {
            warn!(cr = %name, error = %e, "failed reading operator-credentials secret");
            return PollOutcome { requeue: RequeueHint::after(interval) };
        }
    };

    let (server_url, access_token) = match (data.get(secret::OPERATOR_SERVER_URL_KEY), data.get(secret::OPERATOR_ACCESS_TOKEN_KEY)) {
        (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => (url.clone(), token.clone()),
        _ => {
            warn!(cr = %name, "operator-credentials secret missing server-url/access-token, skipping adapter poll");
            return PollOutcome { requeue: RequeueHint::after(interval) };
        }
    };

    let rest = RestClient::new(&server_url);
    match rest.list_adapters(&access_token).await {
        Ok(adapters) => {
            store.set(&ns, &name, adapters).await;
        }
        Err(e) => {
            warn!(cr = %name, error = %e, "adapter poll failed, preserving existing snapshot");
        }
    }

    PollOutcome { requeue: RequeueHint::after(interval) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(type_: &str, enabled: bool, running: bool, port: i32) -> AdapterInfo {
        AdapterInfo { type_: type_.to_owned(), enabled, running, port }
    }

    #[tokio::test]
    async fn snapshot_absent_by_default() {
        let store = AdapterSnapshotStore::new();
        assert!(store.get("default", "hello").await.is_none());
    }

    #[tokio::test]
    async fn snapshot_present_empty_is_distinct_from_absent() {
        let store = AdapterSnapshotStore::new();
        store.set("default", "hello", vec![]).await;
        assert_eq!(store.get("default", "hello").await, Some(vec![]));
    }

    #[test]
    fn active_adapters_filters_enabled_and_running() {
        let snapshot = vec![
            adapter("nfs", true, true, 2049),
            adapter("smb", true, false, 445),
            adapter("weird type!", false, true, 1),
        ];
        let active = active_adapters(&snapshot);
        assert_eq!(active.len(), 1);
        assert!(active.contains_key("nfs"));
    }
}
