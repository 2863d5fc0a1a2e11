use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        watcher::Config as WatcherConfig,
    },
    Client, Resource, ResourceExt,
};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::{sync::RwLock, time::Duration};
use tracing::{field, info, instrument, warn, Span};

use crate::{
    adapter_network_policy, adapter_poller, adapter_service, conditions, configmap, container_ports,
    database,
    apis::dittoserver_types::{DittoServer, Phase},
    naming,
    requeue::RequeueHint,
    rest_client::RestClient,
    secret, server_config, service, workload,
    telemetry, Config, Error, Metrics, Result, FINALIZER, WATCH_ANNOTATION,
};

/// Context shared by every reconcile pass.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Process-wide adapter snapshot store (§5 shared-resource policy)
    pub adapter_snapshots: adapter_poller::AdapterSnapshotStore,
    /// Tunables, normally sourced from the environment
    pub config: Config,
}

fn jittered_steady_state_requeue(cfg: &Config) -> Action {
    let jitter = rand::thread_rng().gen_range(0..30);
    Action::requeue(Duration::from_secs(cfg.steady_state_requeue_secs + jitter))
}

#[instrument(skip(ctx, cr), fields(trace_id))]
async fn reconcile(cr: Arc<DittoServer>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = cr
        .namespace()
        .ok_or_else(|| Error::InvalidSpec("DittoServer must be namespaced".to_owned()))?;
    let name = cr.name_any();

    let annotations = cr.meta().annotations.clone().unwrap_or_default();
    if annotations.get(WATCH_ANNOTATION).map(String::as_str) == Some("false") {
        info!(%name, %ns, "skipping reconciliation, watch annotation is false");
        return Ok(Action::await_change());
    }

    let _timer = ctx.metrics.reconcile.count_and_measure(&cr);

    if cr.meta().deletion_timestamp.is_some() {
        return handle_deletion(&cr, &ctx, &ns, &name).await;
    }

    if !cr.finalizers().iter().any(|f| f == FINALIZER) {
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone(), &cr);
        add_finalizer(&ctx.client, &ctx.config, &ns, &name).await?;
        recorder
            .publish(Event {
                type_: EventType::Normal,
                reason: "Created".into(),
                note: Some(format!("added finalizer to `{name}`")),
                action: "Reconciling".into(),
                secondary: None,
            })
            .await
            .map_err(Error::KubeError)?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    reconcile_spec(&cr, &ctx, &ns, &name).await
}

/// Steps 4-12 of the top-level reconcile (§4.1): the CR exists, is not being
/// deleted, and already carries the finalizer.
async fn reconcile_spec(cr: &DittoServer, ctx: &Context, ns: &str, name: &str) -> Result<Action> {
    let client = &ctx.client;
    let cfg = &ctx.config;
    let recorder = ctx.diagnostics.read().await.recorder(client.clone(), cr);

    secret::ensure_jwt_secret(client, cr).await?;
    adapter_network_policy::ensure_baseline(client, cr).await?;

    let config_document = server_config::render_config_document(&cr.spec);
    configmap::apply_configmap(client, cr, &config_document).await?;
    service::apply_headless_service(client, cr).await?;
    service::apply_file_service(client, cr).await?;
    service::apply_api_service(client, cr).await?;
    service::reconcile_metrics_service(client, cr).await?;

    if cr.spec.percona.is_enabled() {
        database::ensure_managed_database(client, cr).await?;
        match database::readiness(client, cr).await? {
            Some(true) => {}
            Some(false) => {
                publish(&recorder, EventType::Warning, "PerconaNotReady", "managed database is not yet ready").await;
                return Ok(Action::requeue(Duration::from_secs(cfg.database_wait_requeue_secs)));
            }
            None => {
                return Ok(Action::requeue(Duration::from_secs(cfg.database_wait_requeue_secs)));
            }
        }
    }

    let config_hash = workload::reconcile(client, cr).await?;

    let auth_outcome = crate::auth::run(client, &recorder, cr, cfg).await?;

    let poll_outcome = adapter_poller::poll(client, &ctx.adapter_snapshots, cr).await;

    let mut active = BTreeMap::new();
    if let Some(snapshot) = ctx.adapter_snapshots.get(ns, name).await {
        if snapshot.is_empty() {
            adapter_service::delete_all(client, cr).await?;
            container_ports::reconcile(client, cr, &BTreeMap::new()).await?;
        } else {
            active = adapter_poller::active_adapters(&snapshot);
            adapter_service::reconcile(client, cr, &active).await?;
            adapter_network_policy::reconcile(client, cr, &active).await?;
            container_ports::reconcile(client, cr, &active).await?;
        }
    }

    let config_ready = configmap::is_config_ready(client, ns, &naming::config_map_name(name)).await?;
    update_status(client, cfg, cr, config_ready, &config_hash, &active, &auth_outcome.status).await?;

    let merged = RequeueHint::merge(&[auth_outcome.requeue, poll_outcome.requeue]);
    Ok(merged.into_action(jittered_steady_state_requeue(cfg)))
}

/// Status and condition aggregation (§4.12).
async fn update_status(
    client: &Client,
    cfg: &Config,
    cr: &DittoServer,
    config_ready: bool,
    config_hash: &str,
    active: &BTreeMap<String, crate::rest_client::AdapterInfo>,
    auth_status: &crate::auth::AuthStatus,
) -> Result<()> {
    let ns = cr.namespace().unwrap();
    let name = cr.name_any();
    let generation = cr.meta().generation.unwrap_or(0);

    let sts_api: Api<StatefulSet> = Api::namespaced(client.clone(), &ns);
    let sts = sts_api.get(&naming::workload_name(&name)).await.ok();
    let sts_status = sts.as_ref().and_then(|s| s.status.as_ref());
    let ready_replicas = sts_status.map(|s| s.ready_replicas.unwrap_or(0)).unwrap_or(0);
    let available_replicas = sts_status.map(|s| s.available_replicas.unwrap_or(0)).unwrap_or(0);
    let workload_observed_generation = sts_status.and_then(|s| s.observed_generation).unwrap_or(0);
    let workload_generation = sts.as_ref().and_then(|s| s.meta().generation).unwrap_or(0);

    let desired = cr.spec.replicas;
    let phase = if desired == 0 {
        Phase::Stopped
    } else if ready_replicas == desired {
        Phase::Running
    } else {
        Phase::Pending
    };

    let mut conditions = cr.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();

    conditions::set_condition(
        &mut conditions,
        conditions::TYPE_CONFIG_READY,
        if config_ready { conditions::STATUS_TRUE } else { conditions::STATUS_FALSE },
        if config_ready { "ConfigMapPresent" } else { "ConfigMapMissing" },
        "ConfigMap state",
        generation,
    );

    let available = desired == 0 || ready_replicas >= 1;
    conditions::set_condition(
        &mut conditions,
        conditions::TYPE_AVAILABLE,
        if available { conditions::STATUS_TRUE } else { conditions::STATUS_FALSE },
        if desired == 0 { "Stopped" } else if available { "ReplicasReady" } else { "NoReplicasReady" },
        "Workload availability",
        generation,
    );

    let progressing = workload_observed_generation < workload_generation || ready_replicas != desired;
    conditions::set_condition(
        &mut conditions,
        conditions::TYPE_PROGRESSING,
        if progressing { conditions::STATUS_TRUE } else { conditions::STATUS_FALSE },
        if progressing { "RolloutInProgress" } else { "RolloutComplete" },
        "Workload rollout state",
        generation,
    );

    let percona_enabled = cr.spec.percona.is_enabled();
    if percona_enabled {
        // Reaching this point with Percona enabled implies the last readiness
        // check observed `Some(true)` — see the early-return in reconcile_spec.
        conditions::set_condition(
            &mut conditions,
            conditions::TYPE_DATABASE_READY,
            conditions::STATUS_TRUE,
            "PerconaReady",
            "managed database is ready",
            generation,
        );
    } else {
        conditions::remove_condition(&mut conditions, conditions::TYPE_DATABASE_READY);
    }

    conditions::set_condition(
        &mut conditions,
        conditions::TYPE_AUTHENTICATED,
        if auth_status.authenticated { conditions::STATUS_TRUE } else { conditions::STATUS_FALSE },
        auth_status.reason,
        &auth_status.message,
        generation,
    );

    let config_ready_true = conditions::is_true(&conditions, conditions::TYPE_CONFIG_READY);
    let database_ready_true = !percona_enabled || conditions::is_true(&conditions, conditions::TYPE_DATABASE_READY);
    let ready = config_ready_true && available && !progressing && database_ready_true;
    conditions::set_condition(
        &mut conditions,
        conditions::TYPE_READY,
        if ready { conditions::STATUS_TRUE } else { conditions::STATUS_FALSE },
        if ready { "AllConditionsMet" } else { "ConditionsNotMet" },
        "Aggregate readiness",
        generation,
    );

    let nfs_endpoint = active.get("nfs").map(|info| {
        format!("{}.{}.svc.cluster.local:{}", naming::headless_service_name(&name), ns, info.port)
    });
    let percona_cluster_name = percona_enabled.then(|| database::cluster_name(&name));

    let patch = json!({
        "status": {
            "observedGeneration": generation,
            "phase": phase,
            "replicas": desired,
            "readyReplicas": ready_replicas,
            "availableReplicas": available_replicas,
            "configHash": config_hash,
            "conditions": conditions,
            "nfsEndpoint": nfs_endpoint,
            "perconaClusterName": percona_cluster_name,
        }
    });

    let api: Api<DittoServer> = Api::namespaced(client.clone(), &ns);
    crate::retry_on_conflict(cfg, || async {
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(Error::KubeError)
    })
    .await?;
    Ok(())
}

/// Deletion handling (§4.2).
async fn handle_deletion(cr: &DittoServer, ctx: &Context, ns: &str, name: &str) -> Result<Action> {
    let client = &ctx.client;
    let cfg = &ctx.config;

    if !cr.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }

    let recorder = ctx.diagnostics.read().await.recorder(client.clone(), cr);
    let _ = patch_phase_deleting(client, cfg, cr).await;

    let deletion_age = cr
        .meta()
        .deletion_timestamp
        .as_ref()
        .map(|t| Utc::now().signed_duration_since(t.0))
        .unwrap_or_default();

    if deletion_age > chrono::Duration::seconds(cfg.cleanup_timeout_secs as i64) {
        publish(&recorder, EventType::Warning, "CleanupTimeout", &format!("cleanup exceeded {}s, force-removing finalizer", cfg.cleanup_timeout_secs)).await;
        remove_finalizer(client, cfg, ns, name).await?;
        ctx.adapter_snapshots.remove(ns, name).await;
        return Ok(Action::await_change());
    }

    publish(&recorder, EventType::Normal, "Deleting", &format!("cleaning up `{name}`")).await;

    match perform_cleanup(cr, client, &recorder).await {
        Ok(()) => {
            remove_finalizer(client, cfg, ns, name).await?;
            ctx.adapter_snapshots.remove(ns, name).await;
            Ok(Action::await_change())
        }
        Err(e) => {
            warn!(error = %e, "cleanup failed, will retry");
            Ok(Action::requeue(Duration::from_secs(cfg.cleanup_failure_requeue_secs)))
        }
    }
}

async fn perform_cleanup(cr: &DittoServer, client: &Client, recorder: &Recorder) -> Result<()> {
    if cr.spec.percona.is_enabled() {
        database::cleanup(client, cr).await?;
        if cr.spec.percona.delete_with_server() {
            publish(recorder, EventType::Normal, "PerconaDeleted", "deleted managed database").await;
        } else {
            publish(recorder, EventType::Normal, "PerconaOrphaned", "removed owner reference from managed database, preserving it").await;
        }
    }

    let ns = cr.namespace().unwrap();
    let name = cr.name_any();
    if let Ok(Some(data)) = secret::read_secret_data(client, &ns, &naming::operator_credentials_secret_name(&name)).await {
        if let (Some(url), Some(token)) = (data.get(secret::OPERATOR_SERVER_URL_KEY), data.get(secret::OPERATOR_ACCESS_TOKEN_KEY)) {
            let rest = RestClient::new(url);
            if let Err(e) = rest.delete_user(secret::OPERATOR_USERNAME, token).await {
                warn!(error = %e, "best-effort operator user deletion failed");
            }
        }
    }

    Ok(())
}

async fn publish(recorder: &Recorder, type_: EventType, reason: &str, message: &str) {
    let _ = recorder
        .publish(Event {
            type_,
            reason: reason.to_owned(),
            note: Some(message.to_owned()),
            action: "Reconciling".to_owned(),
            secondary: None,
        })
        .await;
}

async fn add_finalizer(client: &Client, cfg: &Config, ns: &str, name: &str) -> Result<()> {
    let api: Api<DittoServer> = Api::namespaced(client.clone(), ns);
    crate::retry_on_conflict(cfg, || async {
        let current = api.get(name).await.map_err(Error::KubeError)?;
        if current.finalizers().iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        let mut finalizers = current.finalizers().to_vec();
        finalizers.push(FINALIZER.to_owned());
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    })
    .await
}

async fn remove_finalizer(client: &Client, cfg: &Config, ns: &str, name: &str) -> Result<()> {
    let api: Api<DittoServer> = Api::namespaced(client.clone(), ns);
    crate::retry_on_conflict(cfg, || async {
        let current = api.get(name).await.map_err(Error::KubeError)?;
        let finalizers: Vec<String> = current.finalizers().iter().filter(|f| *f != FINALIZER).cloned().collect();
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    })
    .await
}

async fn patch_phase_deleting(client: &Client, cfg: &Config, cr: &DittoServer) -> Result<()> {
    let ns = cr.namespace().unwrap();
    let name = cr.name_any();
    let api: Api<DittoServer> = Api::namespaced(client.clone(), &ns);
    crate::retry_on_conflict(cfg, || async {
        let patch = json!({ "status": { "phase": "Deleting" } });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(Error::KubeError)
    })
    .await?;
    Ok(())
}

pub(crate) fn error_policy(cr: Arc<DittoServer>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile.set_failure(&cr, error);

    match error {
        Error::KubeError(kube::Error::Api(api_error)) if api_error.code == 429 => {
            let backoff = 60u64;
            let max_jitter = 120u64;
            let jitter = rand::thread_rng().gen_range(0..=max_jitter);
            let backoff_with_jitter = Duration::from_secs(backoff + jitter);
            warn!("received HTTP 429, requeuing after {}s", backoff_with_jitter.as_secs());
            Action::requeue(backoff_with_jitter)
        }
        _ => Action::requeue(Duration::from_secs(5 * 60)),
    }
}

/// Diagnostics exposed by the web server.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: chrono::DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "dittofs-operator".into(),
        }
    }
}

impl Diagnostics {
    fn recorder(&self, client: Client, cr: &DittoServer) -> Recorder {
        Recorder::new(client, self.reporter.clone(), cr.object_ref(&()))
    }
}

/// State shared between the controller and the web server.
#[derive(Clone)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Metrics,
    adapter_snapshots: adapter_poller::AdapterSnapshotStore,
}

impl Default for State {
    fn default() -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            metrics: Metrics::default(),
            adapter_snapshots: adapter_poller::AdapterSnapshotStore::new(),
        }
    }
}

impl State {
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.metrics.registry.gather()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn create_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            diagnostics: self.diagnostics.clone(),
            metrics: self.metrics.clone(),
            adapter_snapshots: self.adapter_snapshots.clone(),
            config: Config::default(),
        })
    }
}

/// Initializes the controller and shared state (given the CRD is installed).
pub async fn run(state: State) {
    let client = match kube::Client::try_default().await {
        Ok(client) => client,
        Err(_) => panic!("please configure your Kubernetes context"),
    };

    let servers = Api::<DittoServer>::all(client.clone());
    if let Err(e) = servers.list(&kube::api::ListParams::default().limit(1)).await {
        tracing::error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    Controller::new(servers, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.create_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{timeout_after_1s, Scenario};

    #[tokio::test]
    async fn finalizer_gets_added_on_fresh_resource() {
        let (testctx, fakeserver) = Context::test();
        let cr = DittoServer::test();
        let mocksrv = fakeserver.run(Scenario::FinalizerCreation(cr.clone()));
        reconcile(Arc::new(cr), testctx).await.expect("reconciler");
        timeout_after_1s(mocksrv).await;
    }
}
