//! Create-only integration with an externally-operated managed PostgreSQL
//! cluster (Percona). The operator never reconciles drift against it after
//! creation — users may hand-edit it — it only creates it once, reads its
//! readiness, and orphans or deletes it on CR teardown per
//! `spec.percona.deleteWithServer`.

use kube::{
    api::{Api, Patch, PatchParams, PropagationPolicy},
    core::ObjectMeta,
    Client, CustomResource, Resource, ResourceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{apis::dittoserver_types::DittoServer, Error};

/// Minimal typed facade over the external Percona XtraDB Cluster CRD: only
/// the fields the operator needs to create it and read its readiness.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    kind = "PerconaXtraDBCluster",
    group = "pxc.percona.com",
    version = "v1",
    namespaced,
    status = "PerconaXtraDBClusterStatus"
)]
#[allow(non_snake_case)]
pub struct PerconaXtraDBClusterSpec {
    #[serde(default)]
    pub pxc: PerconaPxcSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct PerconaPxcSpec {
    #[serde(default = "default_pxc_size")]
    pub size: i32,
}

fn default_pxc_size() -> i32 {
    3
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
pub struct PerconaXtraDBClusterStatus {
    #[serde(default)]
    pub state: String,
}

impl PerconaXtraDBClusterStatus {
    pub fn is_ready(&self) -> bool {
        self.state.eq_ignore_ascii_case("ready")
    }
}

pub fn cluster_name(cr_name: &str) -> String {
    format!("{cr_name}-pxc")
}

/// Create-only: does nothing if the managed DB CR already exists.
pub async fn ensure_managed_database(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    let ns = cr.namespace().unwrap();
    let name = cluster_name(&cr.name_any());
    let api: Api<PerconaXtraDBCluster> = Api::namespaced(client.clone(), &ns);

    if api.get(&name).await.is_ok() {
        return Ok(());
    }

    let oref = cr.controller_owner_ref(&()).unwrap();
    let cluster = PerconaXtraDBCluster {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ns),
            owner_references: Some(vec![oref]),
            ..Default::default()
        },
        spec: PerconaXtraDBClusterSpec::default(),
        status: None,
    };

    let pp = PatchParams::apply(crate::FIELD_MANAGER);
    api.patch(&name, &pp, &Patch::Apply(&cluster)).await?;
    Ok(())
}

/// Returns `None` if the managed DB CR is missing (caller requeues in 10s),
/// `Some(true/false)` for present-and-ready / present-and-not-ready.
pub async fn readiness(client: &Client, cr: &DittoServer) -> Result<Option<bool>, Error> {
    let ns = cr.namespace().unwrap();
    let name = cluster_name(&cr.name_any());
    let api: Api<PerconaXtraDBCluster> = Api::namespaced(client.clone(), &ns);

    match api.get(&name).await {
        Ok(cluster) => Ok(Some(cluster.status.map(|s| s.is_ready()).unwrap_or(false))),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Cleanup during CR deletion (§4.2): deletes the managed DB (cascading
/// PVCs at the platform layer) if `deleteWithServer`, otherwise strips only
/// this CR's owner reference, preserving the database.
pub async fn cleanup(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    if !cr.spec.percona.is_enabled() {
        return Ok(());
    }
    let ns = cr.namespace().unwrap();
    let name = cluster_name(&cr.name_any());
    let api: Api<PerconaXtraDBCluster> = Api::namespaced(client.clone(), &ns);

    let Ok(cluster) = api.get(&name).await else {
        return Ok(());
    };

    if cr.spec.percona.delete_with_server() {
        let dp = kube::api::DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        api.delete(&name, &dp).await?;
        return Ok(());
    }

    let my_uid = cr.uid();
    let remaining: Vec<_> = cluster
        .metadata
        .owner_references
        .unwrap_or_default()
        .into_iter()
        .filter(|o| Some(&o.uid) != my_uid.as_ref())
        .collect();

    let patch = serde_json::json!({ "metadata": { "ownerReferences": remaining } });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}
