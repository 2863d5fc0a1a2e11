//! Ingress-only NetworkPolicy reconciliation: the always-present baseline
//! (API port) and one per active adapter. NetworkPolicy errors are fatal to
//! the pass — unlike Services, a silent failure here could leave ports
//! exposed or blocked.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::{
    api::networking::v1::{
        NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPort, NetworkPolicySpec,
    },
    apimachinery::pkg::{apis::meta::v1::{LabelSelector, ObjectMeta}, util::intstr::IntOrString},
};
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    Client, Resource, ResourceExt,
};

use crate::{
    apis::dittoserver_types::DittoServer,
    defaults::{NFS_PORTMAPPER_CONTAINER_PORT},
    naming, rest_client::AdapterInfo, service::standard_labels, Error,
};

fn pod_selector(cr_name: &str) -> LabelSelector {
    let mut labels = BTreeMap::new();
    labels.insert(naming::APP_LABEL.to_owned(), naming::APP_LABEL_VALUE.to_owned());
    labels.insert(naming::INSTANCE_LABEL.to_owned(), cr_name.to_owned());
    LabelSelector {
        match_labels: Some(labels),
        ..Default::default()
    }
}

fn np_port(port: i32, protocol: &str) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::Int(port)),
        protocol: Some(protocol.to_owned()),
        ..Default::default()
    }
}

async fn apply(client: &Client, cr: &DittoServer, name: &str, ports: Vec<NetworkPolicyPort>, extra_labels: BTreeMap<String, String>) -> Result<(), Error> {
    let ns = cr.namespace().unwrap();
    let api: Api<NetworkPolicy> = Api::namespaced(client.clone(), &ns);
    let oref = cr.controller_owner_ref(&()).unwrap();

    let mut labels = standard_labels(&cr.name_any());
    labels.extend(extra_labels);

    let np = NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(ns),
            labels: Some(labels),
            owner_references: Some(vec![oref]),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: pod_selector(&cr.name_any()),
            policy_types: Some(vec!["Ingress".to_owned()]),
            ingress: Some(vec![NetworkPolicyIngressRule {
                ports: Some(ports),
                from: None,
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    let pp = PatchParams::apply(crate::FIELD_MANAGER).force();
    api.patch(name, &pp, &Patch::Apply(&np)).await?;
    Ok(())
}

pub async fn delete_if_exists(client: &Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<NetworkPolicy> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Ensures `{name}-baseline`, permitting ingress to the API port. Must run
/// before any per-adapter policy exists (§4.8) — introducing the first
/// ingress NetworkPolicy activates default-deny for the rest of the pod.
pub async fn ensure_baseline(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    let name = naming::baseline_network_policy_name(&cr.name_any());
    let api_port = cr.spec.controlPlane.effective_port();
    apply(client, cr, &name, vec![np_port(api_port, "TCP")], BTreeMap::new()).await
}

fn marker_labels(sanitized_type: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(naming::ADAPTER_NETWORK_POLICY_MARKER.to_owned(), "true".to_owned());
    labels.insert(naming::ADAPTER_TYPE_LABEL.to_owned(), sanitized_type.to_owned());
    labels
}

fn ports_for(sanitized_type: &str, info: &AdapterInfo) -> Vec<NetworkPolicyPort> {
    let mut ports = vec![np_port(info.port, "TCP")];
    if sanitized_type == "nfs" {
        ports.push(np_port(NFS_PORTMAPPER_CONTAINER_PORT, "TCP"));
        ports.push(np_port(NFS_PORTMAPPER_CONTAINER_PORT, "UDP"));
    }
    ports
}

/// Converges per-adapter NetworkPolicies to the active-adapter set.
pub async fn reconcile(client: &Client, cr: &DittoServer, active: &BTreeMap<String, AdapterInfo>) -> Result<(), Error> {
    let ns = cr.namespace().unwrap();
    let name = cr.name_any();
    let api: Api<NetworkPolicy> = Api::namespaced(client.clone(), &ns);

    let lp = ListParams::default().labels(&format!("{}=true,{}={}", naming::ADAPTER_NETWORK_POLICY_MARKER, naming::INSTANCE_LABEL, name));
    let existing = api.list(&lp).await?;
    let existing_types: BTreeSet<String> = existing
        .items
        .iter()
        .filter_map(|np| np.metadata.labels.as_ref()?.get(naming::ADAPTER_TYPE_LABEL).cloned())
        .collect();

    for (sanitized_type, info) in active {
        let np_name = naming::adapter_network_policy_name(&name, sanitized_type);
        apply(client, cr, &np_name, ports_for(sanitized_type, info), marker_labels(sanitized_type)).await?;
    }

    for stale_type in existing_types.difference(&active.keys().cloned().collect()) {
        let np_name = naming::adapter_network_policy_name(&name, stale_type);
        delete_if_exists(client, &ns, &np_name).await?;
    }

    Ok(())
}
