//! Converges dynamic, per-adapter Services from the adapter snapshot.
//! Coexists with the static Services in `service.rs`: only Services
//! carrying the adapter-service marker label are ever touched here.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::{
    core::v1::{Service, ServicePort},
    networking::v1::NetworkPolicy,
};
use kube::{
    api::{Api, ListParams},
    Client, ResourceExt,
};
use tracing::info;

use crate::{
    apis::dittoserver_types::DittoServer,
    defaults::{NFS_PORTMAPPER_CONTAINER_PORT, NFS_PORTMAPPER_SERVICE_PORT},
    naming,
    rest_client::AdapterInfo,
    service,
    Error,
};

fn service_ports_for(sanitized_type: &str, info: &AdapterInfo) -> Vec<ServicePort> {
    let main = k8s_port(sanitized_type, info.port, info.port, "TCP");
    if sanitized_type == "nfs" {
        vec![
            main,
            k8s_port("portmapper-tcp", NFS_PORTMAPPER_SERVICE_PORT, NFS_PORTMAPPER_CONTAINER_PORT, "TCP"),
            k8s_port("portmapper-udp", NFS_PORTMAPPER_SERVICE_PORT, NFS_PORTMAPPER_CONTAINER_PORT, "UDP"),
        ]
    } else {
        vec![main]
    }
}

fn k8s_port(name: &str, port: i32, target_port: i32, protocol: &str) -> ServicePort {
    ServicePort {
        name: Some(name.to_owned()),
        port,
        target_port: Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(target_port)),
        protocol: Some(protocol.to_owned()),
        ..Default::default()
    }
}

fn selector(cr_name: &str) -> BTreeMap<String, String> {
    let mut s = BTreeMap::new();
    s.insert(naming::APP_LABEL.to_owned(), naming::APP_LABEL_VALUE.to_owned());
    s.insert(naming::INSTANCE_LABEL.to_owned(), cr_name.to_owned());
    s
}

fn marker_labels(sanitized_type: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(naming::ADAPTER_SERVICE_MARKER.to_owned(), "true".to_owned());
    labels.insert(naming::ADAPTER_TYPE_LABEL.to_owned(), sanitized_type.to_owned());
    labels
}

/// Converges adapter Services to the active-adapter set. Per §4.7's
/// snapshot-state table, callers must only invoke this when the snapshot is
/// present — an absent snapshot means "skip entirely", enforced by the
/// caller never reaching this function.
pub async fn reconcile(client: &Client, cr: &DittoServer, active: &BTreeMap<String, AdapterInfo>) -> Result<(), Error> {
    let ns = cr.namespace().unwrap();
    let name = cr.name_any();
    let api: Api<Service> = Api::namespaced(client.clone(), &ns);

    let lp = ListParams::default().labels(&format!("{}=true,{}={}", naming::ADAPTER_SERVICE_MARKER, naming::INSTANCE_LABEL, name));
    let existing = api.list(&lp).await?;
    let existing_types: BTreeSet<String> = existing
        .items
        .iter()
        .filter_map(|svc| svc.metadata.labels.as_ref()?.get(naming::ADAPTER_TYPE_LABEL).cloned())
        .collect();

    for (sanitized_type, info) in active {
        let svc_name = naming::adapter_service_name(&name, sanitized_type);
        let service_type = cr.spec.adapterServices.effective_type();
        service::apply_service(
            client,
            cr,
            &svc_name,
            &service_type,
            selector(&name),
            service_ports_for(sanitized_type, info),
            marker_labels(sanitized_type),
            cr.spec.adapterServices.annotations.clone().unwrap_or_default(),
        )
        .await?;
        if !existing_types.contains(sanitized_type) {
            info!(adapter = %sanitized_type, service = %svc_name, "created adapter service");
        }
    }

    for stale_type in existing_types.difference(&active.keys().cloned().collect()) {
        let svc_name = naming::adapter_service_name(&name, stale_type);
        service::delete_service_if_exists(client, &ns, &svc_name).await?;
        info!(adapter = %stale_type, service = %svc_name, "deleted adapter service for inactive adapter");
    }

    Ok(())
}

/// Deletes every adapter-labeled Service and NetworkPolicy for this CR —
/// used when the snapshot is present and empty (§4.7's "converge to empty").
pub async fn delete_all(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    let ns = cr.namespace().unwrap();
    let name = cr.name_any();

    let svc_api: Api<Service> = Api::namespaced(client.clone(), &ns);
    let lp = ListParams::default().labels(&format!("{}=true,{}={}", naming::ADAPTER_SERVICE_MARKER, naming::INSTANCE_LABEL, name));
    for svc in svc_api.list(&lp).await?.items {
        if let Some(svc_name) = svc.metadata.name {
            service::delete_service_if_exists(client, &ns, &svc_name).await?;
        }
    }

    let np_api: Api<NetworkPolicy> = Api::namespaced(client.clone(), &ns);
    let lp = ListParams::default().labels(&format!("{}=true,{}={}", naming::ADAPTER_NETWORK_POLICY_MARKER, naming::INSTANCE_LABEL, name));
    for np in np_api.list(&lp).await?.items {
        if let Some(np_name) = np.metadata.name {
            crate::adapter_network_policy::delete_if_exists(client, &ns, &np_name).await?;
        }
    }

    Ok(())
}
