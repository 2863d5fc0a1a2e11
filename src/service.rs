//! Static Services owned directly by the CR (headless, file, API, metrics)
//! and the shared annotation-merging scheme used by both static and dynamic
//! (adapter) Services.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec as K8sServiceSpec},
    apimachinery::pkg::{apis::meta::v1::ObjectMeta, util::intstr::IntOrString},
};
use kube::{
    api::{Api, Patch, PatchParams},
    Client, Resource, ResourceExt,
};

use crate::{apis::dittoserver_types::DittoServer, naming, Error, MANAGED_ANNOTATIONS_KEY};

/// Merges a desired annotation set into an existing one using the
/// managed-keys scheme (§4.5): previously-managed keys that are no longer
/// desired are dropped, third-party keys are always preserved, and the
/// managed-keys annotation itself is rewritten to the new desired set.
pub fn merge_annotations(existing: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let previously_managed: std::collections::BTreeSet<String> = existing
        .get(MANAGED_ANNOTATIONS_KEY)
        .map(|v| v.split(',').filter(|s| !s.is_empty()).map(|s| s.to_owned()).collect())
        .unwrap_or_default();

    let mut merged = BTreeMap::new();
    for (key, value) in existing {
        if key == MANAGED_ANNOTATIONS_KEY {
            continue;
        }
        if !previously_managed.contains(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in desired {
        merged.insert(key.clone(), value.clone());
    }
    if !desired.is_empty() {
        let managed_keys: Vec<String> = desired.keys().cloned().collect();
        merged.insert(MANAGED_ANNOTATIONS_KEY.to_owned(), managed_keys.join(","));
    }
    merged
}

/// Standard labels every sub-object of a CR carries.
pub fn standard_labels(cr_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(naming::APP_LABEL.to_owned(), naming::APP_LABEL_VALUE.to_owned());
    labels.insert(naming::INSTANCE_LABEL.to_owned(), cr_name.to_owned());
    labels
}

/// Applies a Service via server-side apply, preserving platform-owned
/// fields (cluster IP, IP families, health-check node port, external
/// traffic policy, per-port node ports) by simply never including them in
/// our applied object — a different field manager continues to own them.
pub async fn apply_service(
    client: &Client,
    cr: &DittoServer,
    name: &str,
    service_type: &str,
    selector: BTreeMap<String, String>,
    ports: Vec<ServicePort>,
    extra_labels: BTreeMap<String, String>,
    desired_annotations: BTreeMap<String, String>,
) -> Result<(), Error> {
    let ns = cr.namespace().unwrap();
    let api: Api<Service> = Api::namespaced(client.clone(), &ns);
    let oref = cr.controller_owner_ref(&()).unwrap();

    let existing_annotations = api
        .get(name)
        .await
        .ok()
        .and_then(|svc| svc.metadata.annotations)
        .unwrap_or_default();
    let annotations = merge_annotations(&existing_annotations, &desired_annotations);

    let mut labels = standard_labels(&cr.name_any());
    labels.extend(extra_labels);

    let svc = Service {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(ns),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: Some(vec![oref]),
            ..ObjectMeta::default()
        },
        spec: Some(K8sServiceSpec {
            type_: Some(service_type.to_owned()),
            selector: Some(selector),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    };

    let pp = PatchParams::apply(crate::FIELD_MANAGER).force();
    api.patch(name, &pp, &Patch::Apply(&svc)).await?;
    Ok(())
}

pub async fn delete_service_if_exists(client: &Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(Error::KubeError(e)),
    }
}

fn selector(cr_name: &str) -> BTreeMap<String, String> {
    let mut s = BTreeMap::new();
    s.insert(naming::APP_LABEL.to_owned(), naming::APP_LABEL_VALUE.to_owned());
    s.insert(naming::INSTANCE_LABEL.to_owned(), cr_name.to_owned());
    s
}

fn port(name: &str, port: i32, target_port: i32, protocol: &str) -> ServicePort {
    ServicePort {
        name: Some(name.to_owned()),
        port,
        target_port: Some(IntOrString::Int(target_port)),
        protocol: Some(protocol.to_owned()),
        ..Default::default()
    }
}

/// Ensures the headless Service used for StatefulSet pod DNS.
pub async fn apply_headless_service(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    let name = naming::headless_service_name(&cr.name_any());
    let api_port = cr.spec.controlPlane.effective_port();
    apply_service(
        client,
        cr,
        &name,
        "ClusterIP",
        selector(&cr.name_any()),
        vec![port("api", api_port, api_port, "TCP")],
        BTreeMap::new(),
        BTreeMap::new(),
    )
    .await
}

/// Ensures the file-protocol-facing Service (NFS/SMB data plane), of the
/// user-selected type.
pub async fn apply_file_service(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    let name = naming::file_service_name(&cr.name_any());
    let nfs_port = cr.spec.nfs.effective_port();
    apply_service(
        client,
        cr,
        &name,
        &cr.spec.service.effective_type(),
        selector(&cr.name_any()),
        vec![port("nfs", nfs_port, nfs_port, "TCP")],
        BTreeMap::new(),
        cr.spec.service.annotations.clone().unwrap_or_default(),
    )
    .await
}

/// Ensures the control-plane API Service.
pub async fn apply_api_service(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    let name = naming::api_service_name(&cr.name_any());
    let api_port = cr.spec.controlPlane.effective_port();
    apply_service(
        client,
        cr,
        &name,
        "ClusterIP",
        selector(&cr.name_any()),
        vec![port("api", api_port, api_port, "TCP")],
        BTreeMap::new(),
        BTreeMap::new(),
    )
    .await
}

/// Ensures or deletes the metrics Service according to `spec.metrics.enabled`.
pub async fn reconcile_metrics_service(client: &Client, cr: &DittoServer) -> Result<(), Error> {
    let name = naming::metrics_service_name(&cr.name_any());
    if !cr.spec.metrics.is_enabled() {
        return delete_service_if_exists(client, &cr.namespace().unwrap(), &name).await;
    }
    let metrics_port = cr.spec.metrics.effective_port();
    apply_service(
        client,
        cr,
        &name,
        "ClusterIP",
        selector(&cr.name_any()),
        vec![port("metrics", metrics_port, metrics_port, "TCP")],
        BTreeMap::new(),
        BTreeMap::new(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_annotations_drops_stale_managed_keeps_third_party() {
        let mut existing = BTreeMap::new();
        existing.insert("foo".to_owned(), "1".to_owned());
        existing.insert("bar".to_owned(), "2".to_owned());
        existing.insert("qux".to_owned(), "third-party".to_owned());
        existing.insert(MANAGED_ANNOTATIONS_KEY.to_owned(), "bar,foo".to_owned());

        let mut desired = BTreeMap::new();
        desired.insert("foo".to_owned(), "1".to_owned());

        let merged = merge_annotations(&existing, &desired);
        assert_eq!(merged.get("foo"), Some(&"1".to_owned()));
        assert_eq!(merged.get(MANAGED_ANNOTATIONS_KEY), Some(&"foo".to_owned()));
        assert!(!merged.contains_key("bar"));
        assert_eq!(merged.get("qux"), Some(&"third-party".to_owned()));
    }
}
