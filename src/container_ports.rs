//! Converges the workload's first container's dynamic (`adapter-*`) port
//! list from the active-adapter set, leaving static ports untouched and
//! never issuing a write when the desired list sorts to the current one —
//! avoiding spurious rolling restarts.

use std::collections::BTreeMap;

use k8s_openapi::api::{apps::v1::StatefulSet, core::v1::ContainerPort};
use kube::{api::{Api, Patch, PatchParams}, Client};

use crate::{
    apis::dittoserver_types::DittoServer,
    defaults::NFS_PORTMAPPER_CONTAINER_PORT,
    naming, rest_client::AdapterInfo, Error,
};

const DYNAMIC_PORT_PREFIX: &str = "adapter-";

fn is_dynamic(port: &ContainerPort) -> bool {
    port.name.as_deref().map(|n| n.starts_with(DYNAMIC_PORT_PREFIX)).unwrap_or(false)
}

fn dynamic_ports_for(active: &BTreeMap<String, AdapterInfo>) -> Vec<ContainerPort> {
    let mut ports = Vec::new();
    for (sanitized_type, info) in active {
        let name = naming::adapter_container_port_name(sanitized_type);
        ports.push(ContainerPort {
            name: Some(name),
            container_port: info.port,
            protocol: Some("TCP".to_owned()),
            ..Default::default()
        });
        if sanitized_type == "nfs" {
            ports.push(ContainerPort {
                name: Some("adapter-portmap-tcp".to_owned()),
                container_port: NFS_PORTMAPPER_CONTAINER_PORT,
                protocol: Some("TCP".to_owned()),
                ..Default::default()
            });
            ports.push(ContainerPort {
                name: Some("adapter-portmap-udp".to_owned()),
                container_port: NFS_PORTMAPPER_CONTAINER_PORT,
                protocol: Some("UDP".to_owned()),
                ..Default::default()
            });
        }
    }
    ports
}

fn sort_key(port: &ContainerPort) -> (String, i32, String) {
    (
        port.name.clone().unwrap_or_default(),
        port.container_port,
        port.protocol.clone().unwrap_or_default(),
    )
}

/// Pure merge: returns the desired full port list (static ports first,
/// unmodified order, followed by the sorted dynamic set) and whether it
/// differs from `current` once both are sorted.
pub fn merge_ports(current: &[ContainerPort], active: &BTreeMap<String, AdapterInfo>) -> (Vec<ContainerPort>, bool) {
    let static_ports: Vec<ContainerPort> = current.iter().filter(|p| !is_dynamic(p)).cloned().collect();
    let mut dynamic_ports = dynamic_ports_for(active);
    dynamic_ports.sort_by_key(sort_key);

    let mut desired = static_ports.clone();
    desired.extend(dynamic_ports);

    let mut current_sorted = current.to_vec();
    current_sorted.sort_by_key(sort_key);
    let mut desired_sorted = desired.clone();
    desired_sorted.sort_by_key(sort_key);

    let changed = current_sorted != desired_sorted;
    (desired, changed)
}

/// Reads the workload's first container's ports, computes the merged list,
/// and issues a patch only if it actually changed.
pub async fn reconcile(client: &Client, cr: &DittoServer, active: &BTreeMap<String, AdapterInfo>) -> Result<(), Error> {
    use kube::ResourceExt;
    let ns = cr.namespace().unwrap();
    let name = naming::workload_name(&cr.name_any());
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &ns);

    let sts = match api.get(&name).await {
        Ok(sts) => sts,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(Error::KubeError(e)),
    };

    let current_ports = sts
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.ports.clone())
        .unwrap_or_default();

    let (desired, changed) = merge_ports(&current_ports, active);
    if !changed {
        return Ok(());
    }

    let patch = serde_json::json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [
                        { "name": sts.spec.as_ref().and_then(|s| s.template.spec.as_ref()).and_then(|p| p.containers.first()).map(|c| c.name.clone()).unwrap_or_default(), "ports": desired }
                    ]
                }
            }
        }
    });
    // Strategic merge patch, not JSON merge patch: `containers` carries a
    // `patchMergeKey: name`, so this rewrites only the matched container's
    // `ports` field instead of replacing the whole `containers` array (which
    // would drop `image`, `env`, `volumeMounts`, probes, and `lifecycle`).
    let pp = PatchParams::default();
    api.patch(&name, &pp, &Patch::Strategic(&patch)).await?;
    tracing::info!(workload = %name, "container ports updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(port: i32) -> AdapterInfo {
        AdapterInfo { type_: "nfs".to_owned(), enabled: true, running: true, port }
    }

    #[test]
    fn no_change_when_sorted_lists_match() {
        let mut active = BTreeMap::new();
        active.insert("smb".to_owned(), AdapterInfo { type_: "smb".to_owned(), enabled: true, running: true, port: 445 });
        let (desired, _) = merge_ports(&[], &active);
        let (_, changed) = merge_ports(&desired, &active);
        assert!(!changed);
    }

    #[test]
    fn port_change_is_detected() {
        let mut active = BTreeMap::new();
        active.insert("nfs".to_owned(), adapter(2049));
        let (desired, _) = merge_ports(&[], &active);

        let mut active2 = BTreeMap::new();
        active2.insert("nfs".to_owned(), adapter(2050));
        let (_, changed) = merge_ports(&desired, &active2);
        assert!(changed);
    }

    #[test]
    fn static_ports_are_preserved() {
        let static_port = ContainerPort {
            name: Some("api".to_owned()),
            container_port: 8080,
            protocol: Some("TCP".to_owned()),
            ..Default::default()
        };
        let active = BTreeMap::new();
        let (desired, _) = merge_ports(std::slice::from_ref(&static_port), &active);
        assert_eq!(desired, vec![static_port]);
    }
}
