use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams},
    Client, Resource, ResourceExt,
};
use tracing::debug;

use crate::{apis::dittoserver_types::DittoServer, naming, Error};

pub const CONFIG_DOCUMENT_KEY: &str = "config.yaml";

/// Create-or-updates the CR's ConfigMap with the rendered configuration
/// document under `config.yaml`. Must run before the workload reconciler so
/// that the config hash annotation refers to bytes already persisted.
pub async fn apply_configmap(client: &Client, cr: &DittoServer, config_document: &str) -> Result<(), Error> {
    let ns = cr.namespace().unwrap();
    let cm_name = naming::config_map_name(&cr.name_any());
    let cm_api: Api<ConfigMap> = Api::namespaced(client.clone(), &ns);
    let oref = cr.controller_owner_ref(&()).unwrap();

    let mut labels = BTreeMap::new();
    labels.insert(naming::APP_LABEL.to_owned(), naming::APP_LABEL_VALUE.to_owned());
    labels.insert(naming::INSTANCE_LABEL.to_owned(), cr.name_any());

    let mut data = BTreeMap::new();
    data.insert(CONFIG_DOCUMENT_KEY.to_owned(), config_document.to_owned());

    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(cm_name.clone()),
            namespace: Some(ns),
            labels: Some(labels),
            owner_references: Some(vec![oref]),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..Default::default()
    };

    let patch_params = PatchParams::apply(crate::FIELD_MANAGER).force();
    let patch = Patch::Apply(&cm);
    let applied = cm_api.patch(&cm_name, &patch_params, &patch).await?;
    debug!(configmap = %applied.name_any(), "applied configmap");
    Ok(())
}

/// `ConfigReady` is true iff the ConfigMap exists and carries `config.yaml`.
pub async fn is_config_ready(client: &Client, namespace: &str, cm_name: &str) -> Result<bool, Error> {
    let cm_api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    match cm_api.get(cm_name).await {
        Ok(cm) => Ok(cm.data.map(|d| d.contains_key(CONFIG_DOCUMENT_KEY)).unwrap_or(false)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
        Err(e) => Err(Error::KubeError(e)),
    }
}
